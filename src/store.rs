use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::traits::PlatformStore;

/// `alias -> parameter -> index -> value`, index `None` stored under `"-"`.
type PlatformState = BTreeMap<String, BTreeMap<String, BTreeMap<String, f64>>>;

const NO_INDEX: &str = "-";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PlatformFile {
    parameters: PlatformState,
}

/// Platform parameters kept in memory and written to a JSON file on `save`.
#[derive(Debug)]
pub struct JsonPlatformStore {
    path: PathBuf,
    state: PlatformFile,
    dirty: bool,
}

impl JsonPlatformStore {
    /// Open `path`, loading it when it already exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read platform file {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("invalid platform file {}", path.display()))?
        } else {
            info!("[platform] {} does not exist yet, starting empty", path.display());
            PlatformFile::default()
        };

        Ok(JsonPlatformStore {
            path,
            state,
            dirty: false,
        })
    }

    pub fn get(&self, alias: &str, parameter: &str, index: Option<u32>) -> Option<f64> {
        self.state
            .parameters
            .get(alias)?
            .get(parameter)?
            .get(&index_key(index))
            .copied()
    }
}

fn index_key(index: Option<u32>) -> String {
    index.map_or_else(|| NO_INDEX.to_string(), |i| i.to_string())
}

impl PlatformStore for JsonPlatformStore {
    fn set_parameter(
        &mut self,
        alias: &str,
        parameter: &str,
        value: f64,
        index: Option<u32>,
    ) -> Result<()> {
        self.state
            .parameters
            .entry(alias.to_string())
            .or_default()
            .entry(parameter.to_string())
            .or_default()
            .insert(index_key(index), value);
        self.dirty = true;
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        if !self.dirty {
            debug!("[platform] nothing changed, skipping write");
            return Ok(());
        }

        let json = serde_json::to_string_pretty(&self.state)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        self.dirty = false;
        info!("[platform] saved {}", self.path.display());
        Ok(())
    }
}
