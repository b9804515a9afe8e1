//! Measurement executor backed by external programs.
//!
//! Each node is measured by spawning its configured program with
//! `--node <id> --mode full|check` appended to the configured args. The
//! program must print a JSON [`Measurement`] on stdout and exit with status 0.

use std::collections::BTreeMap;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use log::{debug, info};

use crate::config::{CommandConfig, SystemConfig};
use crate::node::Measurement;
use crate::traits::MeasurementExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Full,
    Check,
}

impl RunMode {
    fn as_arg(self) -> &'static str {
        match self {
            RunMode::Full => "full",
            RunMode::Check => "check",
        }
    }
}

pub struct CommandExecutor {
    commands: BTreeMap<String, CommandConfig>,
    fallback: Option<CommandConfig>,
}

impl CommandExecutor {
    /// Per-node commands from the config; `fallback` serves nodes without one.
    pub fn from_config(config: &SystemConfig, fallback: Option<CommandConfig>) -> Self {
        let commands = config
            .nodes
            .iter()
            .filter_map(|n| n.command.clone().map(|c| (n.id.clone(), c)))
            .collect();
        CommandExecutor { commands, fallback }
    }

    fn command_for(&self, node_id: &str) -> Result<&CommandConfig> {
        self.commands
            .get(node_id)
            .or(self.fallback.as_ref())
            .ok_or_else(|| anyhow!("no command configured for node '{}'", node_id))
    }

    fn run(&self, node_id: &str, mode: RunMode) -> Result<Measurement> {
        let cmd = self.command_for(node_id)?;
        info!("[exec] {} ({}): {} {:?}", node_id, mode.as_arg(), cmd.program, cmd.args);

        let output = Command::new(&cmd.program)
            .args(&cmd.args)
            .args(["--node", node_id, "--mode", mode.as_arg()])
            .output()
            .with_context(|| format!("failed to spawn '{}'", cmd.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "'{}' exited with {}: {}",
                cmd.program,
                output.status,
                stderr.trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!("[exec] {} stdout: {}", node_id, stdout.trim());
        serde_json::from_str(stdout.trim())
            .with_context(|| format!("'{}' printed an invalid measurement", cmd.program))
    }
}

impl MeasurementExecutor for CommandExecutor {
    fn run_full_sweep(&mut self, node_id: &str) -> Result<Measurement> {
        self.run(node_id, RunMode::Full)
    }

    fn run_validation_probe(&mut self, node_id: &str) -> Result<Measurement> {
        self.run(node_id, RunMode::Check)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandConfig {
        // trailing "sh" becomes $0, the appended flags become $1..$4
        CommandConfig {
            program: "sh".into(),
            args: vec!["-c".into(), script.into(), "sh".into()],
        }
    }

    fn executor(script: &str) -> CommandExecutor {
        CommandExecutor {
            commands: BTreeMap::from([("rabi".to_string(), sh(script))]),
            fallback: None,
        }
    }

    #[test]
    fn test_parses_measurement_and_passes_mode() {
        let script = r#"echo "{\"timestamp\":\"2026-05-01T00:00:00Z\",\"output_parameters\":{\"check_parameters\":{\"x\":[0],\"y\":[1]},\"fidelities\":[{\"name\":\"$2-$4\",\"value\":0.99}]}}""#;
        let mut exec = executor(script);

        let m = exec.run_validation_probe("rabi").unwrap();
        let out = m.output_parameters.unwrap();
        assert_eq!(out.fidelities[0].name, "rabi-check");

        let m = exec.run_full_sweep("rabi").unwrap();
        assert_eq!(m.output_parameters.unwrap().fidelities[0].name, "rabi-full");
    }

    #[test]
    fn test_nonzero_exit_is_error() {
        let mut exec = executor("echo broken >&2; exit 3");
        let err = exec.run_full_sweep("rabi").unwrap_err();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_invalid_json_is_error() {
        let mut exec = executor("echo not-json");
        assert!(exec.run_validation_probe("rabi").is_err());
    }

    #[test]
    fn test_missing_command_uses_fallback() {
        let mut exec = CommandExecutor {
            commands: BTreeMap::new(),
            fallback: None,
        };
        assert!(exec.run_full_sweep("t1").is_err());

        exec.fallback = Some(sh(r#"echo "{\"timestamp\":\"2026-05-01T00:00:00Z\"}""#));
        let m = exec.run_full_sweep("t1").unwrap();
        assert!(m.output_parameters.is_none());
    }
}
