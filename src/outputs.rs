use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::node::NodeRegistry;

/// `(parameter, alias, index)`
pub type ParameterKey = (String, String, Option<u32>);

/// `(fidelity name, index)`
pub type FidelityKey = (String, Option<u32>);

/// Value plus where and when it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub value: f64,
    pub node_id: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Parameters and fidelities gathered from every node after a run.
///
/// When two nodes publish the same key, the one with the later timestamp wins;
/// ties go to the node visited last in id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationOutputs {
    pub set_parameters: BTreeMap<ParameterKey, Provenance>,
    pub fidelities: BTreeMap<FidelityKey, Provenance>,
}

/// Flat row for JSON export; map keys with tuples don't serialize as objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterRecord {
    pub parameter: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    pub index: Option<u32>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputReport {
    pub set_parameters: Vec<ParameterRecord>,
    pub fidelities: Vec<ParameterRecord>,
}

impl CalibrationOutputs {
    pub fn collect(nodes: &NodeRegistry) -> Self {
        let mut outputs = CalibrationOutputs::default();

        for node in nodes.values() {
            let Some(params) = node.calibrated_parameters.as_ref() else {
                continue;
            };

            for p in &params.platform_parameters {
                let key = (p.parameter.clone(), p.alias.clone(), p.index);
                let entry = Provenance {
                    value: p.value,
                    node_id: node.id.clone(),
                    timestamp: node.calibrated_at,
                };
                insert_newest(&mut outputs.set_parameters, key, entry);
            }

            for f in &params.fidelities {
                let key = (f.name.clone(), f.index);
                let entry = Provenance {
                    value: f.value,
                    node_id: node.id.clone(),
                    timestamp: node.calibrated_at,
                };
                insert_newest(&mut outputs.fidelities, key, entry);
            }
        }

        outputs
    }

    pub fn is_empty(&self) -> bool {
        self.set_parameters.is_empty() && self.fidelities.is_empty()
    }

    pub fn to_report(&self) -> OutputReport {
        OutputReport {
            set_parameters: self
                .set_parameters
                .iter()
                .map(|((parameter, alias, index), prov)| ParameterRecord {
                    parameter: parameter.clone(),
                    alias: Some(alias.clone()),
                    index: *index,
                    provenance: prov.clone(),
                })
                .collect(),
            fidelities: self
                .fidelities
                .iter()
                .map(|((name, index), prov)| ParameterRecord {
                    parameter: name.clone(),
                    alias: None,
                    index: *index,
                    provenance: prov.clone(),
                })
                .collect(),
        }
    }
}

fn insert_newest<K: Ord>(map: &mut BTreeMap<K, Provenance>, key: K, entry: Provenance) {
    match map.get(&key) {
        Some(existing) if existing.timestamp > entry.timestamp => {}
        _ => {
            map.insert(key, entry);
        }
    }
}
