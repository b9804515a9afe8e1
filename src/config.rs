use std::collections::BTreeSet;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::comparison::ComparisonKind;
use crate::error::{CalibrationError, Result};
use crate::graph::CalibrationGraph;
use crate::node::{CalibrationNode, NodeRegistry};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub defaults: NodeDefaults,
    pub nodes: Vec<NodeConfig>,
}

/// Fallbacks for anything a node entry leaves out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeDefaults {
    pub in_spec_threshold: f64,
    pub bad_data_threshold: f64,
    pub drift_timeout_secs: u64,
    pub comparison: ComparisonKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub in_spec_threshold: Option<f64>,
    pub bad_data_threshold: Option<f64>,
    pub drift_timeout_secs: Option<u64>,
    pub comparison: Option<ComparisonKind>,
    /// External program that performs this node's measurements.
    pub command: Option<CommandConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for NodeDefaults {
    fn default() -> Self {
        NodeDefaults {
            in_spec_threshold: 0.1,
            bad_data_threshold: 0.5,
            drift_timeout_secs: 3600, // 1h
            comparison: ComparisonKind::NormalizedRmse,
        }
    }
}

impl SystemConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CalibrationError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| CalibrationError::Config(e.to_string()))
    }

    /// Turn the configuration into a node registry and a validated graph.
    pub fn build(&self) -> Result<(NodeRegistry, CalibrationGraph)> {
        let mut ids = BTreeSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(CalibrationError::Config(format!("duplicate node id '{}'", node.id)));
            }
        }

        let mut edges = Vec::new();
        for node in &self.nodes {
            for dep in &node.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(CalibrationError::UnknownNode(dep.clone()));
                }
                edges.push((node.id.as_str(), dep.as_str()));
            }
        }
        let graph = CalibrationGraph::new(self.nodes.iter().map(|n| n.id.as_str()), edges)?;

        let mut registry = NodeRegistry::new();
        for node in &self.nodes {
            registry.insert(node.id.clone(), self.build_node(node)?);
        }

        Ok((registry, graph))
    }

    fn build_node(&self, node: &NodeConfig) -> Result<CalibrationNode> {
        let d = &self.defaults;
        let timeout_secs = node.drift_timeout_secs.unwrap_or(d.drift_timeout_secs);
        let timeout_secs = i64::try_from(timeout_secs).map_err(|_| {
            CalibrationError::Config(format!("drift timeout of '{}' out of range", node.id))
        })?;

        CalibrationNode::new(
            node.id.clone(),
            node.in_spec_threshold.unwrap_or(d.in_spec_threshold),
            node.bad_data_threshold.unwrap_or(d.bad_data_threshold),
            Duration::seconds(timeout_secs),
            node.comparison.unwrap_or(d.comparison).build(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "defaults": { "in_spec_threshold": 0.05, "drift_timeout_secs": 900 },
        "nodes": [
            { "id": "resonator_spectroscopy" },
            { "id": "qubit_spectroscopy", "depends_on": ["resonator_spectroscopy"] },
            {
                "id": "rabi",
                "depends_on": ["qubit_spectroscopy"],
                "bad_data_threshold": 0.8,
                "comparison": "max_abs_deviation",
                "command": { "program": "run-node", "args": ["--fast"] }
            }
        ]
    }"#;

    #[test]
    fn test_defaults() {
        let d = NodeDefaults::default();
        assert_eq!(d.in_spec_threshold, 0.1);
        assert_eq!(d.bad_data_threshold, 0.5);
        assert_eq!(d.drift_timeout_secs, 3600);
    }

    #[test]
    fn test_build_applies_defaults_and_overrides() {
        let config = SystemConfig::from_json(SAMPLE).unwrap();
        let (nodes, graph) = config.build().unwrap();

        let rabi = &nodes["rabi"];
        assert_eq!(rabi.in_spec_threshold, 0.05);
        assert_eq!(rabi.bad_data_threshold, 0.8);
        assert_eq!(rabi.drift_timeout, Duration::seconds(900));
        assert_eq!(rabi.comparison_model.name(), "max_abs_deviation");

        let res = &nodes["resonator_spectroscopy"];
        assert_eq!(res.bad_data_threshold, 0.5);
        assert_eq!(res.comparison_model.name(), "normalized_rmse");

        assert_eq!(graph.roots_with_no_dependents(), vec!["rabi"]);
        assert_eq!(graph.dependencies_of("qubit_spectroscopy"), ["resonator_spectroscopy"]);
        assert_eq!(
            config.nodes[2].command.as_ref().unwrap().args,
            vec!["--fast".to_string()]
        );
    }

    #[test]
    fn test_build_rejects_bad_input() {
        let dup = r#"{"nodes": [{"id": "a"}, {"id": "a"}]}"#;
        assert!(matches!(
            SystemConfig::from_json(dup).unwrap().build(),
            Err(CalibrationError::Config(_))
        ));

        let unknown = r#"{"nodes": [{"id": "a", "depends_on": ["b"]}]}"#;
        assert!(matches!(
            SystemConfig::from_json(unknown).unwrap().build(),
            Err(CalibrationError::UnknownNode(ref id)) if id == "b"
        ));

        let cyclic = r#"{"nodes": [
            {"id": "a", "depends_on": ["b"]},
            {"id": "b", "depends_on": ["a"]}
        ]}"#;
        assert!(matches!(
            SystemConfig::from_json(cyclic).unwrap().build(),
            Err(CalibrationError::InvalidGraph { .. })
        ));

        let inverted =
            r#"{"nodes": [{"id": "a", "in_spec_threshold": 0.9, "bad_data_threshold": 0.1}]}"#;
        assert!(matches!(
            SystemConfig::from_json(inverted).unwrap().build(),
            Err(CalibrationError::InvalidThresholds { .. })
        ));

        assert!(matches!(SystemConfig::from_json("{"), Err(CalibrationError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = SystemConfig::load(file.path()).unwrap();
        assert_eq!(config.nodes.len(), 3);
        assert!(SystemConfig::load("/definitely/not/here.json").is_err());
    }
}
