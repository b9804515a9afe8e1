//! Calibration node state and the result bundles it carries between runs.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::comparison::ComparisonModel;
use crate::error::{CalibrationError, Result};

/// Node id -> node. Owned by the controller for the whole run.
pub type NodeRegistry = BTreeMap<String, CalibrationNode>;

/// Paired sample positions and values used to compare two probe runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckParameters {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

/// One value to push to the platform: `alias.parameter[index] = value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformParameter {
    pub alias: String,
    pub parameter: String,
    pub value: f64,
    #[serde(default)]
    pub index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fidelity {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub index: Option<u32>,
}

/// Result bundle produced by a full sweep or a validation probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputParameters {
    pub check_parameters: CheckParameters,
    #[serde(default)]
    pub platform_parameters: Vec<PlatformParameter>,
    #[serde(default)]
    pub fidelities: Vec<Fidelity>,
}

/// What a measurement call hands back: when it finished and what it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub output_parameters: Option<OutputParameters>,
}

/// Outcome of a validation probe, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    InSpec,
    OutOfSpec,
    BadData,
}

impl Verdict {
    /// Scores sitting exactly on a threshold fall in the lower zone.
    pub fn from_score(score: f64, in_spec_threshold: f64, bad_data_threshold: f64) -> Self {
        if score <= in_spec_threshold {
            Verdict::InSpec
        } else if score <= bad_data_threshold {
            Verdict::OutOfSpec
        } else {
            // NaN ends up here as well
            Verdict::BadData
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::InSpec => "in_spec",
            Verdict::OutOfSpec => "out_of_spec",
            Verdict::BadData => "bad_data",
        };
        f.write_str(s)
    }
}

/// Mutable state of a single calibration procedure.
pub struct CalibrationNode {
    pub id: String,
    pub in_spec_threshold: f64,
    pub bad_data_threshold: f64,
    /// How long a passing result may be trusted without re-validation.
    pub drift_timeout: Duration,
    pub comparison_model: Box<dyn ComparisonModel>,
    /// Last successful full sweep or in-spec probe. `None` = never calibrated.
    pub previous_timestamp: Option<DateTime<Utc>>,
    pub output_parameters: Option<OutputParameters>,
    /// Baseline the next probe is compared against.
    pub previous_output_parameters: Option<OutputParameters>,
    /// Bundle of the last full sweep. Probes never overwrite it.
    pub calibrated_parameters: Option<OutputParameters>,
    pub calibrated_at: Option<DateTime<Utc>>,
}

impl CalibrationNode {
    pub fn new(
        id: impl Into<String>,
        in_spec_threshold: f64,
        bad_data_threshold: f64,
        drift_timeout: Duration,
        comparison_model: Box<dyn ComparisonModel>,
    ) -> Result<Self> {
        let id = id.into();
        if in_spec_threshold.is_nan()
            || bad_data_threshold.is_nan()
            || in_spec_threshold > bad_data_threshold
        {
            return Err(CalibrationError::InvalidThresholds {
                node: id,
                in_spec: in_spec_threshold,
                bad_data: bad_data_threshold,
            });
        }

        Ok(CalibrationNode {
            id,
            in_spec_threshold,
            bad_data_threshold,
            drift_timeout,
            comparison_model,
            previous_timestamp: None,
            output_parameters: None,
            previous_output_parameters: None,
            calibrated_parameters: None,
            calibrated_at: None,
        })
    }

    /// Seed a node with state carried over from an earlier session.
    pub fn with_history(
        mut self,
        previous_timestamp: DateTime<Utc>,
        baseline: Option<OutputParameters>,
    ) -> Self {
        self.previous_timestamp = Some(previous_timestamp);
        self.previous_output_parameters = baseline;
        self
    }

    pub fn classify(&self, score: f64) -> Verdict {
        Verdict::from_score(score, self.in_spec_threshold, self.bad_data_threshold)
    }

    /// Compare a new probe bundle against the trusted baseline.
    /// Returns `None` when either side is missing.
    pub fn score(&self, observed: Option<&OutputParameters>) -> Option<f64> {
        let observed = observed?;
        let baseline = self.previous_output_parameters.as_ref()?;
        Some(
            self.comparison_model
                .compare(&observed.check_parameters, &baseline.check_parameters),
        )
    }

    /// Record a full sweep: the bundle becomes both the current output and
    /// the calibrated operating point.
    pub fn record_sweep(&mut self, measurement: Measurement) {
        self.previous_timestamp = Some(measurement.timestamp);
        self.calibrated_at = Some(measurement.timestamp);
        self.calibrated_parameters = measurement.output_parameters.clone();
        self.output_parameters = measurement.output_parameters;
    }
}

impl fmt::Debug for CalibrationNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CalibrationNode")
            .field("id", &self.id)
            .field("in_spec_threshold", &self.in_spec_threshold)
            .field("bad_data_threshold", &self.bad_data_threshold)
            .field("drift_timeout", &self.drift_timeout)
            .field("comparison_model", &self.comparison_model.name())
            .field("previous_timestamp", &self.previous_timestamp)
            .field("calibrated_at", &self.calibrated_at)
            .finish_non_exhaustive()
    }
}
