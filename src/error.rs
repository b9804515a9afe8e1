use thiserror::Error;

/// Errors raised by graph construction and the reconciliation run.
#[derive(Debug, Error)]
pub enum CalibrationError {
    /// The dependency edges contain a cycle; the listed ids form it.
    #[error("invalid calibration graph: cycle through [{}]", .cycle.join(" -> "))]
    InvalidGraph { cycle: Vec<String> },

    #[error("unknown calibration node '{0}'")]
    UnknownNode(String),

    #[error("node '{node}': in_spec_threshold {in_spec} exceeds bad_data_threshold {bad_data}")]
    InvalidThresholds {
        node: String,
        in_spec: f64,
        bad_data: f64,
    },

    /// The measurement collaborator failed. Never retried here.
    #[error("measurement failed on node '{node}': {source}")]
    Measurement {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("platform store failed: {source}")]
    Platform {
        #[source]
        source: anyhow::Error,
    },

    #[error("calibration run cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, CalibrationError>;
