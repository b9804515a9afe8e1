use anyhow::Result;

use crate::node::Measurement;

/// Runs the physical procedure behind a calibration node.
///
/// Both calls block until the measurement finishes, which can take minutes.
/// Retrying is the implementor's business.
#[cfg_attr(test, mockall::automock)]
pub trait MeasurementExecutor {
    /// Full calibration sweep; refreshes the node's operating point.
    fn run_full_sweep(&mut self, node_id: &str) -> Result<Measurement>;

    /// Reduced validation probe used to check the trusted baseline.
    fn run_validation_probe(&mut self, node_id: &str) -> Result<Measurement>;
}

/// Target platform that receives calibrated parameters.
#[cfg_attr(test, mockall::automock)]
pub trait PlatformStore {
    fn set_parameter(
        &mut self,
        alias: &str,
        parameter: &str,
        value: f64,
        index: Option<u32>,
    ) -> Result<()>;

    /// Persist the current platform state. Called once per parameter update.
    fn save(&mut self) -> Result<()> { Ok(()) }
}
