pub mod error;
pub mod clock;
pub mod comparison;
pub mod node;
pub mod graph;
pub mod traits;
pub mod controller;
pub mod outputs;
pub mod config;
pub mod executor;
pub mod store;

pub use controller::{CalibrationController, CancelFlag, RunStats};
pub use error::{CalibrationError, Result};
pub use graph::CalibrationGraph;
pub use node::{CalibrationNode, NodeRegistry, Verdict};
pub use outputs::CalibrationOutputs;
