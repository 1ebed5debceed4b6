mod monitor;
mod types;

pub use monitor::{ExecutionMonitor, EXECUTION_CHANNEL};
pub use types::{ExecutionStatus, ExecutionUpdate};
