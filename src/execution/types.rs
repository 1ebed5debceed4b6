use serde::{Deserialize, Serialize};

/// Lifecycle status of a monitored execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    /// Status introduced by a newer server
    #[serde(other)]
    Unknown,
}

impl ExecutionStatus {
    /// No further updates are expected after a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Progress report carried by an `execution_update` envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionUpdate {
    pub execution_id: String,
    pub status: ExecutionStatus,
    /// Completion fraction in `[0, 1]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Milliseconds since epoch; the envelope timestamp when absent
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
}
