use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Lifecycle state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[serde(alias = "pending")]
    Queued,
    #[serde(alias = "running", alias = "in_progress")]
    Processing,
    Completed,
    Failed,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// No further state changes happen after a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Status of a single run. Values outside the batch vocabulary (for example
/// `initializing`) are kept verbatim instead of failing the whole body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunStatus {
    Known(BatchStatus),
    Other(String),
}

impl RunStatus {
    pub fn known(&self) -> Option<BatchStatus> {
        match self {
            Self::Known(status) => Some(*status),
            Self::Other(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Known(status) => status.as_str(),
            Self::Other(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.known().is_some_and(|status| status.is_terminal())
    }
}

impl From<BatchStatus> for RunStatus {
    fn from(status: BatchStatus) -> Self {
        Self::Known(status)
    }
}

/// Body of `GET /runs/bulk/{batchId}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusResponse {
    pub batch_id: String,
    pub status: BatchStatus,
    #[serde(default)]
    pub runs: Vec<RunStatusEntry>,
    #[serde(default)]
    pub metadata: Option<BatchStatusMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusEntry {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub pr_url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusMetadata {
    #[serde(default)]
    pub total_runs: usize,
    #[serde(default)]
    pub completed: usize,
    #[serde(default)]
    pub processing: usize,
    #[serde(default)]
    pub queued: usize,
    #[serde(default)]
    pub failed: usize,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub estimated_completion_time: Option<OffsetDateTime>,
}
