use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Repository addressing accepted by `POST /runs/bulk`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepositoryRef {
    #[serde(rename = "repositoryName")]
    Name(String),
    #[serde(rename = "repoId")]
    Id(String),
}

impl RepositoryRef {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Name(value) | Self::Id(value) => value,
        }
    }
}

/// Request body for `POST /runs/bulk`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRunsRequest {
    #[serde(flatten)]
    pub repository: RepositoryRef,
    pub run_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_title: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub force: bool,
    pub runs: Vec<BulkRunItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRunItem {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Target branch for the run's changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
}

/// `{ "data": ... }` wrapper used by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

/// Accepts both enveloped and bare bodies.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum MaybeEnveloped<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> MaybeEnveloped<T> {
    pub(crate) fn into_inner(self) -> T {
        match self {
            Self::Wrapped { data } | Self::Bare(data) => data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCreateData {
    pub batch_id: String,
    #[serde(default)]
    pub batch_title: Option<String>,
    #[serde(default)]
    pub successful: Vec<CreatedRun>,
    #[serde(default)]
    pub failed: Vec<FailedRun>,
    #[serde(default)]
    pub metadata: Option<BulkMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRun {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub repository_name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub request_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedRun {
    pub request_index: usize,
    #[serde(default)]
    pub prompt: Option<String>,
    /// Machine-readable code such as `DUPLICATE_RUN`.
    pub error: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub existing_run_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkMetadata {
    pub total_requested: usize,
    pub total_successful: usize,
    pub total_failed: usize,
}

/// Parsed `POST /runs/bulk` response with the HTTP status that carried it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkCreateResponse {
    pub status: u16,
    pub data: BulkCreateData,
}

impl BulkCreateResponse {
    /// `207 Multi-Status`: some items are still being processed server-side.
    pub fn is_multi_status(&self) -> bool {
        self.status == 207
    }
}
