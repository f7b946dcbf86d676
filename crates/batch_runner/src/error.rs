use runs_api::RunsApiError;
use thiserror::Error;

use crate::submitter::BatchSubmissionResult;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("batch has no runs")]
    EmptyBatch,

    #[error("batch has {count} runs; at most {max} are allowed")]
    TooManyItems { count: usize, max: usize },

    #[error("run {index} has an empty prompt")]
    EmptyPrompt { index: usize },

    #[error("repository identifier is empty")]
    MissingRepository,

    /// Polling ended on an error after the batch was created.
    #[error("status polling for batch {batch_id} failed: {source}")]
    Polling {
        batch_id: String,
        /// Per-item outcomes of the submission that preceded the failure.
        submission: Box<BatchSubmissionResult>,
        #[source]
        source: RunsApiError,
    },

    #[error(transparent)]
    Api(#[from] RunsApiError),
}

impl BatchError {
    /// The underlying service error, if this failure came from the service.
    pub fn api_error(&self) -> Option<&RunsApiError> {
        match self {
            Self::Api(error) | Self::Polling { source: error, .. } => Some(error),
            _ => None,
        }
    }

    /// Submission outcomes, when the batch was created before the failure.
    pub fn submission(&self) -> Option<&BatchSubmissionResult> {
        match self {
            Self::Polling { submission, .. } => Some(submission.as_ref()),
            _ => None,
        }
    }

    /// True for failures detected locally before any request was sent.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyBatch
                | Self::TooManyItems { .. }
                | Self::EmptyPrompt { .. }
                | Self::MissingRepository
        )
    }
}
