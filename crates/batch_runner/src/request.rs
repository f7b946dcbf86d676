use runs_api::{BulkRunItem, BulkRunsRequest, RepositoryRef};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::BatchError;

/// Upper bound on runs per bulk request.
pub const MAX_BATCH_SIZE: usize = 40;

/// Run type used when callers do not pick one.
pub const DEFAULT_RUN_TYPE: &str = "code";

/// One run definition. Fields are fixed at construction; builders return a
/// new item with a recomputed content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunItem {
    prompt: String,
    title: Option<String>,
    target_branch: Option<String>,
    context: Option<String>,
    content_hash: String,
}

impl RunItem {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self::build(prompt.into(), None, None, None)
    }

    #[must_use]
    pub fn with_title(self, title: impl Into<String>) -> Self {
        Self::build(self.prompt, Some(title.into()), self.target_branch, self.context)
    }

    #[must_use]
    pub fn with_target_branch(self, branch: impl Into<String>) -> Self {
        Self::build(self.prompt, self.title, Some(branch.into()), self.context)
    }

    #[must_use]
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::build(self.prompt, self.title, self.target_branch, Some(context.into()))
    }

    fn build(
        prompt: String,
        title: Option<String>,
        target_branch: Option<String>,
        context: Option<String>,
    ) -> Self {
        let content_hash = content_hash(
            &prompt,
            title.as_deref(),
            target_branch.as_deref(),
            context.as_deref(),
        );
        Self {
            prompt,
            title,
            target_branch,
            context,
            content_hash,
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn target_branch(&self) -> Option<&str> {
        self.target_branch.as_deref()
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Lowercase hex SHA-256 used by the service for duplicate detection.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    fn to_wire(&self) -> BulkRunItem {
        BulkRunItem {
            prompt: self.prompt.clone(),
            title: self.title.clone(),
            target: self.target_branch.clone(),
            context: self.context.clone(),
            file_hash: Some(self.content_hash.clone()),
        }
    }
}

fn content_hash(
    prompt: &str,
    title: Option<&str>,
    target_branch: Option<&str>,
    context: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    for field in [title, target_branch, context] {
        // Separator plus presence marker keeps `None` and `Some("")` distinct.
        match field {
            Some(value) => {
                hasher.update([0x1f, 1]);
                hasher.update(value.as_bytes());
            }
            None => hasher.update([0x1f, 0]),
        }
    }
    hex::encode(hasher.finalize())
}

/// A set of runs submitted together against one repository.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub repository: RepositoryRef,
    pub run_type: String,
    pub source_branch: Option<String>,
    pub batch_title: Option<String>,
    /// Submit even when the service reports duplicates.
    pub force: bool,
    pub items: Vec<RunItem>,
    pub options: Option<Value>,
}

impl BatchRequest {
    pub fn new(repository: RepositoryRef, items: Vec<RunItem>) -> Self {
        Self {
            repository,
            run_type: DEFAULT_RUN_TYPE.to_owned(),
            source_branch: None,
            batch_title: None,
            force: false,
            items,
            options: None,
        }
    }

    #[must_use]
    pub fn with_run_type(mut self, run_type: impl Into<String>) -> Self {
        self.run_type = run_type.into();
        self
    }

    #[must_use]
    pub fn with_source_branch(mut self, branch: impl Into<String>) -> Self {
        self.source_branch = Some(branch.into());
        self
    }

    #[must_use]
    pub fn with_batch_title(mut self, title: impl Into<String>) -> Self {
        self.batch_title = Some(title.into());
        self
    }

    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Checks local invariants; runs before any request is sent.
    pub fn validate(&self) -> Result<(), BatchError> {
        if self.repository.as_str().trim().is_empty() {
            return Err(BatchError::MissingRepository);
        }
        if self.items.is_empty() {
            return Err(BatchError::EmptyBatch);
        }
        if self.items.len() > MAX_BATCH_SIZE {
            return Err(BatchError::TooManyItems {
                count: self.items.len(),
                max: MAX_BATCH_SIZE,
            });
        }
        if let Some(index) = self
            .items
            .iter()
            .position(|item| item.prompt.trim().is_empty())
        {
            return Err(BatchError::EmptyPrompt { index });
        }
        Ok(())
    }

    pub fn to_wire(&self) -> BulkRunsRequest {
        BulkRunsRequest {
            repository: self.repository.clone(),
            run_type: self.run_type.clone(),
            source_branch: self.source_branch.clone(),
            batch_title: self.batch_title.clone(),
            force: self.force,
            runs: self.items.iter().map(RunItem::to_wire).collect(),
            options: self.options.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> RepositoryRef {
        RepositoryRef::Name("acme/widgets".to_owned())
    }

    #[test]
    fn content_hash_is_stable_hex_and_field_sensitive() {
        let plain = RunItem::new("fix the build");
        assert_eq!(plain.content_hash().len(), 64);
        assert!(plain
            .content_hash()
            .chars()
            .all(|ch| ch.is_ascii_hexdigit() && !ch.is_ascii_uppercase()));
        assert_eq!(plain.content_hash(), RunItem::new("fix the build").content_hash());

        let titled = plain.clone().with_title("build");
        assert_ne!(plain.content_hash(), titled.content_hash());
        assert_ne!(
            RunItem::new("x").with_title("").content_hash(),
            RunItem::new("x").content_hash()
        );
        assert_ne!(
            RunItem::new("x").with_title("a").content_hash(),
            RunItem::new("x").with_context("a").content_hash()
        );
    }

    #[test]
    fn validation_rejects_empty_oversized_and_blank_batches() {
        assert!(matches!(
            BatchRequest::new(repo(), Vec::new()).validate(),
            Err(BatchError::EmptyBatch)
        ));

        let oversized = (0..=MAX_BATCH_SIZE)
            .map(|index| RunItem::new(format!("task {index}")))
            .collect();
        assert!(matches!(
            BatchRequest::new(repo(), oversized).validate(),
            Err(BatchError::TooManyItems { count: 41, max: 40 })
        ));

        let blank = vec![RunItem::new("ok"), RunItem::new("   ")];
        assert!(matches!(
            BatchRequest::new(repo(), blank).validate(),
            Err(BatchError::EmptyPrompt { index: 1 })
        ));

        let no_repo = BatchRequest::new(RepositoryRef::Id(" ".to_owned()), vec![RunItem::new("a")]);
        assert!(matches!(no_repo.validate(), Err(BatchError::MissingRepository)));

        let full = (0..MAX_BATCH_SIZE)
            .map(|index| RunItem::new(format!("task {index}")))
            .collect();
        assert!(BatchRequest::new(repo(), full).validate().is_ok());
    }

    #[test]
    fn wire_request_carries_hashes_and_targets() {
        let request = BatchRequest::new(
            repo(),
            vec![RunItem::new("a").with_target_branch("feature/a")],
        )
        .with_source_branch("main")
        .with_force(true);

        let wire = request.to_wire();
        assert_eq!(wire.run_type, DEFAULT_RUN_TYPE);
        assert_eq!(wire.source_branch.as_deref(), Some("main"));
        assert!(wire.force);
        assert_eq!(wire.runs[0].target.as_deref(), Some("feature/a"));
        assert_eq!(
            wire.runs[0].file_hash.as_deref(),
            Some(request.items[0].content_hash())
        );
    }
}
