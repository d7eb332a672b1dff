//! Log repository.

use crate::error::MetadataResult;
use crate::models::{LogLevel, LogRow};
use async_trait::async_trait;
use emporium_core::reference::ArtifactRef;

/// Repository for structured log records.
#[async_trait]
pub trait LogRepo: Send + Sync {
    /// Add a log record associated with the given refs. Each ref is indexed
    /// along with its base ref, deduplicated.
    async fn add_log(
        &self,
        level: LogLevel,
        kind: &str,
        data: &serde_json::Value,
        urls: &[ArtifactRef],
    ) -> MetadataResult<()>;

    /// Find log records associated with the given ref, newest first.
    async fn find_logs(&self, url: &ArtifactRef) -> MetadataResult<Vec<LogRow>>;
}
