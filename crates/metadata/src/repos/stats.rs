//! Statistics repository.

use crate::error::MetadataResult;
use async_trait::async_trait;

/// Repository for token-interned statistics counters.
///
/// A counter key is a path of words (the event kind followed by the entity
/// identity components). Each word is interned to a small integer id so the
/// persisted key stays compact; implementations front the interning table
/// with the in-memory [`crate::stats::StatsCache`].
#[async_trait]
pub trait StatsRepo: Send + Sync {
    /// Increment the counter for the given key path in the current time
    /// bucket.
    async fn increment_counter(&self, key: &[String]) -> MetadataResult<()>;

    /// Sum the counters for the given key path and everything below it
    /// across all time buckets, so a base-identity key rolls up its
    /// per-revision counters. Returns 0 when any component has never been
    /// interned.
    async fn counter_total(&self, key: &[String]) -> MetadataResult<i64>;
}
