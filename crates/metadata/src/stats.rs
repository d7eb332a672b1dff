//! Statistics key derivation and the token interning cache.

use emporium_core::reference::ArtifactRef;
use std::collections::HashMap;
use std::sync::RwLock;

/// Default number of tokens held per cache generation.
pub const DEFAULT_CACHE_LIMIT: usize = 1000;

/// Seconds per counter time bucket.
const BUCKET_SECONDS: i64 = 3600;

/// The counter time bucket for the given Unix timestamp.
pub fn time_bucket(unix_seconds: i64) -> i64 {
    unix_seconds.div_euclid(BUCKET_SECONDS)
}

/// Derive the stats key path for an entity and event kind.
///
/// The path is `[kind, series, name, user, revision]` with unspecified
/// components skipped, so counters roll up naturally from base identity
/// keys to fully qualified ones.
pub fn entity_stats_key(url: &ArtifactRef, kind: &str) -> Vec<String> {
    let mut key = vec![kind.to_string()];
    if !url.series.is_empty() {
        key.push(url.series.clone());
    }
    key.push(url.name.clone());
    if !url.user.is_empty() {
        key.push(url.user.clone());
    }
    if url.revision >= 0 {
        key.push(url.revision.to_string());
    }
    key
}

/// A process-wide two-generation cache of interned stats tokens.
///
/// Reads take the read lock. A miss falls through to the interning table
/// and the result is inserted under the write lock; when the new generation
/// fills up it becomes the old generation and the previous old generation
/// is dropped, so stale tokens age out without a full flush.
pub struct StatsCache {
    limit: usize,
    inner: RwLock<Generations>,
}

#[derive(Default)]
struct Generations {
    id_new: HashMap<String, i64>,
    id_old: HashMap<String, i64>,
    token_new: HashMap<i64, String>,
    token_old: HashMap<i64, String>,
}

impl StatsCache {
    /// Create a cache holding up to `limit` tokens per generation.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            inner: RwLock::new(Generations::default()),
        }
    }

    /// Look up the interned id for a token.
    pub fn id_for(&self, token: &str) -> Option<i64> {
        let gens = self.inner.read().expect("stats cache lock poisoned");
        gens.id_new
            .get(token)
            .or_else(|| gens.id_old.get(token))
            .copied()
    }

    /// Look up the token for an interned id.
    pub fn token_for(&self, id: i64) -> Option<String> {
        let gens = self.inner.read().expect("stats cache lock poisoned");
        gens.token_new
            .get(&id)
            .or_else(|| gens.token_old.get(&id))
            .cloned()
    }

    /// Record a token/id pair, rotating generations when full.
    pub fn insert(&self, token: &str, id: i64) {
        let mut gens = self.inner.write().expect("stats cache lock poisoned");
        if gens.id_new.len() >= self.limit {
            gens.id_old = std::mem::take(&mut gens.id_new);
            gens.token_old = std::mem::take(&mut gens.token_new);
        }
        gens.id_new.insert(token.to_string(), id);
        gens.token_new.insert(id, token.to_string());
    }
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_stats_key_skips_unspecified_components() {
        let full = ArtifactRef::parse("~joe/trusty/wordpress-3").unwrap();
        assert_eq!(
            entity_stats_key(&full, "archive-download"),
            vec!["archive-download", "trusty", "wordpress", "joe", "3"]
        );

        let base = full.base_ref();
        assert_eq!(
            entity_stats_key(&base, "archive-upload"),
            vec!["archive-upload", "wordpress", "joe"]
        );

        let bare = ArtifactRef::parse("trusty/wordpress").unwrap();
        assert_eq!(
            entity_stats_key(&bare, "archive-delete"),
            vec!["archive-delete", "trusty", "wordpress"]
        );
    }

    #[test]
    fn cache_hits_both_generations() {
        let cache = StatsCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // "c" rotates a+b into the old generation.
        cache.insert("c", 3);

        assert_eq!(cache.id_for("a"), Some(1));
        assert_eq!(cache.id_for("c"), Some(3));
        assert_eq!(cache.token_for(2), Some("b".to_string()));
    }

    #[test]
    fn cache_ages_out_after_two_rotations() {
        let cache = StatsCache::new(1);
        cache.insert("a", 1);
        cache.insert("b", 2); // a -> old
        cache.insert("c", 3); // b -> old, a dropped

        assert_eq!(cache.id_for("a"), None);
        assert_eq!(cache.id_for("b"), Some(2));
        assert_eq!(cache.id_for("c"), Some(3));
    }

    #[test]
    fn time_bucket_is_hourly() {
        assert_eq!(time_bucket(0), 0);
        assert_eq!(time_bucket(3599), 0);
        assert_eq!(time_bucket(3600), 1);
        assert_eq!(time_bucket(-1), -1);
    }
}
