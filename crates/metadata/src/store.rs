//! Metadata store trait and SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{BaseEntityRepo, EntityRepo, LogRepo, StatsRepo};
use crate::stats::StatsCache;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    EntityRepo + BaseEntityRepo + LogRepo + StatsRepo + Send + Sync
{
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
    stats_cache: StatsCache,
}

impl SqliteStore {
    /// Create a new SQLite store, running migrations.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MetadataError::Config(format!("cannot create {parent:?}: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures under load.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self {
            pool,
            stats_cache: StatsCache::default(),
        };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    url TEXT PRIMARY KEY,
    base_url TEXT NOT NULL,
    user TEXT NOT NULL,
    name TEXT NOT NULL,
    series TEXT NOT NULL,
    revision INTEGER NOT NULL,
    blob_name TEXT NOT NULL,
    blob_hash TEXT NOT NULL,
    size INTEGER NOT NULL,
    upload_time TEXT NOT NULL,
    charm_meta TEXT,
    charm_config TEXT,
    charm_actions TEXT,
    charm_provided_interfaces TEXT,
    charm_required_interfaces TEXT,
    bundle_data TEXT,
    bundle_readme TEXT,
    bundle_charms TEXT,
    bundle_unit_count INTEGER,
    bundle_machine_count INTEGER,
    contents TEXT NOT NULL DEFAULT '{}',
    promulgated_url TEXT,
    promulgated_revision INTEGER NOT NULL DEFAULT -1
);
CREATE INDEX IF NOT EXISTS idx_entities_base_url ON entities(base_url);
CREATE INDEX IF NOT EXISTS idx_entities_upload_time ON entities(upload_time);
CREATE INDEX IF NOT EXISTS idx_entities_promulgated
    ON entities(name, series, promulgated_revision);

CREATE TABLE IF NOT EXISTS base_entities (
    url TEXT PRIMARY KEY,
    user TEXT NOT NULL,
    name TEXT NOT NULL,
    public INTEGER NOT NULL DEFAULT 1,
    acls TEXT NOT NULL DEFAULT '{"read":[],"write":[]}',
    promulgated INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_base_entities_public ON base_entities(public);

CREATE TABLE IF NOT EXISTS logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    data TEXT NOT NULL,
    level TEXT NOT NULL,
    kind TEXT NOT NULL,
    time TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS log_refs (
    log_id INTEGER NOT NULL REFERENCES logs(id) ON DELETE CASCADE,
    url TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_log_refs_url ON log_refs(url);

CREATE TABLE IF NOT EXISTS stat_tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    token TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS stat_counters (
    key TEXT NOT NULL,
    time_bucket INTEGER NOT NULL,
    count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (key, time_bucket)
);

CREATE TABLE IF NOT EXISTS migrations (
    name TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL
);
"#;

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        sqlx::query(
            "INSERT INTO migrations (name, applied_at) VALUES (?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind("schema-v1")
        .bind(time::OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// Repository implementations for SqliteStore.
mod sqlite_impl {
    use super::*;
    use crate::models::{BaseEntityRow, EntityRow, LogLevel, LogRow};
    use crate::stats::time_bucket;
    use emporium_core::reference::ArtifactRef;
    use emporium_core::zipfile::{CachedZipFile, FileId};

    #[async_trait]
    impl EntityRepo for SqliteStore {
        async fn insert_entity(
            &self,
            entity: &EntityRow,
            base: &BaseEntityRow,
        ) -> MetadataResult<()> {
            sqlx::query(
                "INSERT INTO base_entities (url, user, name, public, acls, promulgated)
                 VALUES (?, ?, ?, ?, ?, ?)
                 ON CONFLICT(url) DO NOTHING",
            )
            .bind(&base.url)
            .bind(&base.user)
            .bind(&base.name)
            .bind(base.public)
            .bind(&base.acls)
            .bind(base.promulgated)
            .execute(&self.pool)
            .await?;

            sqlx::query(
                "INSERT INTO entities (
                    url, base_url, user, name, series, revision,
                    blob_name, blob_hash, size, upload_time,
                    charm_meta, charm_config, charm_actions,
                    charm_provided_interfaces, charm_required_interfaces,
                    bundle_data, bundle_readme, bundle_charms,
                    bundle_unit_count, bundle_machine_count,
                    contents, promulgated_url, promulgated_revision
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&entity.url)
            .bind(&entity.base_url)
            .bind(&entity.user)
            .bind(&entity.name)
            .bind(&entity.series)
            .bind(entity.revision)
            .bind(&entity.blob_name)
            .bind(&entity.blob_hash)
            .bind(entity.size)
            .bind(entity.upload_time)
            .bind(&entity.charm_meta)
            .bind(&entity.charm_config)
            .bind(&entity.charm_actions)
            .bind(&entity.charm_provided_interfaces)
            .bind(&entity.charm_required_interfaces)
            .bind(&entity.bundle_data)
            .bind(&entity.bundle_readme)
            .bind(&entity.bundle_charms)
            .bind(entity.bundle_unit_count)
            .bind(entity.bundle_machine_count)
            .bind(&entity.contents)
            .bind(&entity.promulgated_url)
            .bind(entity.promulgated_revision)
            .execute(&self.pool)
            .await
            .map_err(|e| MetadataError::from_insert(e, &entity.url))?;

            Ok(())
        }

        async fn find_entity(&self, url: &ArtifactRef) -> MetadataResult<EntityRow> {
            if !url.is_fully_qualified() {
                return Err(MetadataError::NotFullyQualified(url.to_string()));
            }
            sqlx::query_as::<_, EntityRow>("SELECT * FROM entities WHERE url = ?")
                .bind(url.to_string())
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| MetadataError::NotFound(format!("entity {url} not found")))
        }

        async fn find_entities(&self, pattern: &ArtifactRef) -> MetadataResult<Vec<EntityRow>> {
            if pattern.is_fully_qualified() {
                let row =
                    sqlx::query_as::<_, EntityRow>("SELECT * FROM entities WHERE url = ?")
                        .bind(pattern.to_string())
                        .fetch_optional(&self.pool)
                        .await?;
                return Ok(row.into_iter().collect());
            }
            let rows = sqlx::query_as::<_, EntityRow>(
                "SELECT * FROM entities WHERE base_url = ? ORDER BY series, revision",
            )
            .bind(pattern.base_ref().to_string())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows
                .into_iter()
                .filter(|row| row.artifact_ref().matches(pattern))
                .collect())
        }

        async fn expand(&self, pattern: &ArtifactRef) -> MetadataResult<Vec<ArtifactRef>> {
            let entities = self.find_entities(pattern).await?;
            Ok(entities.iter().map(|e| e.artifact_ref()).collect())
        }

        async fn remove_entity(&self, url: &ArtifactRef) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM entities WHERE url = ?")
                .bind(url.to_string())
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("entity {url} not found")));
            }
            Ok(())
        }

        async fn update_cached_file(
            &self,
            url: &ArtifactRef,
            file_id: FileId,
            zipf: &CachedZipFile,
        ) -> MetadataResult<()> {
            let locator = serde_json::to_string(zipf)
                .map_err(|e| MetadataError::Internal(format!("cannot encode locator: {e}")))?;
            let result = sqlx::query(
                "UPDATE entities SET contents = json_set(contents, ?, json(?)) WHERE url = ?",
            )
            .bind(format!("$.{}", file_id.as_str()))
            .bind(locator)
            .bind(url.to_string())
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("entity {url} not found")));
            }
            Ok(())
        }

        async fn latest_promulgated_revision(
            &self,
            name: &str,
            series: &str,
        ) -> MetadataResult<Option<i64>> {
            let max: Option<i64> = sqlx::query_scalar(
                "SELECT MAX(promulgated_revision) FROM entities
                 WHERE name = ? AND series = ? AND promulgated_revision >= 0",
            )
            .bind(name)
            .bind(series)
            .fetch_one(&self.pool)
            .await?;
            Ok(max)
        }
    }

    #[async_trait]
    impl BaseEntityRepo for SqliteStore {
        async fn find_base_entity(&self, url: &ArtifactRef) -> MetadataResult<BaseEntityRow> {
            let base_url = url.base_ref().to_string();
            sqlx::query_as::<_, BaseEntityRow>("SELECT * FROM base_entities WHERE url = ?")
                .bind(&base_url)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| {
                    MetadataError::NotFound(format!("base entity {base_url} not found"))
                })
        }

        async fn set_promulgated(
            &self,
            url: &ArtifactRef,
            promulgated: bool,
        ) -> MetadataResult<()> {
            let base_url = url.base_ref().to_string();
            let result = sqlx::query("UPDATE base_entities SET promulgated = ? WHERE url = ?")
                .bind(promulgated)
                .bind(&base_url)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "base entity {base_url} not found"
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl LogRepo for SqliteStore {
        async fn add_log(
            &self,
            level: LogLevel,
            kind: &str,
            data: &serde_json::Value,
            urls: &[ArtifactRef],
        ) -> MetadataResult<()> {
            let body = serde_json::to_string(data)
                .map_err(|e| MetadataError::Internal(format!("cannot encode log data: {e}")))?;
            let result =
                sqlx::query("INSERT INTO logs (data, level, kind, time) VALUES (?, ?, ?, ?)")
                    .bind(body)
                    .bind(level.as_str())
                    .bind(kind)
                    .bind(time::OffsetDateTime::now_utc())
                    .execute(&self.pool)
                    .await?;
            let log_id = result.last_insert_rowid();

            // Index each url and its base url, deduplicated, keeping order.
            let mut seen = Vec::new();
            for url in urls {
                for candidate in [url.to_string(), url.base_ref().to_string()] {
                    if !seen.contains(&candidate) {
                        seen.push(candidate);
                    }
                }
            }
            for url in seen {
                sqlx::query("INSERT INTO log_refs (log_id, url) VALUES (?, ?)")
                    .bind(log_id)
                    .bind(url)
                    .execute(&self.pool)
                    .await?;
            }
            Ok(())
        }

        async fn find_logs(&self, url: &ArtifactRef) -> MetadataResult<Vec<LogRow>> {
            let rows = sqlx::query_as::<_, LogRow>(
                "SELECT l.id, l.data, l.level, l.kind, l.time FROM logs l
                 JOIN log_refs r ON r.log_id = l.id
                 WHERE r.url = ? ORDER BY l.id DESC",
            )
            .bind(url.to_string())
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    impl SqliteStore {
        /// Intern a token, inserting it into the table on first use.
        async fn intern_token(&self, token: &str) -> MetadataResult<i64> {
            if let Some(id) = self.stats_cache.id_for(token) {
                return Ok(id);
            }
            // INSERT OR IGNORE + SELECT handles concurrent interning of the
            // same token.
            sqlx::query("INSERT OR IGNORE INTO stat_tokens (token) VALUES (?)")
                .bind(token)
                .execute(&self.pool)
                .await?;
            let id: i64 = sqlx::query_scalar("SELECT id FROM stat_tokens WHERE token = ?")
                .bind(token)
                .fetch_one(&self.pool)
                .await?;
            self.stats_cache.insert(token, id);
            Ok(id)
        }

        /// Look up an already-interned token without inserting.
        async fn lookup_token(&self, token: &str) -> MetadataResult<Option<i64>> {
            if let Some(id) = self.stats_cache.id_for(token) {
                return Ok(Some(id));
            }
            let id: Option<i64> = sqlx::query_scalar("SELECT id FROM stat_tokens WHERE token = ?")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(id) = id {
                self.stats_cache.insert(token, id);
            }
            Ok(id)
        }
    }

    #[async_trait]
    impl StatsRepo for SqliteStore {
        async fn increment_counter(&self, key: &[String]) -> MetadataResult<()> {
            let mut ids = Vec::with_capacity(key.len());
            for token in key {
                ids.push(self.intern_token(token).await?.to_string());
            }
            let key = ids.join(":");
            let bucket = time_bucket(time::OffsetDateTime::now_utc().unix_timestamp());
            sqlx::query(
                "INSERT INTO stat_counters (key, time_bucket, count) VALUES (?, ?, 1)
                 ON CONFLICT(key, time_bucket) DO UPDATE SET count = count + 1",
            )
            .bind(key)
            .bind(bucket)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn counter_total(&self, key: &[String]) -> MetadataResult<i64> {
            let mut ids = Vec::with_capacity(key.len());
            for token in key {
                match self.lookup_token(token).await? {
                    Some(id) => ids.push(id.to_string()),
                    None => return Ok(0),
                }
            }
            let key = ids.join(":");
            let total: i64 = sqlx::query_scalar(
                "SELECT COALESCE(SUM(count), 0) FROM stat_counters
                 WHERE key = ? OR key LIKE ? || ':%'",
            )
            .bind(&key)
            .bind(&key)
            .fetch_one(&self.pool)
            .await?;
            Ok(total)
        }
    }
}
