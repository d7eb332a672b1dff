//! Database models mapping to the metadata schema.

use emporium_core::bundle::BundleData;
use emporium_core::charm::{CharmActions, CharmConfig, CharmMetadata};
use emporium_core::reference::ArtifactRef;
use emporium_core::zipfile::CachedZipFile;
use emporium_core::{BlobHash, CharmView};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
pub use sqlx::types::Json;
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// One immutable metadata record per uploaded archive revision.
///
/// `url` is the canonical fully qualified ref string and the primary key;
/// `base_url` is the family key. Exactly one of the charm or bundle document
/// groups is populated, depending on the ref's series.
#[derive(Debug, Clone, FromRow)]
pub struct EntityRow {
    pub url: String,
    pub base_url: String,
    pub user: String,
    pub name: String,
    pub series: String,
    pub revision: i64,
    pub blob_name: String,
    pub blob_hash: String,
    pub size: i64,
    pub upload_time: OffsetDateTime,
    pub charm_meta: Option<Json<CharmMetadata>>,
    pub charm_config: Option<Json<CharmConfig>>,
    pub charm_actions: Option<Json<CharmActions>>,
    pub charm_provided_interfaces: Option<Json<Vec<String>>>,
    pub charm_required_interfaces: Option<Json<Vec<String>>>,
    pub bundle_data: Option<Json<BundleData>>,
    pub bundle_readme: Option<String>,
    pub bundle_charms: Option<Json<Vec<String>>>,
    pub bundle_unit_count: Option<i64>,
    pub bundle_machine_count: Option<i64>,
    /// Cached interior-file locators keyed by well-known file id.
    pub contents: Json<BTreeMap<String, CachedZipFile>>,
    pub promulgated_url: Option<String>,
    /// -1 when the entity is not promulgated.
    pub promulgated_revision: i64,
}

impl EntityRow {
    /// The parsed primary-key ref.
    pub fn artifact_ref(&self) -> ArtifactRef {
        ArtifactRef {
            user: self.user.clone(),
            name: self.name.clone(),
            series: self.series.clone(),
            revision: self.revision,
        }
    }

    /// The stored blob hash, parsed.
    pub fn parsed_blob_hash(&self) -> Option<BlobHash> {
        BlobHash::from_hex(&self.blob_hash).ok()
    }

    /// Whether this entity is a bundle.
    pub fn is_bundle(&self) -> bool {
        self.series == emporium_core::BUNDLE_SERIES
    }

    /// The cached locator for a well-known file, if any was recorded.
    pub fn cached_file(&self, file_id: emporium_core::FileId) -> Option<&CachedZipFile> {
        self.contents.0.get(file_id.as_str())
    }

    /// A bundle-verification view of this charm entity.
    pub fn charm_view(&self) -> Option<CharmView> {
        let meta = self.charm_meta.as_ref()?;
        Some(CharmView {
            meta: meta.0.clone(),
            config: self.charm_config.as_ref().map(|j| j.0.clone()),
            actions: self.charm_actions.as_ref().map(|j| j.0.clone()),
            revision: self.revision,
        })
    }
}

/// Access control lists stored on a base entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Acl {
    pub read: Vec<String>,
    pub write: Vec<String>,
}

/// One record per base ref, created on first entity insert.
#[derive(Debug, Clone, FromRow)]
pub struct BaseEntityRow {
    pub url: String,
    pub user: String,
    pub name: String,
    pub public: bool,
    pub acls: Json<Acl>,
    pub promulgated: bool,
}

/// A structured log record associated with a set of refs.
#[derive(Debug, Clone, FromRow)]
pub struct LogRow {
    pub id: i64,
    pub data: Json<serde_json::Value>,
    pub level: String,
    pub kind: String,
    pub time: OffsetDateTime,
}

/// Log severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

/// An interned stats token.
#[derive(Debug, Clone, FromRow)]
pub struct StatTokenRow {
    pub id: i64,
    pub token: String,
}

/// A `(key, time bucket) -> count` statistics record.
#[derive(Debug, Clone, FromRow)]
pub struct StatCounterRow {
    pub key: String,
    pub time_bucket: i64,
    pub count: i64,
}
