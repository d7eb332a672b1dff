//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use emporium_core::config::{AppConfig, MetadataConfig, ServerConfig, StorageConfig};
use emporium_metadata::{MetadataStore, SqliteStore, StatsRepo};
use emporium_server::search::RecordingSearchIndex;
use emporium_server::{AppState, create_router};
use emporium_storage::{BlobStore, FilesystemStore};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub search: Arc<RecordingSearchIndex>,
    pub blob_dir: std::path::PathBuf,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage.
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let storage_path = temp_dir.path().join("blobs");
        let storage: Arc<dyn BlobStore> = Arc::new(
            FilesystemStore::new(&storage_path)
                .await
                .expect("Failed to create blob store"),
        );

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path)
                .await
                .expect("Failed to create metadata store"),
        );

        let search = Arc::new(RecordingSearchIndex::default());

        let config = AppConfig {
            server: ServerConfig::default(),
            storage: StorageConfig::Filesystem { path: storage_path },
            metadata: MetadataConfig::Sqlite { path: db_path },
        };

        let state = AppState::new(config, storage, metadata, search.clone());
        let router = create_router(state.clone());

        Self {
            router,
            state,
            search,
            blob_dir: temp_dir.path().join("blobs"),
            _temp_dir: temp_dir,
        }
    }

    /// Count the blobs currently on disk.
    pub fn blob_count(&self) -> usize {
        std::fs::read_dir(&self.blob_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    /// Get access to the underlying metadata store.
    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.catalog.metadata.clone()
    }

    /// POST an archive body, returning status and parsed JSON body.
    pub async fn post_archive(
        &self,
        id: &str,
        hash: &str,
        body: &[u8],
    ) -> (StatusCode, serde_json::Value) {
        self.upload_archive("POST", id, hash, body).await
    }

    /// PUT an archive body, returning status and parsed JSON body.
    pub async fn put_archive(
        &self,
        id: &str,
        hash: &str,
        body: &[u8],
    ) -> (StatusCode, serde_json::Value) {
        self.upload_archive("PUT", id, hash, body).await
    }

    async fn upload_archive(
        &self,
        method: &str,
        id: &str,
        hash: &str,
        body: &[u8],
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(format!("/v4/{id}/archive?hash={hash}"))
            .header(header::CONTENT_LENGTH, body.len())
            .body(Body::from(body.to_vec()))
            .unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    /// GET a path, returning the raw response.
    pub async fn get(&self, path: &str) -> axum::http::Response<Body> {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Poll a counter until it reaches at least `min`, failing after a
    /// deadline. Counter increments are fire-and-forget, so tests must
    /// wait for them.
    pub async fn wait_for_counter(&self, key: &[&str], min: i64) {
        let key: Vec<String> = key.iter().map(|s| s.to_string()).collect();
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            let total = self.metadata().counter_total(&key).await.unwrap();
            if total >= min {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("counter {key:?} did not reach {min} (got {total})");
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }
}

/// Read a response body fully.
#[allow(dead_code)]
pub async fn body_bytes(response: axum::http::Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}
