//! End-to-end archive upload, serve, and delete tests.

mod common;

use axum::http::{Request, StatusCode, header};
use common::fixtures::{
    MYSQL_META, WORDPRESS_META, bundle_archive, charm_archive, sha384_hex,
    wordpress_bundle_yaml,
};
use common::server::body_bytes;
use common::TestServer;
use emporium_core::reference::ArtifactRef;
use emporium_metadata::{BaseEntityRepo, EntityRepo, StatsRepo};
use std::sync::atomic::Ordering;
use tower::ServiceExt;

#[tokio::test]
async fn fresh_post_creates_revision_zero() {
    let server = TestServer::new().await;
    let archive = charm_archive(WORDPRESS_META);
    let hash = sha384_hex(&archive);

    let (status, body) = server.post_archive("trusty/wordpress", &hash, &archive).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Id"], "trusty/wordpress-0");

    let entities = server
        .metadata()
        .find_entities(&ArtifactRef::parse("wordpress").unwrap())
        .await
        .unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].revision, 0);
    assert_eq!(entities[0].blob_hash, hash);
    assert_eq!(server.blob_count(), 1);

    // The search index saw the insert.
    assert_eq!(
        server.search.upserts.lock().unwrap().as_slice(),
        ["trusty/wordpress-0".to_string()]
    );
}

#[tokio::test]
async fn idempotent_post_returns_existing_ref() {
    let server = TestServer::new().await;
    let archive = charm_archive(WORDPRESS_META);
    let hash = sha384_hex(&archive);

    server.post_archive("trusty/wordpress", &hash, &archive).await;
    let (status, body) = server.post_archive("trusty/wordpress", &hash, &archive).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Id"], "trusty/wordpress-0");

    let entities = server
        .metadata()
        .find_entities(&ArtifactRef::parse("wordpress").unwrap())
        .await
        .unwrap();
    assert_eq!(entities.len(), 1, "no new entity on identical re-upload");
    assert_eq!(server.blob_count(), 1, "no new blob on identical re-upload");
}

#[tokio::test]
async fn changed_content_bumps_revision() {
    let server = TestServer::new().await;
    let first = charm_archive(WORDPRESS_META);
    server
        .post_archive("trusty/wordpress", &sha384_hex(&first), &first)
        .await;

    let second = common::fixtures::charm_archive_with(
        WORDPRESS_META,
        &[("README.md", b"now with docs")],
    );
    let (status, body) = server
        .post_archive("trusty/wordpress", &sha384_hex(&second), &second)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Id"], "trusty/wordpress-1");

    let entities = server
        .metadata()
        .find_entities(&ArtifactRef::parse("wordpress").unwrap())
        .await
        .unwrap();
    assert_eq!(entities.len(), 2);
}

#[tokio::test]
async fn post_with_revision_is_rejected() {
    let server = TestServer::new().await;
    let archive = charm_archive(WORDPRESS_META);
    let (status, body) = server
        .post_archive("trusty/wordpress-3", &sha384_hex(&archive), &archive)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["message"].as_str().unwrap().contains("revision"),
        "{body}"
    );
}

#[tokio::test]
async fn post_without_series_is_rejected() {
    let server = TestServer::new().await;
    let archive = charm_archive(WORDPRESS_META);
    let (status, body) = server
        .post_archive("wordpress", &sha384_hex(&archive), &archive)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("series"), "{body}");
}

#[tokio::test]
async fn post_without_hash_is_rejected() {
    let server = TestServer::new().await;
    let archive = charm_archive(WORDPRESS_META);
    let request = Request::builder()
        .method("POST")
        .uri("/v4/trusty/wordpress/archive")
        .header(header::CONTENT_LENGTH, archive.len())
        .body(axum::body::Body::from(archive))
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn put_requires_revision() {
    let server = TestServer::new().await;
    let archive = charm_archive(WORDPRESS_META);
    let hash = sha384_hex(&archive);

    let (status, _) = server.put_archive("trusty/wordpress", &hash, &archive).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server
        .put_archive("trusty/wordpress-7", &hash, &archive)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Id"], "trusty/wordpress-7");
}

#[tokio::test]
async fn duplicate_put_conflicts() {
    let server = TestServer::new().await;
    let archive = charm_archive(WORDPRESS_META);
    let hash = sha384_hex(&archive);

    server.put_archive("trusty/wordpress-7", &hash, &archive).await;
    let (status, _) = server
        .put_archive("trusty/wordpress-7", &hash, &archive)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn hash_mismatch_leaves_nothing_behind() {
    let server = TestServer::new().await;
    let archive = charm_archive(WORDPRESS_META);

    let (status, _) = server
        .post_archive("trusty/wordpress", &sha384_hex(b"not the archive"), &archive)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let entities = server
        .metadata()
        .find_entities(&ArtifactRef::parse("wordpress").unwrap())
        .await
        .unwrap();
    assert!(entities.is_empty());
    assert_eq!(server.blob_count(), 0);

    server
        .wait_for_counter(&["archive-failed-upload", "trusty", "wordpress"], 1)
        .await;
}

#[tokio::test]
async fn template_relation_name_is_invalid_archive() {
    let server = TestServer::new().await;
    let archive = charm_archive(
        "name: wordpress\nprovides:\n  relation-name:\n    interface: http\n",
    );
    let (status, body) = server
        .post_archive("trusty/wordpress", &sha384_hex(&archive), &archive)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_archive");
    assert_eq!(server.blob_count(), 0, "rejected archive blob is rolled back");
}

#[tokio::test]
async fn search_failure_rolls_back_entity() {
    let server = TestServer::new().await;
    server.search.fail.store(true, Ordering::SeqCst);

    let archive = charm_archive(WORDPRESS_META);
    let (status, _) = server
        .post_archive("trusty/wordpress", &sha384_hex(&archive), &archive)
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

    let entities = server
        .metadata()
        .find_entities(&ArtifactRef::parse("wordpress").unwrap())
        .await
        .unwrap();
    assert!(entities.is_empty(), "entity insert was compensated");
    assert_eq!(server.blob_count(), 0, "blob was removed");

    // The same upload succeeds once the index recovers.
    server.search.fail.store(false, Ordering::SeqCst);
    let (status, body) = server
        .post_archive("trusty/wordpress", &sha384_hex(&archive), &archive)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Id"], "trusty/wordpress-0");
}

#[tokio::test]
async fn get_archive_roundtrips_bytes_and_headers() {
    let server = TestServer::new().await;
    let archive = charm_archive(WORDPRESS_META);
    let hash = sha384_hex(&archive);
    server.post_archive("trusty/wordpress", &hash, &archive).await;

    let response = server.get("/v4/trusty/wordpress-0/archive").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("ContentHash").unwrap(),
        hash.as_str()
    );
    assert_eq!(
        response.headers().get("EntityId").unwrap(),
        "trusty/wordpress-0"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=31536000"
    );
    assert_eq!(body_bytes(response).await, archive);

    // A partial id serves the latest revision with a short cache lifetime.
    let response = server.get("/v4/trusty/wordpress/archive").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=300"
    );

    server
        .wait_for_counter(&["archive-download", "trusty", "wordpress"], 2)
        .await;
}

#[tokio::test]
async fn get_archive_honours_stats_opt_out() {
    let server = TestServer::new().await;
    let archive = charm_archive(WORDPRESS_META);
    server
        .post_archive("trusty/wordpress", &sha384_hex(&archive), &archive)
        .await;

    let response = server.get("/v4/trusty/wordpress-0/archive?stats=0").await;
    assert_eq!(response.status(), StatusCode::OK);

    // Give any stray increment a moment to land, then check none did.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let total = server
        .metadata()
        .counter_total(&[
            "archive-download".to_string(),
            "trusty".to_string(),
            "wordpress".to_string(),
        ])
        .await
        .unwrap();
    assert_eq!(total, 0);
}

#[tokio::test]
async fn get_archive_supports_byte_ranges() {
    let server = TestServer::new().await;
    let archive = charm_archive(WORDPRESS_META);
    server
        .post_archive("trusty/wordpress", &sha384_hex(&archive), &archive)
        .await;

    let request = Request::builder()
        .method("GET")
        .uri("/v4/trusty/wordpress-0/archive")
        .header(header::RANGE, "bytes=4-15")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let expected_len = archive.len();
    assert_eq!(
        response.headers().get(header::CONTENT_RANGE).unwrap(),
        format!("bytes 4-15/{expected_len}").as_str()
    );
    assert_eq!(body_bytes(response).await, archive[4..16]);
}

#[tokio::test]
async fn get_missing_archive_is_not_found() {
    let server = TestServer::new().await;
    let response = server.get("/v4/trusty/nothere-0/archive").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn archive_file_serves_interior_member() {
    let server = TestServer::new().await;
    let archive = common::fixtures::charm_archive_with(
        WORDPRESS_META,
        &[("hooks/", b""), ("hooks/install", b"#!/bin/sh\ntrue\n")],
    );
    server
        .post_archive("trusty/wordpress", &sha384_hex(&archive), &archive)
        .await;

    let response = server
        .get("/v4/trusty/wordpress-0/archive/hooks/install")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"#!/bin/sh\ntrue\n");

    // Interior files are typed by extension.
    let response = server
        .get("/v4/trusty/wordpress-0/archive/metadata.yaml")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CONTENT_TYPE).is_some());

    // Directories are not listable.
    let response = server.get("/v4/trusty/wordpress-0/archive/hooks").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = server.get("/v4/trusty/wordpress-0/archive/nope").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_removes_entity_blob_and_counts() {
    let server = TestServer::new().await;
    let archive = charm_archive(WORDPRESS_META);
    server
        .post_archive("trusty/wordpress", &sha384_hex(&archive), &archive)
        .await;

    let request = Request::builder()
        .method("DELETE")
        .uri("/v4/trusty/wordpress-0/archive")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = server.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = server.get("/v4/trusty/wordpress-0/archive").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(server.blob_count(), 0);

    server
        .wait_for_counter(&["archive-delete", "trusty", "wordpress"], 1)
        .await;
}

#[tokio::test]
async fn bundle_upload_verifies_against_stored_charms() {
    let server = TestServer::new().await;

    // Store the charms the bundle needs.
    let wordpress = charm_archive(WORDPRESS_META);
    server
        .post_archive("trusty/wordpress", &sha384_hex(&wordpress), &wordpress)
        .await;
    let mysql = charm_archive(MYSQL_META);
    server
        .post_archive("trusty/mysql", &sha384_hex(&mysql), &mysql)
        .await;

    let bundle = bundle_archive(&wordpress_bundle_yaml(
        "cs:trusty/wordpress",
        "cs:trusty/mysql",
    ));
    let (status, body) = server
        .post_archive("bundle/wordpress-simple", &sha384_hex(&bundle), &bundle)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["Id"], "bundle/wordpress-simple-0");

    let entity = server
        .metadata()
        .find_entity(&ArtifactRef::parse("bundle/wordpress-simple-0").unwrap())
        .await
        .unwrap();
    assert_eq!(entity.bundle_unit_count, Some(2));
    assert_eq!(entity.bundle_readme.as_deref(), Some("A deployable bundle."));
}

#[tokio::test]
async fn bundle_with_unknown_charm_fails_verification() {
    let server = TestServer::new().await;
    let bundle = bundle_archive(&wordpress_bundle_yaml(
        "cs:trusty/missing",
        "cs:trusty/alsomissing",
    ));
    let (status, body) = server
        .post_archive("bundle/wordpress-simple", &sha384_hex(&bundle), &bundle)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_archive");

    // The message is a lexicographically sorted JSON array of failures.
    let message = body["message"].as_str().unwrap();
    let failures: Vec<String> = serde_json::from_str(message).unwrap();
    assert!(failures.iter().any(|m| m.contains("missing")), "{failures:?}");
    let mut sorted = failures.clone();
    sorted.sort();
    assert_eq!(failures, sorted);

    assert_eq!(server.blob_count(), 0, "failed bundle blob is rolled back");
}

#[tokio::test]
async fn charm_and_bundle_may_not_share_a_name() {
    let server = TestServer::new().await;
    let charm = charm_archive(WORDPRESS_META);
    server
        .post_archive("trusty/wordpress", &sha384_hex(&charm), &charm)
        .await;

    // An empty-service bundle would verify; the name collision is what
    // must reject it.
    let bundle = bundle_archive(
        "services:\n  wordpress:\n    charm: cs:trusty/wordpress\n    num_units: 1\n",
    );
    let (status, body) = server
        .post_archive("bundle/wordpress", &sha384_hex(&bundle), &bundle)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        body["message"].as_str().unwrap().contains("duplicates"),
        "{body}"
    );
}

#[tokio::test]
async fn promulgated_base_assigns_canonical_revisions() {
    let server = TestServer::new().await;

    // First upload creates the base entity; promulgate it, then upload new
    // revisions under two users.
    let archive = charm_archive(WORDPRESS_META);
    server
        .post_archive("~joe/trusty/wordpress", &sha384_hex(&archive), &archive)
        .await;
    server
        .metadata()
        .set_promulgated(&ArtifactRef::parse("~joe/wordpress").unwrap(), true)
        .await
        .unwrap();

    let second = common::fixtures::charm_archive_with(WORDPRESS_META, &[("README.md", b"v2")]);
    let (status, body) = server
        .post_archive("~joe/trusty/wordpress", &sha384_hex(&second), &second)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["Id"], "~joe/trusty/wordpress-1");

    let entity = server
        .metadata()
        .find_entity(&ArtifactRef::parse("~joe/trusty/wordpress-1").unwrap())
        .await
        .unwrap();
    assert_eq!(entity.promulgated_revision, 0);
    assert_eq!(entity.promulgated_url.as_deref(), Some("trusty/wordpress-0"));

    // The next promulgated upload takes the next canonical revision.
    let third = common::fixtures::charm_archive_with(WORDPRESS_META, &[("README.md", b"v3")]);
    server
        .post_archive("~joe/trusty/wordpress", &sha384_hex(&third), &third)
        .await;
    let entity = server
        .metadata()
        .find_entity(&ArtifactRef::parse("~joe/trusty/wordpress-2").unwrap())
        .await
        .unwrap();
    assert_eq!(entity.promulgated_revision, 1);
}
