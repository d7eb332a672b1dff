//! README, icon, and diagram endpoint tests.

mod common;

use axum::http::{StatusCode, header};
use common::TestServer;
use common::fixtures::{
    MYSQL_META, WORDPRESS_META, bundle_archive, charm_archive, charm_archive_with, sha384_hex,
    wordpress_bundle_yaml,
};
use common::server::body_bytes;
use std::sync::atomic::Ordering;

const ICON: &str =
    r#"<svg xmlns="http://www.w3.org/2000/svg" width="48" height="48"><rect/></svg>"#;

async fn upload(server: &TestServer, id: &str, archive: &[u8]) {
    let (status, body) = server.post_archive(id, &sha384_hex(archive), archive).await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn readme_is_served_case_insensitively() {
    let server = TestServer::new().await;
    let archive = charm_archive_with(WORDPRESS_META, &[("README.MD", b"# WordPress\n")]);
    upload(&server, "trusty/wordpress", &archive).await;

    let response = server.get("/v4/trusty/wordpress-0/readme").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"# WordPress\n");
}

#[tokio::test]
async fn readme_missing_is_not_found() {
    let server = TestServer::new().await;
    let archive = charm_archive(WORDPRESS_META);
    upload(&server, "trusty/wordpress", &archive).await;

    let response = server.get("/v4/trusty/wordpress-0/readme").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The miss is cached too; a second lookup does not rescan.
    let scans_after_first = server.state.catalog.directory_scans.load(Ordering::Relaxed);
    let response = server.get("/v4/trusty/wordpress-0/readme").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        server.state.catalog.directory_scans.load(Ordering::Relaxed),
        scans_after_first
    );
}

#[tokio::test]
async fn icon_is_processed_and_cached() {
    let server = TestServer::new().await;
    let archive = charm_archive_with(WORDPRESS_META, &[("icon.svg", ICON.as_bytes())]);
    upload(&server, "trusty/wordpress", &archive).await;

    let response = server.get("/v4/trusty/wordpress-0/icon.svg").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/svg+xml"
    );
    let first = body_bytes(response).await;
    let text = String::from_utf8(first.clone()).unwrap();
    assert!(text.contains(r#"viewBox="0 0 48 48""#), "{text}");

    // The second request reads the cached locator; the central directory
    // is scanned exactly once per entity.
    let response = server.get("/v4/trusty/wordpress-0/icon.svg").await;
    assert_eq!(body_bytes(response).await, first);
    assert_eq!(
        server.state.catalog.directory_scans.load(Ordering::Relaxed),
        1
    );
}

#[tokio::test]
async fn missing_icon_serves_default() {
    let server = TestServer::new().await;
    let archive = charm_archive(WORDPRESS_META);
    upload(&server, "trusty/wordpress", &archive).await;

    let response = server.get("/v4/trusty/wordpress-0/icon.svg").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/svg+xml"
    );
    let body = body_bytes(response).await;
    assert_eq!(body, emporium_core::svg::DEFAULT_ICON.as_bytes());
}

#[tokio::test]
async fn bundle_has_no_icon() {
    let server = TestServer::new().await;
    let wordpress = charm_archive(WORDPRESS_META);
    upload(&server, "trusty/wordpress", &wordpress).await;
    let mysql = charm_archive(MYSQL_META);
    upload(&server, "trusty/mysql", &mysql).await;

    let bundle = bundle_archive(&wordpress_bundle_yaml(
        "cs:trusty/wordpress",
        "cs:trusty/mysql",
    ));
    upload(&server, "bundle/wordpress-simple", &bundle).await;

    let response = server.get("/v4/bundle/wordpress-simple-0/icon.svg").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn diagram_renders_bundle_with_relative_icon_urls() {
    let server = TestServer::new().await;
    let wordpress = charm_archive(WORDPRESS_META);
    upload(&server, "trusty/wordpress", &wordpress).await;
    let mysql = charm_archive(MYSQL_META);
    upload(&server, "trusty/mysql", &mysql).await;

    let bundle = bundle_archive(&wordpress_bundle_yaml(
        "cs:trusty/wordpress",
        "cs:trusty/mysql",
    ));
    upload(&server, "bundle/wordpress-simple", &bundle).await;

    let response = server.get("/v4/bundle/wordpress-simple-0/diagram.svg").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/svg+xml"
    );
    let svg = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(svg.contains("../../trusty/wordpress/icon.svg"), "{svg}");
    assert!(svg.contains("../../trusty/mysql/icon.svg"), "{svg}");
}

#[tokio::test]
async fn diagram_on_charm_is_not_found() {
    let server = TestServer::new().await;
    let archive = charm_archive(WORDPRESS_META);
    upload(&server, "trusty/wordpress", &archive).await;

    let response = server.get("/v4/trusty/wordpress-0/diagram.svg").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_endpoint_is_not_found() {
    let server = TestServer::new().await;
    let response = server.get("/v4/trusty/wordpress-0/meta").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let server = TestServer::new().await;
    let response = server.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value =
        serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(body["status"], "ok");
}
