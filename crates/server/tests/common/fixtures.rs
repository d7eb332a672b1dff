//! Test fixtures: in-memory charm and bundle archives.

use sha2::{Digest, Sha384};
use std::io::{Cursor, Write};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// A plain charm metadata.yaml.
pub const WORDPRESS_META: &str = "\
name: wordpress
summary: Blog engine
description: A pretty popular blog engine.
provides:
  website:
    interface: http
requires:
  db:
    interface: mysql
";

/// A charm that provides the interface wordpress requires.
pub const MYSQL_META: &str = "\
name: mysql
summary: Database
description: A pretty popular database.
provides:
  server:
    interface: mysql
";

/// Compute a lowercase hex SHA-384 digest.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn sha384_hex(data: &[u8]) -> String {
    Sha384::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Build a zip archive from (name, body) entries.
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in entries {
        if let Some(dir) = name.strip_suffix('/') {
            writer
                .add_directory(dir, SimpleFileOptions::default())
                .unwrap();
            continue;
        }
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// A minimal valid charm archive.
#[allow(dead_code)]
pub fn charm_archive(meta: &str) -> Vec<u8> {
    build_zip(&[("metadata.yaml", meta.as_bytes())])
}

/// A charm archive with additional interior files.
#[allow(dead_code)]
pub fn charm_archive_with(meta: &str, extra: &[(&str, &[u8])]) -> Vec<u8> {
    let mut entries: Vec<(&str, &[u8])> = vec![("metadata.yaml", meta.as_bytes())];
    entries.extend_from_slice(extra);
    build_zip(&entries)
}

/// A minimal bundle archive.
#[allow(dead_code)]
pub fn bundle_archive(bundle_yaml: &str) -> Vec<u8> {
    build_zip(&[
        ("bundle.yaml", bundle_yaml.as_bytes()),
        ("README.md", b"A deployable bundle."),
    ])
}

/// Bundle data deploying wordpress and mysql.
#[allow(dead_code)]
pub fn wordpress_bundle_yaml(wordpress_charm: &str, mysql_charm: &str) -> String {
    format!(
        "services:\n  wordpress:\n    charm: {wordpress_charm}\n    num_units: 1\n  mysql:\n    charm: {mysql_charm}\n    num_units: 1\nrelations:\n  - [\"wordpress:db\", \"mysql:server\"]\n"
    )
}
