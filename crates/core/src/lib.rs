//! Core domain types and shared logic for the Emporium artifact repository.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Artifact references and matching
//! - SHA-384 blob hashes
//! - Charm and bundle archive parsing and verification
//! - Cached zip member locators
//! - Icon SVG processing
//! - Configuration types

pub mod bundle;
pub mod charm;
pub mod config;
pub mod error;
pub mod hash;
pub mod reference;
pub mod svg;
pub mod zipfile;

pub use bundle::{Bundle, BundleData, CharmView, VerificationError};
pub use charm::{Charm, CharmActions, CharmConfig, CharmMetadata};
pub use error::{Error, Result};
pub use hash::{BlobHash, BlobHasher};
pub use reference::{ArtifactRef, BUNDLE_SERIES};
pub use zipfile::{CachedZipFile, FileId};

/// Stat kinds recorded against entity counters.
pub mod stats {
    pub const ARCHIVE_DOWNLOAD: &str = "archive-download";
    pub const ARCHIVE_DELETE: &str = "archive-delete";
    pub const ARCHIVE_UPLOAD: &str = "archive-upload";
    pub const ARCHIVE_FAILED_UPLOAD: &str = "archive-failed-upload";
}
