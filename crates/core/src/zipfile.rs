//! Cached zip member locators.
//!
//! Locating a well-known file (README, icon) inside an archive requires a
//! central-directory scan. The scan result is persisted on the entity as a
//! [`CachedZipFile`] so later reads can slice the member straight out of the
//! blob without reopening the directory. A locator is also written on a
//! miss, marked invalid, so repeated lookups for an absent file
//! short-circuit.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Seek};
use zip::{CompressionMethod, ZipArchive};

/// Zip compression method: stored (no compression).
pub const METHOD_STORED: u16 = 0;
/// Zip compression method: deflate.
pub const METHOD_DEFLATED: u16 = 8;

/// Identifier of a well-known file cached on an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileId {
    Readme,
    Icon,
}

impl FileId {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileId::Readme => "readme",
            FileId::Icon => "icon",
        }
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An interior-file locator within an archive blob.
///
/// `offset` addresses the first byte of the member's (possibly compressed)
/// data within the whole archive. An invalid locator records that the file
/// was searched for and not found.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedZipFile {
    pub offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub method: u16,
    #[serde(default)]
    pub valid: bool,
}

impl CachedZipFile {
    /// The marker stored after an unsuccessful search.
    pub fn not_found() -> Self {
        Self {
            offset: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            method: 0,
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Decode the member's bytes from its raw data slice.
    ///
    /// `data` must be exactly the `compressed_size` bytes at `offset` in the
    /// archive. Only stored and deflate members can be decoded from a cached
    /// locator; anything else forces the caller back to a directory scan.
    pub fn decode(&self, data: &[u8]) -> Result<Vec<u8>> {
        if !self.valid {
            return Err(Error::BadArchive("invalid zip member locator".into()));
        }
        if data.len() as u64 != self.compressed_size {
            return Err(Error::BadArchive(format!(
                "zip member data is {} bytes, expected {}",
                data.len(),
                self.compressed_size
            )));
        }
        match self.method {
            METHOD_STORED => Ok(data.to_vec()),
            METHOD_DEFLATED => {
                let mut out = Vec::with_capacity(self.uncompressed_size as usize);
                flate2::read::DeflateDecoder::new(data)
                    .read_to_end(&mut out)
                    .map_err(|e| Error::BadArchive(format!("cannot inflate zip member: {e}")))?;
                if out.len() as u64 != self.uncompressed_size {
                    return Err(Error::BadArchive(format!(
                        "inflated zip member is {} bytes, expected {}",
                        out.len(),
                        self.uncompressed_size
                    )));
                }
                Ok(out)
            }
            other => Err(Error::BadArchive(format!(
                "unsupported zip compression method {other}"
            ))),
        }
    }
}

/// Scan the archive's central directory for the first file member whose
/// normalised name satisfies `predicate`. Returns the not-found marker when
/// no member matches.
pub fn find_zip_member<R: Read + Seek>(
    reader: R,
    predicate: impl Fn(&str) -> bool,
) -> Result<CachedZipFile> {
    let mut archive = ZipArchive::new(reader)
        .map_err(|e| Error::BadArchive(format!("cannot read archive data: {e}")))?;
    for i in 0..archive.len() {
        let entry = archive
            .by_index_raw(i)
            .map_err(|e| Error::BadArchive(format!("cannot read archive member: {e}")))?;
        if entry.is_dir() {
            continue;
        }
        if predicate(&normalize_path(entry.name())) {
            let method = match entry.compression() {
                CompressionMethod::Stored => METHOD_STORED,
                CompressionMethod::Deflated => METHOD_DEFLATED,
                other => {
                    return Err(Error::BadArchive(format!(
                        "unsupported zip compression method {other:?}"
                    )));
                }
            };
            return Ok(CachedZipFile {
                offset: entry.data_start(),
                compressed_size: entry.compressed_size(),
                uncompressed_size: entry.size(),
                method,
                valid: true,
            });
        }
    }
    Ok(CachedZipFile::not_found())
}

/// README file names observed in charms in the wild.
const README_NAMES: &[&str] = &[
    "readme",
    "readme.md",
    "readme.rst",
    "readme.ex",
    "readme.markdown",
    "readme.txt",
];

/// Whether a normalised member name is a README, case-insensitively.
pub fn is_readme_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    README_NAMES.contains(&lower.as_str())
}

/// Whether a normalised member name is the charm icon.
pub fn is_icon_name(name: &str) -> bool {
    name == "icon.svg"
}

/// Lexically normalise a zip member path: collapse repeated separators,
/// resolve `.` and `..` components, and strip any leading slash.
pub fn normalize_path(name: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in name.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    parts.join("/")
}
