//! Artifact reference parsing and matching.
//!
//! A reference identifies a charm or bundle revision in the store. The
//! canonical string form is `[~user/][series/]name[-revision]`; the parser
//! additionally accepts a leading `cs:` scheme as produced by client tools.
//! Series and revision may each be left unspecified, in which case the
//! reference names a family of revisions rather than a single one.

use crate::error::{Error, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The series marker used by bundles instead of a target OS series.
pub const BUNDLE_SERIES: &str = "bundle";

/// A structured artifact identifier.
///
/// `user` is empty for promulgated (userless) references. `series` is empty
/// when unspecified. `revision` is -1 when unspecified.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ArtifactRef {
    pub user: String,
    pub name: String,
    pub series: String,
    pub revision: i64,
}

impl ArtifactRef {
    /// Create a fully specified reference.
    pub fn new(
        user: impl Into<String>,
        series: impl Into<String>,
        name: impl Into<String>,
        revision: i64,
    ) -> Self {
        Self {
            user: user.into(),
            name: name.into(),
            series: series.into(),
            revision,
        }
    }

    /// Parse a reference from its string form.
    pub fn parse(s: &str) -> Result<Self> {
        let original = s;
        let s = s.strip_prefix("cs:").unwrap_or(s);

        let mut user = String::new();
        let mut rest = s;
        if let Some(stripped) = rest.strip_prefix('~') {
            let (u, tail) = stripped.split_once('/').ok_or_else(|| {
                Error::InvalidReference(original.to_string(), "expected name after user".into())
            })?;
            if u.is_empty() || !is_valid_user(u) {
                return Err(Error::InvalidReference(
                    original.to_string(),
                    format!("invalid user {u:?}"),
                ));
            }
            user = u.to_string();
            rest = tail;
        }

        let mut series = String::new();
        if let Some((head, tail)) = rest.split_once('/') {
            if !is_valid_series(head) {
                return Err(Error::InvalidReference(
                    original.to_string(),
                    format!("invalid series {head:?}"),
                ));
            }
            series = head.to_string();
            rest = tail;
        }
        if rest.contains('/') {
            return Err(Error::InvalidReference(
                original.to_string(),
                "too many path segments".into(),
            ));
        }

        // A trailing all-digit dash segment is the revision. Valid names
        // require a letter in every non-leading segment, so the split is
        // unambiguous.
        let mut name = rest;
        let mut revision = -1;
        if let Some((head, tail)) = rest.rsplit_once('-') {
            if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) {
                revision = tail.parse::<i64>().map_err(|e| {
                    Error::InvalidReference(original.to_string(), format!("invalid revision: {e}"))
                })?;
                name = head;
            }
        }

        if !is_valid_name(name) {
            return Err(Error::InvalidReference(
                original.to_string(),
                format!("invalid name {name:?}"),
            ));
        }

        Ok(Self {
            user,
            name: name.to_string(),
            series,
            revision,
        })
    }

    /// The base reference: same identity with series and revision cleared.
    pub fn base_ref(&self) -> ArtifactRef {
        ArtifactRef {
            user: self.user.clone(),
            name: self.name.clone(),
            series: String::new(),
            revision: -1,
        }
    }

    /// Whether both series and revision are specified.
    pub fn is_fully_qualified(&self) -> bool {
        !self.series.is_empty() && self.revision >= 0
    }

    /// Whether this reference names a bundle rather than a charm.
    pub fn is_bundle(&self) -> bool {
        self.series == BUNDLE_SERIES
    }

    /// Whether this reference matches the given pattern.
    ///
    /// Names must be equal; an empty pattern series or a -1 pattern revision
    /// matches anything. This is the post-filter applied after a base-ref
    /// query.
    pub fn matches(&self, pattern: &ArtifactRef) -> bool {
        if !pattern.series.is_empty() && self.series != pattern.series {
            return false;
        }
        if pattern.revision != -1 && self.revision != pattern.revision {
            return false;
        }
        self.name == pattern.name
    }

    /// Return a copy with the given revision.
    pub fn with_revision(&self, revision: i64) -> ArtifactRef {
        ArtifactRef {
            revision,
            ..self.clone()
        }
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.user.is_empty() {
            write!(f, "~{}/", self.user)?;
        }
        if !self.series.is_empty() {
            write!(f, "{}/", self.series)?;
        }
        write!(f, "{}", self.name)?;
        if self.revision >= 0 {
            write!(f, "-{}", self.revision)?;
        }
        Ok(())
    }
}

impl FromStr for ArtifactRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ArtifactRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ArtifactRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ArtifactRef::parse(&s).map_err(D::Error::custom)
    }
}

/// A valid name starts with a letter and consists of lowercase alphanumeric
/// segments joined by dashes, where every segment after the first contains
/// at least one letter.
fn is_valid_name(name: &str) -> bool {
    let mut segments = name.split('-');
    let Some(first) = segments.next() else {
        return false;
    };
    if first.is_empty() || !first.bytes().next().is_some_and(|b| b.is_ascii_lowercase()) {
        return false;
    }
    if !first
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        return false;
    }
    for seg in segments {
        if seg.is_empty()
            || !seg
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
            || !seg.bytes().any(|b| b.is_ascii_lowercase())
        {
            return false;
        }
    }
    true
}

/// A valid series is a lowercase alphanumeric word starting with a letter.
fn is_valid_series(series: &str) -> bool {
    !series.is_empty()
        && series.bytes().next().is_some_and(|b| b.is_ascii_lowercase())
        && series
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// A valid user is a non-empty word of lowercase alphanumerics plus `-+._`.
fn is_valid_user(user: &str) -> bool {
    user.bytes().all(|b| {
        b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.' | b'_')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(s: &str) {
        let parsed = ArtifactRef::parse(s).unwrap();
        assert_eq!(parsed.to_string(), s);
        assert_eq!(ArtifactRef::parse(&parsed.to_string()).unwrap(), parsed);
    }

    #[test]
    fn parse_and_format_are_bijective() {
        roundtrip("wordpress");
        roundtrip("wordpress-4");
        roundtrip("trusty/wordpress");
        roundtrip("trusty/wordpress-0");
        roundtrip("~joe/trusty/wordpress-12");
        roundtrip("~joe/wordpress");
        roundtrip("bundle/wordpress-simple-3");
        roundtrip("haproxy2");
    }

    #[test]
    fn parse_accepts_scheme_prefix() {
        let parsed = ArtifactRef::parse("cs:trusty/wordpress-0").unwrap();
        assert_eq!(parsed.to_string(), "trusty/wordpress-0");
    }

    #[test]
    fn parse_fields() {
        let r = ArtifactRef::parse("~joe/trusty/wordpress-4").unwrap();
        assert_eq!(r.user, "joe");
        assert_eq!(r.series, "trusty");
        assert_eq!(r.name, "wordpress");
        assert_eq!(r.revision, 4);

        let r = ArtifactRef::parse("wordpress").unwrap();
        assert!(r.user.is_empty());
        assert!(r.series.is_empty());
        assert_eq!(r.revision, -1);
    }

    #[test]
    fn parse_rejects_invalid() {
        for bad in [
            "",
            "~joe",
            "~/wordpress",
            "Trusty/wordpress",
            "trusty/wordpress/extra",
            "trusty/-wordpress",
            "trusty/9wordpress",
            "trusty/word_press",
        ] {
            assert!(ArtifactRef::parse(bad).is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn name_with_digit_segment_keeps_revision_split_unambiguous() {
        // "wordpress-simple-3": "3" is a revision, "simple" is part of the name.
        let r = ArtifactRef::parse("bundle/wordpress-simple-3").unwrap();
        assert_eq!(r.name, "wordpress-simple");
        assert_eq!(r.revision, 3);
    }

    #[test]
    fn base_ref_clears_series_and_revision() {
        let r = ArtifactRef::parse("~joe/trusty/wordpress-4").unwrap();
        let base = r.base_ref();
        assert_eq!(base.to_string(), "~joe/wordpress");
        assert!(!base.is_fully_qualified());
        assert!(r.is_fully_qualified());
    }

    #[test]
    fn matches_honours_wildcards() {
        let r = ArtifactRef::parse("trusty/wordpress-4").unwrap();
        assert!(r.matches(&ArtifactRef::parse("wordpress").unwrap()));
        assert!(r.matches(&ArtifactRef::parse("trusty/wordpress").unwrap()));
        assert!(r.matches(&ArtifactRef::parse("trusty/wordpress-4").unwrap()));
        assert!(!r.matches(&ArtifactRef::parse("precise/wordpress").unwrap()));
        assert!(!r.matches(&ArtifactRef::parse("trusty/wordpress-5").unwrap()));
        assert!(!r.matches(&ArtifactRef::parse("trusty/mysql").unwrap()));
    }

    #[test]
    fn bundle_marker() {
        assert!(ArtifactRef::parse("bundle/wiki-0").unwrap().is_bundle());
        assert!(!ArtifactRef::parse("trusty/wiki-0").unwrap().is_bundle());
    }
}
