//! Charm archive parsing and validity checks.
//!
//! A charm archive is a zip with a `metadata.yaml` at its root and optional
//! `config.yaml` and `actions.yaml` documents. The parsed documents are
//! stored on the entity record so that later reads (bundle verification,
//! metadata endpoints) never have to reopen the blob.

use crate::error::{Error, Result};
use crate::zipfile::normalize_path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Seek};
use zip::ZipArchive;

/// A relation endpoint declared in charm metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub interface: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(default)]
    pub optional: bool,
}

/// metadata.yaml allows a relation to be given as just its interface name.
#[derive(Deserialize)]
#[serde(untagged)]
enum RelationSpec {
    Interface(String),
    Full(Relation),
}

fn relation_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, Relation>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let specs = BTreeMap::<String, RelationSpec>::deserialize(deserializer)?;
    Ok(specs
        .into_iter()
        .map(|(name, spec)| {
            let rel = match spec {
                RelationSpec::Interface(interface) => Relation {
                    interface,
                    scope: None,
                    limit: None,
                    optional: false,
                },
                RelationSpec::Full(rel) => rel,
            };
            (name, rel)
        })
        .collect())
}

/// Parsed charm metadata (`metadata.yaml`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CharmMetadata {
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "relation_map")]
    pub provides: BTreeMap<String, Relation>,
    #[serde(default, deserialize_with = "relation_map")]
    pub requires: BTreeMap<String, Relation>,
    #[serde(default, deserialize_with = "relation_map")]
    pub peers: BTreeMap<String, Relation>,
    #[serde(default)]
    pub subordinate: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CharmMetadata {
    /// All declared relation maps, in provides/requires/peers order.
    pub fn relation_maps(&self) -> [&BTreeMap<String, Relation>; 3] {
        [&self.provides, &self.requires, &self.peers]
    }

    /// Whether any relation map declares the given relation name.
    pub fn has_relation(&self, name: &str) -> bool {
        self.relation_maps().iter().any(|m| m.contains_key(name))
    }

    /// Deduplicated interface names across the given relation map.
    pub fn interfaces(rels: &BTreeMap<String, Relation>) -> Vec<String> {
        let mut ifaces: Vec<String> = rels.values().map(|r| r.interface.clone()).collect();
        ifaces.sort();
        ifaces.dedup();
        ifaces
    }
}

/// A single configuration option (`config.yaml`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigOption {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

/// Parsed charm configuration (`config.yaml`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CharmConfig {
    #[serde(default)]
    pub options: BTreeMap<String, ConfigOption>,
}

/// A single action declaration (`actions.yaml`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Parsed charm actions (`actions.yaml`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharmActions(pub BTreeMap<String, ActionSpec>);

/// A fully parsed charm archive.
#[derive(Clone, Debug, PartialEq)]
pub struct Charm {
    pub meta: CharmMetadata,
    pub config: Option<CharmConfig>,
    pub actions: Option<CharmActions>,
}

/// Read and parse a charm archive.
pub fn read_charm_archive<R: Read + Seek>(reader: R) -> Result<Charm> {
    let mut archive = ZipArchive::new(reader)
        .map_err(|e| Error::BadArchive(format!("cannot read charm archive: {e}")))?;

    let meta_text = read_member(&mut archive, "metadata.yaml")?
        .ok_or_else(|| Error::BadArchive("archive has no metadata.yaml".into()))?;
    let meta: CharmMetadata = serde_yaml::from_str(&meta_text)
        .map_err(|e| Error::BadArchive(format!("cannot parse metadata.yaml: {e}")))?;
    if meta.name.is_empty() {
        return Err(Error::BadArchive("metadata.yaml has no charm name".into()));
    }

    let config = match read_member(&mut archive, "config.yaml")? {
        Some(text) => Some(
            serde_yaml::from_str(&text)
                .map_err(|e| Error::BadArchive(format!("cannot parse config.yaml: {e}")))?,
        ),
        None => None,
    };
    let actions = match read_member(&mut archive, "actions.yaml")? {
        Some(text) => Some(
            serde_yaml::from_str(&text)
                .map_err(|e| Error::BadArchive(format!("cannot parse actions.yaml: {e}")))?,
        ),
        None => None,
    };

    Ok(Charm {
        meta,
        config,
        actions,
    })
}

/// Reject charms whose relation declarations still carry the charm-template
/// placeholders. The literal names are load-bearing for upstream tooling.
pub fn check_charm_is_valid(charm: &Charm) -> Result<()> {
    for rels in charm.meta.relation_maps() {
        for (name, rel) in &*rels {
            if name == "relation-name" {
                return Err(Error::InvalidEntity(format!(
                    "relation {name} has almost certainly not been changed from the template"
                )));
            }
            if rel.interface == "interface-name" {
                return Err(Error::InvalidEntity(format!(
                    "interface {} in relation {} has almost certainly not been changed from the template",
                    rel.interface, name
                )));
            }
        }
    }
    Ok(())
}

/// Read a root-level archive member as UTF-8 text, by normalised name.
pub(crate) fn read_member<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    want: &str,
) -> Result<Option<String>> {
    let index = (0..archive.len()).find(|&i| {
        archive
            .name_for_index(i)
            .is_some_and(|name| normalize_path(name) == want)
    });
    let Some(index) = index else {
        return Ok(None);
    };
    let mut entry = archive
        .by_index(index)
        .map_err(|e| Error::BadArchive(format!("cannot read archive member {want}: {e}")))?;
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| Error::BadArchive(format!("cannot read archive member {want}: {e}")))?;
    Ok(Some(text))
}
