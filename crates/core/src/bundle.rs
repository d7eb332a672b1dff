//! Bundle archive parsing and verification.
//!
//! A bundle archive is a zip with a `bundle.yaml` describing services
//! deployed from charms, machines, placement directives, and relations.
//! Bundles may only reference charms that already exist in the store;
//! verification runs against views of the stored charm entities, so no
//! charm blob is ever read on the bundle ingest path.

use crate::charm::{CharmActions, CharmConfig, CharmMetadata};
use crate::error::{Error, Result};
use crate::reference::ArtifactRef;
use crate::zipfile::{is_readme_name, normalize_path};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Seek};
use zip::ZipArchive;

/// A service entry in bundle data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub charm: String,
    #[serde(default)]
    pub num_units: i64,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

/// A machine entry in bundle data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
}

/// Parsed bundle data (`bundle.yaml`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleData {
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
    #[serde(default)]
    pub machines: BTreeMap<String, MachineSpec>,
    #[serde(default)]
    pub relations: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
}

/// A fully parsed bundle archive.
#[derive(Clone, Debug, PartialEq)]
pub struct Bundle {
    pub data: BundleData,
    pub readme: String,
}

/// A unit placement directive, `[container:]target`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnitPlacement {
    pub container: String,
    /// A machine id, or "new" for a fresh machine.
    pub machine: String,
    pub service: String,
    pub unit: i64,
}

impl UnitPlacement {
    /// Parse a placement directive: `new`, a machine id, `service`,
    /// `service/unit`, each optionally prefixed with `container:`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut placement = UnitPlacement {
            unit: -1,
            ..Default::default()
        };
        let target = match s.split_once(':') {
            Some((container, rest)) => {
                if container.is_empty() {
                    return Err(Error::InvalidEntity(format!("invalid placement {s:?}")));
                }
                placement.container = container.to_string();
                rest
            }
            None => s,
        };
        if target.is_empty() {
            return Err(Error::InvalidEntity(format!("invalid placement {s:?}")));
        }
        if target == "new" || target.bytes().all(|b| b.is_ascii_digit()) {
            placement.machine = target.to_string();
            return Ok(placement);
        }
        match target.split_once('/') {
            Some((service, unit)) => {
                placement.service = service.to_string();
                placement.unit = unit
                    .parse()
                    .map_err(|_| Error::InvalidEntity(format!("invalid placement {s:?}")))?;
            }
            None => placement.service = target.to_string(),
        }
        Ok(placement)
    }
}

impl BundleData {
    /// The deduplicated, sorted charm id strings referenced by the bundle.
    pub fn required_charms(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.services.values().map(|s| s.charm.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// The number of units the bundle deploys.
    pub fn unit_count(&self) -> i64 {
        self.services.values().map(|s| s.num_units.max(0)).sum()
    }

    /// The number of machines the bundle creates or uses.
    ///
    /// Each explicit machine counts once. A "new" placement adds a machine,
    /// and when a service has fewer placement directives than units the last
    /// directive is replicated for the remainder.
    pub fn machine_count(&self) -> i64 {
        let mut count = self.machines.len() as i64;
        for service in self.services.values() {
            let mut last = UnitPlacement {
                machine: "new".to_string(),
                unit: -1,
                ..Default::default()
            };
            for location in &service.to {
                // Invalid placements are reported by verification, not here.
                let Ok(placement) = UnitPlacement::parse(location) else {
                    continue;
                };
                if placement.machine == "new" {
                    count += 1;
                }
                last = placement;
            }
            if last.machine == "new" {
                count += service.num_units - service.to.len() as i64;
            }
        }
        count
    }

    /// Verify the bundle against the given charm catalogue.
    ///
    /// `verify_constraints` validates constraint strings. `charms` maps the
    /// charm id strings used in the bundle to views of the stored charms; an
    /// id missing from the map is reported as an error. All problems are
    /// collected into a single [`VerificationError`].
    pub fn verify_with_charms(
        &self,
        verify_constraints: &dyn Fn(&str) -> std::result::Result<(), String>,
        charms: &BTreeMap<String, CharmView>,
    ) -> std::result::Result<(), VerificationError> {
        let mut errors = Vec::new();

        if self.services.is_empty() {
            errors.push("bundle declares no services".to_string());
        }

        for id in self.machines.keys() {
            if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
                errors.push(format!("invalid machine id {id:?}"));
            }
        }

        for (name, service) in &self.services {
            if ArtifactRef::parse(&service.charm).is_err() {
                errors.push(format!(
                    "invalid charm URL in service {name:?}: {:?}",
                    service.charm
                ));
            } else if !charms.contains_key(&service.charm) {
                errors.push(format!(
                    "service {name:?} refers to non-existent charm {:?}",
                    service.charm
                ));
            }
            if service.num_units < 0 {
                errors.push(format!("negative number of units specified on service {name:?}"));
            }
            if let Some(constraints) = &service.constraints {
                if let Err(reason) = verify_constraints(constraints) {
                    errors.push(format!(
                        "invalid constraints {constraints:?} in service {name:?}: {reason}"
                    ));
                }
            }
            for location in &service.to {
                match UnitPlacement::parse(location) {
                    Ok(placement) => {
                        if !placement.service.is_empty()
                            && !self.services.contains_key(&placement.service)
                        {
                            errors.push(format!(
                                "placement {location:?} in service {name:?} refers to non-existent service {:?}",
                                placement.service
                            ));
                        }
                        if !placement.machine.is_empty()
                            && placement.machine != "new"
                            && !self.machines.contains_key(&placement.machine)
                        {
                            errors.push(format!(
                                "placement {location:?} in service {name:?} refers to non-existent machine {:?}",
                                placement.machine
                            ));
                        }
                    }
                    Err(_) => {
                        errors.push(format!("invalid placement {location:?} in service {name:?}"));
                    }
                }
            }
        }

        for (id, machine) in &self.machines {
            if let Some(constraints) = &machine.constraints {
                if let Err(reason) = verify_constraints(constraints) {
                    errors.push(format!(
                        "invalid constraints {constraints:?} in machine {id:?}: {reason}"
                    ));
                }
            }
        }

        for relation in &self.relations {
            if relation.len() != 2 {
                errors.push(format!("relation {relation:?} has {} endpoints, need 2", relation.len()));
                continue;
            }
            for endpoint in relation {
                let (service, rel_name) = match endpoint.split_once(':') {
                    Some((s, r)) => (s, Some(r)),
                    None => (endpoint.as_str(), None),
                };
                let Some(spec) = self.services.get(service) else {
                    errors.push(format!(
                        "relation {relation:?} refers to non-existent service {service:?}"
                    ));
                    continue;
                };
                if let (Some(rel_name), Some(view)) = (rel_name, charms.get(&spec.charm)) {
                    if !view.meta.has_relation(rel_name) {
                        errors.push(format!(
                            "charm {:?} has no relation {rel_name:?} referenced by relation {relation:?}",
                            spec.charm
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(VerificationError { errors })
        }
    }
}

/// A view of a stored charm sufficient for bundle verification, drawn from
/// the entity record rather than the archive blob.
#[derive(Clone, Debug)]
pub struct CharmView {
    pub meta: CharmMetadata,
    pub config: Option<CharmConfig>,
    pub actions: Option<CharmActions>,
    pub revision: i64,
}

/// The collected failures from bundle verification.
#[derive(Debug)]
pub struct VerificationError {
    pub errors: Vec<String>,
}

impl VerificationError {
    /// The messages sorted lexicographically and JSON-encoded, which is the
    /// wire form of a failed verification.
    pub fn to_json_message(&self) -> String {
        let mut messages = self.errors.clone();
        messages.sort();
        serde_json::to_string(&messages).unwrap_or_else(|_| "[]".to_string())
    }
}

impl std::fmt::Display for VerificationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_json_message())
    }
}

impl std::error::Error for VerificationError {}

/// Read and parse a bundle archive.
pub fn read_bundle_archive<R: Read + Seek>(reader: R) -> Result<Bundle> {
    let mut archive = ZipArchive::new(reader)
        .map_err(|e| Error::BadArchive(format!("cannot read bundle archive: {e}")))?;

    let data_text = crate::charm::read_member(&mut archive, "bundle.yaml")?
        .ok_or_else(|| Error::BadArchive("archive has no bundle.yaml".into()))?;
    let data: BundleData = serde_yaml::from_str(&data_text)
        .map_err(|e| Error::BadArchive(format!("cannot parse bundle.yaml: {e}")))?;

    let readme = read_readme(&mut archive)?.unwrap_or_default();

    Ok(Bundle { data, readme })
}

fn read_readme<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Option<String>> {
    let index = (0..archive.len()).find(|&i| {
        archive
            .name_for_index(i)
            .is_some_and(|name| is_readme_name(&normalize_path(name)))
    });
    let Some(index) = index else {
        return Ok(None);
    };
    let mut entry = archive
        .by_index(index)
        .map_err(|e| Error::BadArchive(format!("cannot read bundle README: {e}")))?;
    let mut text = String::new();
    entry
        .read_to_string(&mut text)
        .map_err(|e| Error::BadArchive(format!("cannot read bundle README: {e}")))?;
    Ok(Some(text))
}
