//! SPDX SBOM attestation parsing and package-level diffing.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use crate::error::{parse_json, BoundaryError};
use crate::release::settings::DuplicatePolicy;

/// In-toto statement wrapping the SPDX document, as emitted by BuildKit.
#[derive(Debug, Deserialize)]
struct SbomDocument {
    predicate: Predicate,
}

#[derive(Debug, Deserialize)]
struct Predicate {
    packages: Vec<SpdxPackage>,
}

#[derive(Debug, Deserialize)]
struct SpdxPackage {
    name: String,
    #[serde(rename = "versionInfo")]
    version_info: Option<String>,
}

/// A package name with its installed version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PackageEntry {
    pub name: String,
    pub version: String,
}

impl PackageEntry {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// A package present in both snapshots with different versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedPackage {
    pub name: String,
    pub old_version: String,
    pub new_version: String,
}

/// Package-level difference between two SBOM snapshots.
///
/// Each list is sorted by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SbomDiff {
    pub added: Vec<PackageEntry>,
    pub updated: Vec<UpdatedPackage>,
    pub deleted: Vec<PackageEntry>,
}

impl SbomDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Parse an SBOM attestation into a package list.
///
/// Packages without `versionInfo` are dropped; repeated names are resolved
/// by `policy`.
pub fn parse_sbom(
    source_name: &str,
    text: &str,
    policy: DuplicatePolicy,
) -> Result<Vec<PackageEntry>, BoundaryError> {
    let doc: SbomDocument = parse_json(source_name, text)?;
    let entries = doc
        .predicate
        .packages
        .into_iter()
        .filter_map(|p| p.version_info.map(|version| PackageEntry::new(p.name, version)));
    Ok(apply_duplicate_policy(entries, policy))
}

pub fn read_sbom_file(path: &Path, policy: DuplicatePolicy) -> Result<Vec<PackageEntry>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading SBOM '{}'", path.display()))?;
    Ok(parse_sbom(&path.display().to_string(), &text, policy)?)
}

fn apply_duplicate_policy(
    entries: impl Iterator<Item = PackageEntry>,
    policy: DuplicatePolicy,
) -> Vec<PackageEntry> {
    let mut out: Vec<PackageEntry> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for entry in entries {
        match index.get(&entry.name) {
            None => {
                index.insert(entry.name.clone(), out.len());
                out.push(entry);
            }
            Some(&pos) => match policy {
                DuplicatePolicy::FirstWins => {}
                DuplicatePolicy::Coalesce => {
                    let existing = &mut out[pos];
                    existing.version = format!("{},{}", existing.version, entry.version);
                }
            },
        }
    }
    out
}

/// Compare two snapshots by package name.
///
/// Versions are compared as opaque strings: any change, including a pure
/// formatting change, counts as an update.
pub fn diff(previous: &[PackageEntry], next: &[PackageEntry]) -> SbomDiff {
    let old: BTreeMap<&str, &str> = previous
        .iter()
        .map(|p| (p.name.as_str(), p.version.as_str()))
        .collect();
    let new: BTreeMap<&str, &str> = next
        .iter()
        .map(|p| (p.name.as_str(), p.version.as_str()))
        .collect();

    let mut result = SbomDiff::default();
    for (name, version) in &new {
        match old.get(name) {
            None => result.added.push(PackageEntry::new(*name, *version)),
            Some(old_version) if old_version != version => {
                result.updated.push(UpdatedPackage {
                    name: name.to_string(),
                    old_version: old_version.to_string(),
                    new_version: version.to_string(),
                })
            }
            Some(_) => {}
        }
    }
    for (name, version) in &old {
        if !new.contains_key(name) {
            result.deleted.push(PackageEntry::new(*name, *version));
        }
    }
    result
}
