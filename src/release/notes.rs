//! Release tag, title and notes generation.

use std::fmt::Write;
use std::path::PathBuf;
use time::Date;

use crate::release::sbom::{PackageEntry, SbomDiff};

const SHORT_SHA_LEN: usize = 7;

/// Everything `gh release create` needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseMetadata {
    pub tag: String,
    pub title: String,
    pub notes: String,
    pub assets: Vec<PathBuf>,
}

/// What the package section of the notes describes.
#[derive(Debug, Clone, Copy)]
pub enum PackageChanges<'a> {
    /// First release: list every package.
    Initial(&'a [PackageEntry]),
    Diff(&'a SbomDiff),
}

/// Link to the source changes between two published commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareLink {
    pub repository: String,
    pub from: String,
    pub to: String,
}

impl CompareLink {
    pub fn url(&self) -> String {
        format!(
            "https://github.com/{}/compare/{}...{}",
            self.repository, self.from, self.to
        )
    }
}

/// Published archive file name and digest.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactSummary<'a> {
    pub file_name: &'a str,
    pub sha256: &'a str,
}

/// `YYYYMMDD`.
pub fn date_stamp(date: Date) -> String {
    format!(
        "{:04}{:02}{:02}",
        date.year(),
        date.month() as u8,
        date.day()
    )
}

pub fn short_sha(sha: &str) -> &str {
    match sha.char_indices().nth(SHORT_SHA_LEN) {
        Some((idx, _)) => &sha[..idx],
        None => sha,
    }
}

/// `<distribution>-<YYYYMMDD>[-<short sha>]`.
pub fn release_tag(distribution: &str, date: Date, commit: Option<&str>) -> String {
    let mut tag = format!("{distribution}-{}", date_stamp(date));
    if let Some(sha) = commit {
        tag.push('-');
        tag.push_str(short_sha(sha));
    }
    tag
}

/// `<Distro> <distribution> - <YYYYMMDD>[ (<short sha>)]`.
pub fn release_title(
    distro_name: &str,
    distribution: &str,
    date: Date,
    commit: Option<&str>,
) -> String {
    let mut title = format!("{distro_name} {distribution} - {}", date_stamp(date));
    if let Some(sha) = commit {
        let _ = write!(title, " ({})", short_sha(sha));
    }
    title
}

/// Recover the commit suffix from a tag produced by [`release_tag`].
///
/// Tags from before commit-aware publishing have no suffix and yield `None`.
pub fn commit_from_tag(tag: &str) -> Option<&str> {
    let mut parts = tag.rsplitn(3, '-');
    let last = parts.next()?;
    let date = parts.next()?;
    parts.next()?;

    let is_date = date.len() == 8 && date.bytes().all(|b| b.is_ascii_digit());
    let is_sha = last.len() >= SHORT_SHA_LEN && last.bytes().all(|b| b.is_ascii_hexdigit());
    (is_date && is_sha).then_some(last)
}

/// Commit hashes match if one is a prefix of the other (short vs full sha).
pub fn same_commit(a: &str, b: &str) -> bool {
    !a.is_empty() && !b.is_empty() && (a.starts_with(b) || b.starts_with(a))
}

/// Render the Markdown release notes.
pub fn render_notes(
    changes: PackageChanges<'_>,
    compare: Option<&CompareLink>,
    artifact: Option<ArtifactSummary<'_>>,
) -> String {
    let mut out = String::from("# Packages\n");

    match changes {
        PackageChanges::Initial(packages) => {
            out.push_str("\n## Initial\n");
            for p in packages {
                let _ = writeln!(out, "- {}: {}", p.name, p.version);
            }
        }
        PackageChanges::Diff(diff) if diff.is_empty() => {
            out.push_str("\nNo package changes.\n");
        }
        PackageChanges::Diff(diff) => {
            if !diff.added.is_empty() {
                out.push_str("\n## Added\n");
                for p in &diff.added {
                    let _ = writeln!(out, "- {}: {}", p.name, p.version);
                }
            }
            if !diff.updated.is_empty() {
                out.push_str("\n## Updated\n");
                for p in &diff.updated {
                    let _ = writeln!(out, "- {}: {} => {}", p.name, p.old_version, p.new_version);
                }
            }
            if !diff.deleted.is_empty() {
                out.push_str("\n## Deleted\n");
                for p in &diff.deleted {
                    let _ = writeln!(out, "- {}: {}", p.name, p.version);
                }
            }
        }
    }

    if let Some(link) = compare {
        let _ = write!(out, "\n# Changes\n\n{}\n", link.url());
    }

    if let Some(artifact) = artifact {
        let _ = write!(
            out,
            "\n# Artifact\n\n- {}\n- sha256: `{}`\n",
            artifact.file_name, artifact.sha256
        );
    }

    out
}
