//! Release publishing pipeline.
//!
//! ```text
//! versions ──▶ image ──▶ sbom diff ──▶ decide ──▶ gh release create
//!                                        │
//!                                        └─▶ unchanged: remove dist/, stop
//! ```
//!
//! Every stage is strictly sequential. External tools run through a
//! [`Runner`](crate::process::Runner) and the release host sits behind
//! [`ReleaseHost`] so the whole pipeline can be exercised without network
//! or docker.

pub mod host;
pub mod image;
pub mod notes;
pub mod sbom;
pub mod settings;
pub mod versions;

use anyhow::{bail, Context, Result};
use std::fs;
use time::Date;

use crate::process::Runner;
use host::ReleaseHost;
use image::BuildArtifacts;
use notes::{ArtifactSummary, CompareLink, PackageChanges, ReleaseMetadata};
use sbom::{PackageEntry, SbomDiff};
use settings::ReleaseSettings;
use versions::VersionSet;

const NOTES_FILE: &str = "notes.md";

/// Per-run inputs that are not part of [`ReleaseSettings`].
#[derive(Debug, Clone)]
pub struct PublishOptions {
    pub settings: ReleaseSettings,
    /// Full sha of the commit being built.
    pub commit: Option<String>,
    /// `owner/name`, used for compare links.
    pub repository: Option<String>,
    /// Render and log the release but do not create it.
    pub dry_run: bool,
    /// Release date (UTC).
    pub date: Date,
}

impl PublishOptions {
    /// Commit to stamp into tags, only when publishing is commit-aware.
    fn tag_commit(&self) -> Option<&str> {
        if self.settings.commit_aware {
            self.commit.as_deref()
        } else {
            None
        }
    }
}

/// Why a release is (or is not) published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishDecision {
    /// Nothing published before.
    Initial,
    /// Package set differs from the last release.
    PackagesChanged,
    /// Same packages, different source commit.
    NewCommit,
    Unchanged,
}

impl PublishDecision {
    pub fn publishes(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Final state of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Published { tag: String },
    DryRun { tag: String },
    /// No difference from the last release; build output was removed.
    Unchanged,
}

/// Decide whether a build that has a previous release should be published.
///
/// In commit-aware mode a previous release without a recorded commit counts
/// as a different commit.
pub fn decide(
    diff: &SbomDiff,
    previous_commit: Option<&str>,
    current_commit: Option<&str>,
) -> PublishDecision {
    if !diff.is_empty() {
        return PublishDecision::PackagesChanged;
    }
    match (previous_commit, current_commit) {
        (_, None) => PublishDecision::Unchanged,
        (Some(prev), Some(cur)) if notes::same_commit(prev, cur) => PublishDecision::Unchanged,
        _ => PublishDecision::NewCommit,
    }
}

/// Run the whole pipeline: resolve, build, diff, publish.
pub fn run_release(
    runner: &dyn Runner,
    host: &dyn ReleaseHost,
    options: &PublishOptions,
) -> Result<ReleaseOutcome> {
    if options.settings.commit_aware && options.commit.is_none() {
        bail!("commit-aware publishing needs the current commit (--commit or GITHUB_SHA)");
    }

    let versions = versions::resolve_versions(
        runner,
        &options.settings.sources,
        options.settings.channel,
    )?;
    let artifacts = image::build_image(runner, &options.settings, &versions)?;
    publish_build(host, options, &versions, &artifacts)
}

/// Compare a finished build against the last release and publish if needed.
pub fn publish_build(
    host: &dyn ReleaseHost,
    options: &PublishOptions,
    versions: &VersionSet,
    artifacts: &BuildArtifacts,
) -> Result<ReleaseOutcome> {
    let policy = options.settings.duplicates;
    let next = sbom::read_sbom_file(&artifacts.sbom, policy)?;
    let current_commit = options.tag_commit();

    let previous = host.latest_release().context("querying the latest release")?;
    let previous = match previous {
        Some(prev) => match prev.sbom_url.clone() {
            Some(url) => Some((prev, url)),
            None => {
                tracing::warn!(tag = %prev.tag_name, "previous release has no SBOM asset");
                None
            }
        },
        None => None,
    };

    let Some((previous, sbom_url)) = previous else {
        tracing::info!(decision = ?PublishDecision::Initial, "no previous release to compare against");
        return publish(
            host,
            options,
            versions,
            artifacts,
            PackageChanges::Initial(&next),
            None,
        );
    };

    let text = host
        .fetch_text(&sbom_url)
        .context("downloading the previous release SBOM")?;
    let old: Vec<PackageEntry> = sbom::parse_sbom(&sbom_url, &text, policy)?;
    let diff = sbom::diff(&old, &next);
    let previous_commit = notes::commit_from_tag(&previous.tag_name);

    let decision = decide(&diff, previous_commit, current_commit);
    tracing::info!(
        previous = %previous.tag_name,
        added = diff.added.len(),
        updated = diff.updated.len(),
        deleted = diff.deleted.len(),
        ?decision,
        "compared against previous release"
    );

    if !decision.publishes() {
        tracing::info!("no difference from the latest release, cleaning up");
        remove_output(options)?;
        return Ok(ReleaseOutcome::Unchanged);
    }

    let compare = match (&options.repository, previous_commit, current_commit) {
        (Some(repository), Some(from), Some(to)) => Some(CompareLink {
            repository: repository.clone(),
            from: from.to_string(),
            to: notes::short_sha(to).to_string(),
        }),
        _ => None,
    };

    publish(
        host,
        options,
        versions,
        artifacts,
        PackageChanges::Diff(&diff),
        compare.as_ref(),
    )
}

fn publish(
    host: &dyn ReleaseHost,
    options: &PublishOptions,
    versions: &VersionSet,
    artifacts: &BuildArtifacts,
    changes: PackageChanges<'_>,
    compare: Option<&CompareLink>,
) -> Result<ReleaseOutcome> {
    let settings = &options.settings;
    let commit = options.tag_commit();
    let file_name = artifacts
        .archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    let release = ReleaseMetadata {
        tag: notes::release_tag(&versions.distribution, options.date, commit),
        title: notes::release_title(
            &settings.distro_name,
            &versions.distribution,
            options.date,
            commit,
        ),
        notes: notes::render_notes(
            changes,
            compare,
            Some(ArtifactSummary {
                file_name,
                sha256: &artifacts.archive_sha256,
            }),
        ),
        assets: artifacts.assets(),
    };

    let notes_file = settings.dist_dir.join(NOTES_FILE);
    fs::write(&notes_file, &release.notes)
        .with_context(|| format!("writing release notes '{}'", notes_file.display()))?;

    if options.dry_run {
        tracing::info!(tag = %release.tag, title = %release.title, "dry run, not publishing");
        println!("{}", release.notes);
        return Ok(ReleaseOutcome::DryRun { tag: release.tag });
    }

    tracing::info!(tag = %release.tag, "publishing release");
    host.create_release(&release, &notes_file)?;
    Ok(ReleaseOutcome::Published { tag: release.tag })
}

fn remove_output(options: &PublishOptions) -> Result<()> {
    let dist = &options.settings.dist_dir;
    if dist.exists() {
        fs::remove_dir_all(dist)
            .with_context(|| format!("removing build output '{}'", dist.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::host::PreviousRelease;
    use super::*;
    use crate::process::fake::FakeRunner;
    use crate::process::CmdOutput;
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;
    use time::Month;

    struct FakeHost {
        previous: Option<PreviousRelease>,
        previous_sbom: String,
        created: RefCell<Vec<ReleaseMetadata>>,
    }

    impl FakeHost {
        fn new(previous: Option<PreviousRelease>, previous_sbom: &str) -> Self {
            Self {
                previous,
                previous_sbom: previous_sbom.to_string(),
                created: RefCell::new(Vec::new()),
            }
        }
    }

    impl ReleaseHost for FakeHost {
        fn latest_release(&self) -> Result<Option<PreviousRelease>> {
            Ok(self.previous.clone())
        }

        fn fetch_text(&self, _url: &str) -> Result<String> {
            Ok(self.previous_sbom.clone())
        }

        fn create_release(&self, release: &ReleaseMetadata, notes_file: &Path) -> Result<()> {
            assert!(notes_file.is_file());
            self.created.borrow_mut().push(release.clone());
            Ok(())
        }
    }

    fn sbom_json(packages: &[(&str, &str)]) -> String {
        let list = packages
            .iter()
            .map(|(n, v)| format!(r#"{{"name":"{n}","versionInfo":"{v}"}}"#))
            .collect::<Vec<_>>()
            .join(",");
        format!(r#"{{"predicate":{{"packages":[{list}]}}}}"#)
    }

    fn previous(tag: &str) -> Option<PreviousRelease> {
        Some(PreviousRelease {
            tag_name: tag.to_string(),
            sbom_url: Some(format!("https://example.invalid/{tag}/sbom.spdx.json")),
        })
    }

    fn options(temp: &TempDir, commit_aware: bool, commit: Option<&str>) -> PublishOptions {
        PublishOptions {
            settings: ReleaseSettings {
                dist_dir: temp.path().join("dist"),
                build_context: temp.path().join("src"),
                commit_aware,
                ..ReleaseSettings::default()
            },
            commit: commit.map(str::to_string),
            repository: Some("o/r".to_string()),
            dry_run: false,
            date: Date::from_calendar_date(2024, Month::October, 16).unwrap(),
        }
    }

    fn versions() -> VersionSet {
        VersionSet {
            distribution: "42".into(),
            runtime: "2.1.1".into(),
            companion: "0.10.0".into(),
        }
    }

    /// Lay out dist/ as a finished build would.
    fn fake_artifacts(opts: &PublishOptions, packages: &[(&str, &str)]) -> BuildArtifacts {
        let dist = &opts.settings.dist_dir;
        fs::create_dir_all(dist).unwrap();
        let archive = dist.join("wsl-rootfs-fedora_42.tar.gz");
        let provenance = dist.join(image::PROVENANCE_FILE);
        let sbom = dist.join(image::SBOM_FILE);
        fs::write(&archive, b"rootfs").unwrap();
        fs::write(&provenance, b"{}").unwrap();
        fs::write(&sbom, sbom_json(packages)).unwrap();
        BuildArtifacts {
            archive,
            provenance,
            sbom,
            archive_sha256: "feed".into(),
            archive_size: 6,
        }
    }

    #[test]
    fn test_decide() {
        let changed = SbomDiff {
            added: vec![PackageEntry::new("curl", "8.0")],
            ..SbomDiff::default()
        };
        let same = SbomDiff::default();

        assert_eq!(decide(&changed, None, None), PublishDecision::PackagesChanged);
        assert_eq!(decide(&same, None, None), PublishDecision::Unchanged);
        assert_eq!(
            decide(&same, Some("0123456"), Some("0123456789")),
            PublishDecision::Unchanged
        );
        assert_eq!(
            decide(&same, Some("0123456"), Some("89abcdef")),
            PublishDecision::NewCommit
        );
        assert_eq!(decide(&same, None, Some("89abcdef")), PublishDecision::NewCommit);
        assert!(PublishDecision::Initial.publishes());
    }

    #[test]
    fn test_initial_release_lists_all_packages() {
        let temp = TempDir::new().unwrap();
        let opts = options(&temp, false, None);
        let artifacts = fake_artifacts(&opts, &[("bash", "5.2"), ("curl", "8.0")]);
        let host = FakeHost::new(None, "");

        let outcome = publish_build(&host, &opts, &versions(), &artifacts).unwrap();
        assert_eq!(
            outcome,
            ReleaseOutcome::Published {
                tag: "42-20241016".into()
            }
        );

        let created = host.created.borrow();
        assert_eq!(created[0].title, "Fedora 42 - 20241016");
        assert!(created[0].notes.contains("## Initial\n- bash: 5.2\n- curl: 8.0\n"));
        assert_eq!(created[0].assets.len(), 3);
        assert_eq!(
            fs::read_to_string(opts.settings.dist_dir.join(NOTES_FILE)).unwrap(),
            created[0].notes
        );
    }

    #[test]
    fn test_release_without_sbom_asset_is_initial() {
        let temp = TempDir::new().unwrap();
        let opts = options(&temp, false, None);
        let artifacts = fake_artifacts(&opts, &[("bash", "5.2")]);
        let host = FakeHost::new(
            Some(PreviousRelease {
                tag_name: "41-20240101".into(),
                sbom_url: None,
            }),
            "",
        );

        publish_build(&host, &opts, &versions(), &artifacts).unwrap();
        assert!(host.created.borrow()[0].notes.contains("## Initial"));
    }

    #[test]
    fn test_changed_packages_publish() {
        let temp = TempDir::new().unwrap();
        let opts = options(&temp, false, None);
        let artifacts = fake_artifacts(&opts, &[("bash", "5.2"), ("curl", "8.0")]);
        let host = FakeHost::new(previous("41-20241001"), &sbom_json(&[("bash", "5.1")]));

        let outcome = publish_build(&host, &opts, &versions(), &artifacts).unwrap();
        assert!(matches!(outcome, ReleaseOutcome::Published { .. }));

        let notes = &host.created.borrow()[0].notes;
        assert!(notes.contains("## Added\n- curl: 8.0\n"));
        assert!(notes.contains("## Updated\n- bash: 5.1 => 5.2\n"));
        assert!(!notes.contains("## Deleted"));
    }

    #[test]
    fn test_identical_build_is_not_published_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let opts = options(&temp, true, Some("0123456789abcdef"));
        let packages = [("bash", "5.2")];
        let artifacts = fake_artifacts(&opts, &packages);
        let host = FakeHost::new(previous("42-20241001-0123456"), &sbom_json(&packages));

        let outcome = publish_build(&host, &opts, &versions(), &artifacts).unwrap();
        assert_eq!(outcome, ReleaseOutcome::Unchanged);
        assert!(host.created.borrow().is_empty());
        assert!(!opts.settings.dist_dir.exists());
    }

    #[test]
    fn test_new_commit_publishes_with_compare_link() {
        let temp = TempDir::new().unwrap();
        let opts = options(&temp, true, Some("89abcdef01234567"));
        let packages = [("bash", "5.2")];
        let artifacts = fake_artifacts(&opts, &packages);
        let host = FakeHost::new(previous("42-20241001-0123456"), &sbom_json(&packages));

        let outcome = publish_build(&host, &opts, &versions(), &artifacts).unwrap();
        assert_eq!(
            outcome,
            ReleaseOutcome::Published {
                tag: "42-20241016-89abcde".into()
            }
        );
        let created = host.created.borrow();
        assert_eq!(created[0].title, "Fedora 42 - 20241016 (89abcde)");
        assert!(created[0].notes.contains("No package changes."));
        assert!(created[0]
            .notes
            .contains("https://github.com/o/r/compare/0123456...89abcde"));
    }

    #[test]
    fn test_dry_run_does_not_create() {
        let temp = TempDir::new().unwrap();
        let mut opts = options(&temp, false, None);
        opts.dry_run = true;
        let artifacts = fake_artifacts(&opts, &[("bash", "5.2")]);
        let host = FakeHost::new(None, "");

        let outcome = publish_build(&host, &opts, &versions(), &artifacts).unwrap();
        assert_eq!(
            outcome,
            ReleaseOutcome::DryRun {
                tag: "42-20241016".into()
            }
        );
        assert!(host.created.borrow().is_empty());
    }

    #[test]
    fn test_malformed_previous_sbom_is_fatal() {
        let temp = TempDir::new().unwrap();
        let opts = options(&temp, false, None);
        let artifacts = fake_artifacts(&opts, &[("bash", "5.2")]);
        let host = FakeHost::new(previous("41-20241001"), "<html>rate limited</html>");

        let err = publish_build(&host, &opts, &versions(), &artifacts).unwrap_err();
        assert!(err.downcast_ref::<crate::error::BoundaryError>().is_some());
    }

    #[test]
    fn test_commit_aware_requires_commit() {
        let temp = TempDir::new().unwrap();
        let opts = options(&temp, true, None);
        let runner = FakeRunner::succeeding();
        let host = FakeHost::new(None, "");
        let err = run_release(&runner, &host, &opts).unwrap_err().to_string();
        assert!(err.contains("GITHUB_SHA"));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_run_release_end_to_end() {
        let temp = TempDir::new().unwrap();
        let opts = options(&temp, false, None);
        let dist: PathBuf = opts.settings.dist_dir.clone();
        let runner = FakeRunner::new(move |cmd| match cmd.program() {
            "skopeo" if cmd.display().contains("fedora") => {
                CmdOutput::ok(r#"{"Tags":["40","41","42","latest"]}"#)
            }
            "skopeo" if cmd.display().contains("deno") => {
                CmdOutput::ok(r#"{"Tags":["bin-2.1.1"]}"#)
            }
            "skopeo" => CmdOutput::ok(r#"{"Tags":["0.10.0"]}"#),
            "docker" => {
                image::test_support::write_rootfs_tar(
                    &dist.join("wsl-rootfs-fedora_42.tar"),
                    Some(sbom_json(&[("bash", "5.2"), ("curl", "8.0")]).as_str()),
                );
                CmdOutput::ok("")
            }
            other => panic!("unexpected command {other}"),
        });
        let host = FakeHost::new(previous("41-20241001"), &sbom_json(&[("bash", "5.1")]));

        let outcome = run_release(&runner, &host, &opts).unwrap();
        assert_eq!(
            outcome,
            ReleaseOutcome::Published {
                tag: "42-20241016".into()
            }
        );
        let created = host.created.borrow();
        assert!(created[0].assets[0].ends_with("wsl-rootfs-fedora_42.tar.gz"));
        assert!(created[0].notes.contains("- bash: 5.1 => 5.2"));
    }
}
