//! Release hosting through the `gh` CLI.

use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{parse_json, BoundaryError};
use crate::process::{Cmd, Runner};
use crate::release::image::SBOM_FILE;
use crate::release::notes::ReleaseMetadata;

/// Marker `gh release view` prints when the repository has no releases.
const RELEASE_NOT_FOUND: &str = "release not found";

/// The most recent published release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousRelease {
    pub tag_name: String,
    /// Download URL of the release's SBOM asset, if it has one.
    pub sbom_url: Option<String>,
}

/// Operations the publisher needs from the release host.
pub trait ReleaseHost {
    /// `Ok(None)` when nothing has been released yet.
    fn latest_release(&self) -> Result<Option<PreviousRelease>>;

    /// Download a published asset as text.
    fn fetch_text(&self, url: &str) -> Result<String>;

    fn create_release(&self, release: &ReleaseMetadata, notes_file: &Path) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ReleaseView {
    assets: Vec<ReleaseAsset>,
    #[serde(rename = "tagName")]
    tag_name: String,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    url: String,
}

/// Parse `gh release view --json assets,tagName` output.
pub fn parse_release_view(text: &str) -> Result<PreviousRelease, BoundaryError> {
    let view: ReleaseView = parse_json("gh release view", text)?;
    for asset in &view.assets {
        if Url::parse(&asset.url).is_err() {
            return Err(BoundaryError::Schema {
                source_name: "gh release view".to_string(),
                reason: format!("asset url '{}' is not a URL", asset.url),
            });
        }
    }
    let sbom_url = view
        .assets
        .into_iter()
        .map(|a| a.url)
        .find(|url| url.ends_with(SBOM_FILE));
    Ok(PreviousRelease {
        tag_name: view.tag_name,
        sbom_url,
    })
}

/// [`ReleaseHost`] backed by `gh` for release metadata and reqwest for
/// asset downloads.
pub struct GhCli<'a> {
    runner: &'a dyn Runner,
    http: reqwest::blocking::Client,
}

impl<'a> GhCli<'a> {
    pub fn new(runner: &'a dyn Runner) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent(concat!("wsl-distro-builder/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Ok(Self { runner, http })
    }
}

impl ReleaseHost for GhCli<'_> {
    fn latest_release(&self) -> Result<Option<PreviousRelease>> {
        let output = Cmd::new("gh")
            .args(["release", "view", "--json", "assets,tagName"])
            .allow_fail()
            .run(self.runner)?;

        if !output.success() {
            let combined = output.combined();
            if combined.contains(RELEASE_NOT_FOUND) {
                return Ok(None);
            }
            bail!(
                "gh release view failed (exit {:?}): {}",
                output.code,
                combined.trim()
            );
        }

        Ok(Some(parse_release_view(&output.stdout)?))
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        tracing::debug!(%url, "downloading release asset");
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("requesting {url}"))?
            .error_for_status()
            .with_context(|| format!("downloading {url}"))?;
        response
            .text()
            .with_context(|| format!("reading body of {url}"))
    }

    fn create_release(&self, release: &ReleaseMetadata, notes_file: &Path) -> Result<()> {
        let mut cmd = Cmd::new("gh")
            .args(["release", "create", release.tag.as_str()])
            .args(["--title", release.title.as_str()])
            .arg("-F")
            .arg_path(notes_file);
        for asset in &release.assets {
            cmd = cmd.arg_path(asset);
        }
        cmd.interactive()
            .run(self.runner)
            .with_context(|| format!("creating release {}", release.tag))?;
        Ok(())
    }
}
