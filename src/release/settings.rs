use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Which entry of the sorted tag list to pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// Newest matching tag.
    #[default]
    Latest,
    /// One behind the newest matching tag.
    Stable,
}

/// How repeated package names inside one SBOM are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Keep the first entry for a name, drop the rest.
    #[default]
    FirstWins,
    /// Join every version seen for a name with `,`.
    Coalesce,
}

/// One upstream registry repository to resolve a version from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceSpec {
    /// Registry reference without transport, e.g. `docker.io/fedora`.
    pub image: String,
    /// Regex a tag must fully match to be considered.
    pub pattern: String,
    /// Prefix removed from the selected tag.
    #[serde(default)]
    pub strip_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sources {
    pub distribution: SourceSpec,
    pub runtime: SourceSpec,
    pub companion: SourceSpec,
}

impl Default for Sources {
    fn default() -> Self {
        Self {
            distribution: SourceSpec {
                image: "docker.io/fedora".to_string(),
                pattern: r"^\d+$".to_string(),
                strip_prefix: None,
            },
            runtime: SourceSpec {
                image: "docker.io/denoland/deno".to_string(),
                pattern: r"^bin-\d+\.\d+\.\d+$".to_string(),
                strip_prefix: Some("bin-".to_string()),
            },
            companion: SourceSpec {
                image: "ghcr.io/shopify/hansel".to_string(),
                pattern: r"^\d+\.\d+\.\d+$".to_string(),
                strip_prefix: None,
            },
        }
    }
}

/// Resolved publisher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSettings {
    /// Human name of the base distribution, used in titles and file names.
    pub distro_name: String,
    pub channel: Channel,
    pub dist_dir: PathBuf,
    pub build_context: PathBuf,
    pub compress: bool,
    pub commit_aware: bool,
    pub duplicates: DuplicatePolicy,
    pub sources: Sources,
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            distro_name: "Fedora".to_string(),
            channel: Channel::Latest,
            dist_dir: PathBuf::from("dist"),
            build_context: PathBuf::from("src"),
            compress: true,
            commit_aware: false,
            duplicates: DuplicatePolicy::FirstWins,
            sources: Sources::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsToml {
    distro_name: Option<String>,
    channel: Option<Channel>,
    dist_dir: Option<PathBuf>,
    build_context: Option<PathBuf>,
    compress: Option<bool>,
    commit_aware: Option<bool>,
    duplicates: Option<DuplicatePolicy>,
    #[serde(default)]
    sources: SourcesToml,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SourcesToml {
    distribution: Option<SourceSpec>,
    runtime: Option<SourceSpec>,
    companion: Option<SourceSpec>,
}

impl ReleaseSettings {
    /// Load settings from a TOML file, filling omitted keys with defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading release settings '{}'", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("parsing release settings '{}'", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let parsed: SettingsToml = toml::from_str(text)?;
        let defaults = Self::default();

        Ok(Self {
            distro_name: parsed.distro_name.unwrap_or(defaults.distro_name),
            channel: parsed.channel.unwrap_or(defaults.channel),
            dist_dir: parsed.dist_dir.unwrap_or(defaults.dist_dir),
            build_context: parsed.build_context.unwrap_or(defaults.build_context),
            compress: parsed.compress.unwrap_or(defaults.compress),
            commit_aware: parsed.commit_aware.unwrap_or(defaults.commit_aware),
            duplicates: parsed.duplicates.unwrap_or(defaults.duplicates),
            sources: Sources {
                distribution: parsed
                    .sources
                    .distribution
                    .unwrap_or(defaults.sources.distribution),
                runtime: parsed.sources.runtime.unwrap_or(defaults.sources.runtime),
                companion: parsed
                    .sources
                    .companion
                    .unwrap_or(defaults.sources.companion),
            },
        })
    }

    /// File name of the published rootfs archive.
    pub fn archive_file_name(&self, distribution_version: &str) -> String {
        let distro = self.distro_name.to_ascii_lowercase();
        if self.compress {
            format!("wsl-rootfs-{distro}_{distribution_version}.tar.gz")
        } else {
            format!("wsl-rootfs-{distro}_{distribution_version}.tar")
        }
    }
}
