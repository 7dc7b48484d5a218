use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use time::OffsetDateTime;
use tracing::Level;

use wsl_distro_builder::preflight;
use wsl_distro_builder::process::SystemRunner;
use wsl_distro_builder::release::host::GhCli;
use wsl_distro_builder::release::image::BuildError;
use wsl_distro_builder::release::settings::{Channel, DuplicatePolicy, ReleaseSettings};
use wsl_distro_builder::release::{run_release, PublishOptions, ReleaseOutcome};
use wsl_distro_builder::telemetry;

/// Exit code for a build that produced no usable rootfs archive.
const EXIT_BUILD_ARTIFACT: u8 = 255;

/// Build the WSL rootfs image and publish it as a GitHub release when its
/// packages (or source commit) changed since the last release.
#[derive(Debug, Parser)]
#[command(name = "release-publisher", version)]
struct Args {
    /// Settings file (TOML). Defaults apply when omitted.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Which distribution release to track.
    #[arg(long, value_enum)]
    channel: Option<Channel>,

    /// Output directory for the archive, SBOM and provenance.
    #[arg(long = "dist")]
    dist_dir: Option<PathBuf>,

    /// Docker build context.
    #[arg(long = "context")]
    build_context: Option<PathBuf>,

    /// Commit being built.
    #[arg(long, env = "GITHUB_SHA")]
    commit: Option<String>,

    /// `owner/name` of the repository, for compare links.
    #[arg(long, env = "GITHUB_REPOSITORY")]
    repository: Option<String>,

    /// How to treat a package listed twice in an SBOM.
    #[arg(long, value_enum)]
    duplicates: Option<DuplicatePolicy>,

    /// Publish when only the source commit changed; stamps tags with it.
    #[arg(long)]
    commit_aware: bool,

    /// Ship the plain tar instead of gzip.
    #[arg(long)]
    no_compress: bool,

    /// Render the release without creating it.
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    skip_preflight: bool,

    /// Log as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn settings(&self) -> Result<ReleaseSettings> {
        let mut settings = match &self.settings {
            Some(path) => ReleaseSettings::load(path)?,
            None => ReleaseSettings::default(),
        };
        if let Some(channel) = self.channel {
            settings.channel = channel;
        }
        if let Some(dir) = &self.dist_dir {
            settings.dist_dir = dir.clone();
        }
        if let Some(dir) = &self.build_context {
            settings.build_context = dir.clone();
        }
        if let Some(policy) = self.duplicates {
            settings.duplicates = policy;
        }
        if self.commit_aware {
            settings.commit_aware = true;
        }
        if self.no_compress {
            settings.compress = false;
        }
        Ok(settings)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    telemetry::init_tracing(args.json_logs, Level::INFO);

    match run(&args) {
        Ok(outcome) => {
            match outcome {
                ReleaseOutcome::Published { tag } => tracing::info!(%tag, "release published"),
                ReleaseOutcome::DryRun { tag } => tracing::info!(%tag, "dry run, release not created"),
                ReleaseOutcome::Unchanged => tracing::info!("nothing to release"),
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!("{err:#}");
            if err.downcast_ref::<BuildError>().is_some() {
                ExitCode::from(EXIT_BUILD_ARTIFACT)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(args: &Args) -> Result<ReleaseOutcome> {
    let settings = args.settings()?;
    if !args.skip_preflight {
        preflight::check_publisher_tools().context("preflight")?;
    }

    let options = PublishOptions {
        settings,
        commit: args.commit.clone().filter(|c| !c.is_empty()),
        repository: args.repository.clone().filter(|r| !r.is_empty()),
        dry_run: args.dry_run,
        date: OffsetDateTime::now_utc().date(),
    };

    let runner = SystemRunner;
    let host = GhCli::new(&runner)?;
    run_release(&runner, &host, &options)
}
