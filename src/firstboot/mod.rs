//! First boot provisioning for a freshly imported WSL distribution.
//!
//! Runs as root on first login: checks the marker, resolves a
//! [`ProvisioningConfig`](config::ProvisioningConfig) from `--config` or
//! interactive prompts, applies it, and asks WSL to restart the
//! distribution so the new default user takes effect.

pub mod config;
pub mod executor;
pub mod layout;
pub mod marker;
pub mod prompt;

use anyhow::Result;
use std::io::Write;

use crate::process::Runner;
use config::ConfigBuilder;
use executor::Executor;
use layout::HostLayout;
use marker::MarkerState;
use prompt::{Interactive, Prompter};

/// Exit code when first boot already completed.
pub const EXIT_ALREADY_COMPLETE: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstbootOutcome {
    /// Marker says complete; nothing was touched.
    AlreadyComplete,
    /// Operator declined or config asked to skip; marker written.
    Skipped,
    Provisioned,
}

impl FirstbootOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::AlreadyComplete => EXIT_ALREADY_COMPLETE,
            Self::Skipped | Self::Provisioned => 0,
        }
    }
}

/// Host handles for one first boot run.
pub struct FirstbootContext<'a> {
    pub runner: &'a dyn Runner,
    pub prompter: &'a dyn Prompter,
    pub layout: HostLayout,
    /// `WSL_DISTRO_NAME`, when running inside WSL.
    pub distro_name: Option<String>,
}

/// Run first boot. `inline_config` is the raw `--config` payload; without
/// it the operator is prompted.
pub fn run_firstboot<W: Write>(
    ctx: &FirstbootContext<'_>,
    inline_config: Option<&str>,
    out: W,
) -> Result<FirstbootOutcome> {
    let marker_path = ctx.layout.marker();
    let state = marker::read_state(&marker_path)?;
    tracing::debug!(?state, marker = %marker_path.display(), "first boot marker");
    if state == MarkerState::Complete {
        ctx.prompter.announce_already_complete()?;
        return Ok(FirstbootOutcome::AlreadyComplete);
    }

    let builder = match inline_config {
        Some(text) => ConfigBuilder::from_json(text)?,
        None => match interactive(ctx)? {
            Interactive::Proceed(builder) => builder,
            Interactive::Declined => return skip(ctx),
        },
    };
    if builder.skips() {
        return skip(ctx);
    }

    let config = builder.build(|| config::host_username(ctx.runner))?;
    Executor::new(ctx.runner, &ctx.layout, out).provision(&config)?;

    executor::request_shutdown(ctx.runner, ctx.distro_name.as_deref())?;
    Ok(FirstbootOutcome::Provisioned)
}

fn interactive(ctx: &FirstbootContext<'_>) -> Result<Interactive> {
    let os_release = ctx.layout.os_release();
    let pretty_name = prompt::read_pretty_name(&os_release).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "no distribution name");
        "Linux".to_string()
    });
    let default_user = config::host_username(ctx.runner)?;
    prompt::collect_interactive(ctx.prompter, &pretty_name, &default_user)
}

fn skip(ctx: &FirstbootContext<'_>) -> Result<FirstbootOutcome> {
    let marker_path = ctx.layout.marker();
    marker::mark_complete(&marker_path)?;
    ctx.prompter.announce_skipped(&marker_path)?;
    tracing::info!("first boot skipped");
    Ok(FirstbootOutcome::Skipped)
}
