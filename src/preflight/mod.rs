//! Preflight checks for host tooling.
//!
//! Both flows shell out to a handful of external tools. Checking for them up
//! front turns a cryptic mid-run spawn error into a list of what to install.
//!
//! # Example
//!
//! ```rust
//! use wsl_distro_builder::preflight::{check_required_tools, command_exists};
//!
//! if !command_exists("skopeo") {
//!     println!("skopeo not installed");
//! }
//!
//! let tools = &[("skopeo", "skopeo"), ("gh", "gh")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};
use nix::unistd::Uid;

use crate::process;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    process::exists(cmd)
}

/// Tools the release publisher needs on the CI host.
///
/// Each tuple is (command_name, package_name).
pub const PUBLISHER_TOOLS: &[(&str, &str)] = &[
    ("skopeo", "skopeo"),
    ("docker", "docker-ce-cli (with buildx plugin)"),
    ("gh", "gh"),
];

/// Tools the first-boot provisioner needs inside the image.
pub const FIRSTBOOT_TOOLS: &[(&str, &str)] = &[
    ("gum", "gum"),
    ("useradd", "shadow-utils"),
    ("passwd", "passwd"),
    ("loginctl", "systemd"),
];

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let mut missing = Vec::new();

    for (tool, package) in tools {
        if !command_exists(tool) {
            missing.push((*tool, *package));
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check that every tool in [`PUBLISHER_TOOLS`] is available.
pub fn check_publisher_tools() -> Result<()> {
    check_required_tools(PUBLISHER_TOOLS)
}

/// Check that every tool in [`FIRSTBOOT_TOOLS`] is available.
pub fn check_firstboot_tools() -> Result<()> {
    check_required_tools(FIRSTBOOT_TOOLS)
}

/// First boot rewrites `/etc` and creates accounts; it has to run as root.
pub fn require_root() -> Result<()> {
    let euid = Uid::effective();
    if !euid.is_root() {
        bail!("first boot must run as root (effective uid is {euid})");
    }
    Ok(())
}
