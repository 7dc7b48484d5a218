//! Fixed locations first boot reads and writes.
//!
//! All paths hang off a root so tests can point the whole flow at a scratch
//! directory instead of `/`.

use std::path::{Path, PathBuf};

const MARKER: &str = "root/.first-boot";
const WSL_CONF: &str = "etc/wsl.conf";
const SUDOERS_DROPIN: &str = "etc/sudoers.d/wheel";
const OS_RELEASE: &str = "etc/os-release";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostLayout {
    root: PathBuf,
}

impl HostLayout {
    /// The running system.
    pub fn system() -> Self {
        Self::rooted("/")
    }

    pub fn rooted(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Sentinel recording that first boot already ran.
    pub fn marker(&self) -> PathBuf {
        self.root.join(MARKER)
    }

    /// WSL per-distribution settings (`[user] default=...`).
    pub fn wsl_conf(&self) -> PathBuf {
        self.root.join(WSL_CONF)
    }

    pub fn sudoers_dropin(&self) -> PathBuf {
        self.root.join(SUDOERS_DROPIN)
    }

    pub fn os_release(&self) -> PathBuf {
        self.root.join(OS_RELEASE)
    }
}
