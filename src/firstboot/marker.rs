//! One-shot guard for first boot.
//!
//! Only the exact content `complete` blocks a run. Both a finished and a
//! declined first boot end in that state; getting out of it requires
//! deleting the file.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub const COMPLETE: &str = "complete";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    /// No marker file.
    Absent,
    /// Marker exists with any content other than `complete`.
    Incomplete,
    Complete,
}

impl MarkerState {
    /// Whether first boot may still run.
    pub fn is_pending(self) -> bool {
        !matches!(self, Self::Complete)
    }
}

/// Read the marker state. An existing but unreadable marker is an error.
pub fn read_state(path: &Path) -> Result<MarkerState> {
    if !path.exists() {
        return Ok(MarkerState::Absent);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading first boot marker '{}'", path.display()))?;
    if content == COMPLETE {
        Ok(MarkerState::Complete)
    } else {
        Ok(MarkerState::Incomplete)
    }
}

pub fn mark_complete(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating '{}'", parent.display()))?;
    }
    fs::write(path, COMPLETE)
        .with_context(|| format!("writing first boot marker '{}'", path.display()))
}
