//! Build, publish and first-boot provision a Fedora-based WSL distribution.
//!
//! Two flows share this crate:
//!
//! - **Release publishing** ([`release`]) - resolve upstream tags, build the
//!   rootfs with docker buildx, diff its SBOM against the last GitHub
//!   release and publish a new release only when something changed.
//! - **First boot** ([`firstboot`]) - runs inside the imported distribution,
//!   creates the first user and writes a marker so it never runs twice.
//!
//! # Architecture
//!
//! ```text
//! release-publisher (bin)          firstboot (bin)
//!     │                                │
//!     ├── release::versions            ├── firstboot::marker
//!     ├── release::image               ├── firstboot::config / prompt
//!     ├── release::sbom                └── firstboot::executor
//!     ├── release::notes
//!     └── release::host ── gh, HTTPS
//!                 │                    │
//!                 └──── process::Runner ┘  (every external command)
//! ```

pub mod error;
pub mod firstboot;
pub mod preflight;
pub mod process;
pub mod release;
pub mod telemetry;
