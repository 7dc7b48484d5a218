//! Rootfs image build via `docker buildx`.
//!
//! The build exports the image filesystem as a tarball. BuildKit places the
//! SBOM and provenance attestations at the root of that tarball, so the same
//! archive that gets published is also where the SBOM is read from.

use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::process::{Cmd, Runner};
use crate::release::settings::ReleaseSettings;
use crate::release::versions::VersionSet;

pub const PROVENANCE_FILE: &str = "provenance.json";
pub const SBOM_FILE: &str = "sbom.spdx.json";

const BUILD_ARG_DISTRIBUTION: &str = "FEDORA_VERSION";
const BUILD_ARG_RUNTIME: &str = "DENO_VERSION";
const BUILD_ARG_COMPANION: &str = "HANSEL_VERSION";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("image build produced no artifact at {}", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("image build produced an empty artifact at {}", path.display())]
    EmptyArtifact { path: PathBuf },
}

/// Files produced by a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifacts {
    pub archive: PathBuf,
    pub provenance: PathBuf,
    pub sbom: PathBuf,
    pub archive_sha256: String,
    pub archive_size: u64,
}

impl BuildArtifacts {
    /// Release assets in upload order.
    pub fn assets(&self) -> Vec<PathBuf> {
        vec![
            self.archive.clone(),
            self.provenance.clone(),
            self.sbom.clone(),
        ]
    }
}

/// The `docker buildx build` invocation for `versions`.
pub fn build_command(versions: &VersionSet, context: &Path, tar_output: &Path) -> Cmd {
    Cmd::new("docker")
        .args(["buildx", "build", "--sbom=true", "--provenance=true"])
        .arg("--build-arg")
        .arg(format!("{BUILD_ARG_DISTRIBUTION}={}", versions.distribution))
        .arg("--build-arg")
        // The Dockerfile appends this to an image name (`deno:bin-<v>`), hence the dash.
        .arg(format!("{BUILD_ARG_RUNTIME}=-{}", versions.runtime))
        .arg("--build-arg")
        .arg(format!("{BUILD_ARG_COMPANION}={}", versions.companion))
        .arg("--output")
        .arg(format!("type=tar,dest={}", tar_output.display()))
        .arg_path(context)
        .interactive()
        .error_msg("docker buildx build failed; is the buildx plugin installed?")
}

/// Build the image, compress it if configured and pull the attestations out.
pub fn build_image(
    runner: &dyn Runner,
    settings: &ReleaseSettings,
    versions: &VersionSet,
) -> Result<BuildArtifacts> {
    let dist = &settings.dist_dir;
    fs::create_dir_all(dist)
        .with_context(|| format!("creating output directory '{}'", dist.display()))?;

    let archive_name = settings.archive_file_name(&versions.distribution);
    let archive = dist.join(&archive_name);
    let tar_path = if settings.compress {
        dist.join(archive_name.trim_end_matches(".gz"))
    } else {
        archive.clone()
    };

    tracing::info!(
        distribution = %versions.distribution,
        runtime = %versions.runtime,
        companion = %versions.companion,
        "building image"
    );
    build_command(versions, &settings.build_context, &tar_path).run(runner)?;
    verify_artifact(&tar_path)?;

    if settings.compress {
        gzip_file(&tar_path, &archive)?;
        fs::remove_file(&tar_path).with_context(|| {
            format!("removing uncompressed tarball '{}'", tar_path.display())
        })?;
        verify_artifact(&archive)?;
    }

    let (provenance, sbom) = extract_attestations(&archive, dist)?;
    let (archive_sha256, archive_size) = sha256_file(&archive)?;
    tracing::info!(
        archive = %archive.display(),
        size_mb = archive_size / 1024 / 1024,
        sha256 = %archive_sha256,
        "image built"
    );

    Ok(BuildArtifacts {
        archive,
        provenance,
        sbom,
        archive_sha256,
        archive_size,
    })
}

/// Fail unless `path` is a non-empty regular file.
pub fn verify_artifact(path: &Path) -> Result<(), BuildError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        Ok(meta) if meta.is_file() => Err(BuildError::EmptyArtifact {
            path: path.to_path_buf(),
        }),
        _ => Err(BuildError::MissingArtifact {
            path: path.to_path_buf(),
        }),
    }
}

/// Gzip `src` into `dst`.
pub fn gzip_file(src: &Path, dst: &Path) -> Result<()> {
    let input =
        File::open(src).with_context(|| format!("opening '{}' for compression", src.display()))?;
    let output =
        File::create(dst).with_context(|| format!("creating '{}'", dst.display()))?;

    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    io::copy(&mut BufReader::new(input), &mut encoder)
        .with_context(|| format!("compressing '{}'", src.display()))?;
    encoder
        .finish()
        .with_context(|| format!("finishing '{}'", dst.display()))?;
    Ok(())
}

/// Copy the provenance and SBOM documents out of `archive` into `dest`.
///
/// The archive may be plain or gzip-compressed; it is only read.
pub fn extract_attestations(archive: &Path, dest: &Path) -> Result<(PathBuf, PathBuf)> {
    let reader = open_maybe_gzip(archive)?;
    let mut tar = tar::Archive::new(reader);

    let mut provenance = None;
    let mut sbom = None;
    for entry in tar
        .entries()
        .with_context(|| format!("reading archive '{}'", archive.display()))?
    {
        let mut entry =
            entry.with_context(|| format!("reading entry of '{}'", archive.display()))?;
        let path = entry.path()?.into_owned();
        let name = path.strip_prefix("./").unwrap_or(&path);

        let slot = if name == Path::new(PROVENANCE_FILE) {
            &mut provenance
        } else if name == Path::new(SBOM_FILE) {
            &mut sbom
        } else {
            continue;
        };

        let target = dest.join(name);
        entry
            .unpack(&target)
            .with_context(|| format!("extracting '{}'", target.display()))?;
        *slot = Some(target);

        if provenance.is_some() && sbom.is_some() {
            break;
        }
    }

    match (provenance, sbom) {
        (Some(p), Some(s)) => Ok((p, s)),
        (None, _) => bail!(
            "'{}' has no {PROVENANCE_FILE}; was the build run with --provenance=true?",
            archive.display()
        ),
        (_, None) => bail!(
            "'{}' has no {SBOM_FILE}; was the build run with --sbom=true?",
            archive.display()
        ),
    }
}

fn open_maybe_gzip(path: &Path) -> Result<Box<dyn Read>> {
    let mut file = File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    let file = File::open(path).with_context(|| format!("reopening '{}'", path.display()))?;
    if read == 2 && magic == [0x1f, 0x8b] {
        Ok(Box::new(GzDecoder::new(BufReader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}
