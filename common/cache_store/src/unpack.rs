// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use locks::{Lock, LockMode};

use crate::deployment::{deployment_path, validate_build_id};

/// Describes the inputs to an archive unpack: the main archive and its
/// optional sidecars.
#[derive(Debug)]
pub struct ArchiveSource {
    pub archive_path: PathBuf,
    pub build_id: String,
    pub debug_archive_path: Option<PathBuf>,
}

impl ArchiveSource {
    /// Builds an `ArchiveSource` from a main archive path and a build-id
    /// sidecar's already-parsed contents.
    pub fn new(archive_path: PathBuf, build_id: String) -> Result<Self> {
        validate_build_id(&build_id).map_err(anyhow::Error::msg)?;
        if archive_path.extension().and_then(|e| e.to_str()) != Some("gz")
            || !archive_path
                .file_stem()
                .and_then(|s| Path::new(s).extension())
                .map(|e| e == "tar")
                .unwrap_or(false)
        {
            bail!("{} is not a *.tar.gz archive", archive_path.display());
        }
        Ok(Self {
            archive_path,
            build_id,
            debug_archive_path: None,
        })
    }

    pub fn with_debug_archive(mut self, path: PathBuf) -> Self {
        self.debug_archive_path = Some(path);
        self
    }
}

fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    let mut cmd = Command::new("tar");
    cmd.arg("-xzf")
        .arg(archive)
        .arg("-C")
        .arg(dest)
        .arg("--no-same-owner");
    processes::run_and_check(&mut cmd)
        .with_context(|| format!("failed to extract {}", archive.display()))
}

/// Unpacks `source` into `cache_dir`, returning the path to the resulting
/// `deploy-<id>` directory. Fast path: if the deployment already exists,
/// returns it without taking any lock. Slow path: extracts under a blocking
/// write lock on `cache_dir/.ref`, then atomically renames into place.
pub fn unpack_archive(cache_dir: &Path, source: &ArchiveSource) -> Result<PathBuf> {
    let dest = deployment_path(cache_dir, &source.build_id);
    if dest.exists() {
        return Ok(dest);
    }

    std::fs::create_dir_all(cache_dir)?;
    let cache_ref = cache_dir.join(".ref");
    let _write_lock = Lock::acquire_blocking(None, &cache_ref, LockMode::Write, true)
        .context("failed to take cache write lock for archive unpack")?;

    // Re-check: another process may have finished unpacking while we waited
    // for the lock.
    if dest.exists() {
        return Ok(dest);
    }

    let temp = tempfile::Builder::new()
        .prefix("tmp-")
        .rand_bytes(6)
        .tempdir_in(cache_dir)
        .context("failed to create temp directory for unpack")?;

    let result = (|| -> Result<()> {
        extract_tar_gz(&source.archive_path, temp.path())
            .with_context(|| format!("failed to extract {}", source.archive_path.display()))?;

        if let Some(debug_archive) = &source.debug_archive_path {
            let debug_dest = temp.path().join("files/lib/debug");
            if let Err(e) = extract_tar_gz(debug_archive, &debug_dest) {
                tracing::warn!(
                    archive = %debug_archive.display(),
                    error = %e,
                    "debug symbol extraction failed, continuing without it"
                );
            }
        }

        Ok(())
    })();

    match result {
        Ok(()) => {
            let temp_path = temp.into_path();
            std::fs::rename(&temp_path, &dest).with_context(|| {
                format!(
                    "failed to rename {} into place as {}",
                    temp_path.display(),
                    dest.display()
                )
            })?;
            Ok(dest)
        }
        Err(e) => {
            // `temp` drops here, recursively removing the half-extracted tree.
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_tar_gz_archives() {
        let err = ArchiveSource::new(PathBuf::from("runtime.zip"), "0.1.0".into()).unwrap_err();
        assert!(err.to_string().contains("tar.gz"));
    }

    #[test]
    fn rejects_invalid_build_id() {
        assert!(ArchiveSource::new(PathBuf::from("runtime.tar.gz"), "../etc".into()).is_err());
    }

    #[test]
    fn fast_path_skips_extraction_when_already_deployed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = dir.path();
        let existing = deployment_path(cache, "0.1.0");
        std::fs::create_dir_all(&existing)?;

        let source = ArchiveSource::new(PathBuf::from("/nonexistent.tar.gz"), "0.1.0".into())?;
        let result = unpack_archive(cache, &source)?;
        assert_eq!(result, existing);
        Ok(())
    }
}
