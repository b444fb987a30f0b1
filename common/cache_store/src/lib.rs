// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The variable cache directory: `deploy-<id>/` deployments and `tmp-XXXXXX/`
//! transients, guarded by advisory locks from [`locks`], garbage-collected
//! under a write lock, and populated either by external deployment or by
//! unpacking a `*.tar.gz` archive.

mod deployment;
mod error;
mod gc;
mod unpack;

pub use deployment::*;
pub use error::PrepError;
pub use gc::*;
pub use unpack::*;

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// The cache root: created 0700 if absent.
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    pub fn open_or_create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            std::fs::create_dir_all(&root)
                .with_context(|| format!("failed to create cache directory {}", root.display()))?;
            std::fs::set_permissions(&root, std::fs::Permissions::from_mode(0o700))
                .context("failed to set cache directory permissions")?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn deployment_path(&self, build_id: &str) -> PathBuf {
        deployment_path(&self.root, build_id)
    }

    pub fn gc(&self, current_deployment: Option<&Path>) -> Result<GcStats> {
        gc(&self.root, current_deployment)
    }

    pub fn unpack_archive(&self, source: &ArchiveSource) -> Result<PathBuf> {
        unpack_archive(&self.root, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_cache_dir_with_restricted_permissions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let root = dir.path().join("var");
        let store = CacheStore::open_or_create(&root)?;
        let mode = std::fs::metadata(store.root())?.permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        Ok(())
    }
}
