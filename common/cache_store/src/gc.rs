// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use locks::{Lock, LockMode};

/// Historical name patterns predating the `deploy-*`/`tmp-*` convention,
/// cleaned up opportunistically alongside a regular GC pass.
const LEGACY_PATTERNS: &[&str] = &[
    "scout_before_",
    "soldier_before_",
    ".scout_",
    ".soldier_",
];

#[derive(Debug, Default, Clone)]
pub struct GcStats {
    pub removed: Vec<PathBuf>,
    pub skipped_locked: Vec<PathBuf>,
    pub skipped_kept: Vec<PathBuf>,
}

fn is_candidate_name(name: &str) -> bool {
    name.starts_with("deploy-") || name.starts_with("tmp-")
}

fn same_inode(a: &Path, b: &Path) -> bool {
    match (std::fs::metadata(a), std::fs::metadata(b)) {
        (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
        _ => false,
    }
}

/// Runs garbage collection on `cache_dir`, holding a write lock on
/// `cache_dir/.ref` for the duration. `current_deployment`, if given, is the
/// session's own deployment directory: it is compared by inode identity (not
/// string) so it survives renames, and is never removed even if some other
/// process could momentarily win the write-lock race on it.
pub fn gc(cache_dir: &Path, current_deployment: Option<&Path>) -> Result<GcStats> {
    let cache_ref = cache_dir.join(".ref");
    let _write_lock = Lock::acquire_blocking(None, &cache_ref, LockMode::Write, true)
        .with_context(|| format!("failed to take GC write lock on {}", cache_ref.display()))?;

    let mut stats = GcStats::default();

    let entries = std::fs::read_dir(cache_dir)
        .with_context(|| format!("failed to list {}", cache_dir.display()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        if !is_candidate_name(&name) {
            continue;
        }

        if path.join("keep").exists() {
            stats.skipped_kept.push(path);
            continue;
        }

        if let Some(current) = current_deployment {
            if same_inode(&path, current) {
                continue;
            }
        }

        let entry_ref = path.join(".ref");
        match Lock::try_acquire(None, &entry_ref, LockMode::Write, true)? {
            Some(lock) => {
                // Holding the write lock proves no reader has it open; safe
                // to remove. Drop explicitly before deleting the lock file
                // itself is fine since `remove_dir_all_with_chmod` unlinks
                // the whole tree atomically from our perspective.
                drop(lock);
                fileutil::remove_dir_all_with_chmod(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                stats.removed.push(path);
            }
            None => {
                stats.skipped_locked.push(path);
            }
        }
    }

    legacy_cleanup(cache_dir, &mut stats)?;

    Ok(stats)
}

/// Walks up to two parent directories looking for dangling historical
/// `scout`/`soldier` symlinks and directories matching [`LEGACY_PATTERNS`].
/// Best-effort: any single failure is logged and skipped, never fatal.
fn legacy_cleanup(cache_dir: &Path, stats: &mut GcStats) -> Result<()> {
    let mut dirs = vec![cache_dir.to_path_buf()];
    if let Some(parent) = cache_dir.parent() {
        dirs.push(parent.to_path_buf());
        if let Some(grandparent) = parent.parent() {
            dirs.push(grandparent.to_path_buf());
        }
    }

    for dir in dirs {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let path = entry.path();

            let matches_legacy_pattern = LEGACY_PATTERNS.iter().any(|p| name.starts_with(p));
            let is_dangling_symlink = (name == "scout" || name == "soldier")
                && std::fs::symlink_metadata(&path).is_ok()
                && !path.exists();

            if matches_legacy_pattern && path.is_dir() {
                if let Err(e) = fileutil::remove_dir_all_with_chmod(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "legacy cleanup failed");
                    continue;
                }
                stats.removed.push(path);
            } else if is_dangling_symlink {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "legacy symlink cleanup failed");
                    continue;
                }
                stats.removed.push(path);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch_ref(path: &Path) {
        fs::create_dir_all(path).unwrap();
        fs::write(path.join(".ref"), b"").unwrap();
    }

    #[test]
    fn removes_unused_entries_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = dir.path();
        fs::write(cache.join(".ref"), b"")?;

        let deploy_a = cache.join("deploy-A");
        let deploy_b = cache.join("deploy-B");
        let deploy_c = cache.join("deploy-C");
        touch_ref(&deploy_a);
        touch_ref(&deploy_b);
        touch_ref(&deploy_c);
        fs::write(deploy_c.join("keep"), b"")?;

        // Hold a read lock on deploy-A to simulate it being the current session.
        let _held = Lock::acquire_blocking(None, &deploy_a.join(".ref"), LockMode::Read, true)?;

        let stats = gc(cache, Some(&deploy_a))?;

        assert!(deploy_a.exists(), "A should survive (current deployment)");
        assert!(!deploy_b.exists(), "B should be removed (unused)");
        assert!(deploy_c.exists(), "C should survive (kept)");
        assert_eq!(stats.removed, vec![deploy_b]);

        Ok(())
    }

    #[test]
    fn read_lock_prevents_removal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = dir.path();
        fs::write(cache.join(".ref"), b"")?;

        let deploy = cache.join("deploy-locked");
        touch_ref(&deploy);
        let _held = Lock::acquire_blocking(None, &deploy.join(".ref"), LockMode::Read, true)?;

        let stats = gc(cache, None)?;
        assert!(deploy.exists());
        assert_eq!(stats.skipped_locked, vec![deploy]);

        Ok(())
    }
}
