// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use locks::{Lock, LockMode};
use runtime_source::{read_mtree_file, ClassifiedSource, EntryType, RuntimeKind};

use crate::usrmerge::merge_into_usr;
use crate::MutableSysroot;

/// Top-level names a mutable sysroot symlinks into `usr/` for usrmerge
/// compatibility. `libexec` is excluded even though it matches `lib*`.
fn is_usrmerge_symlink_name(name: &str) -> bool {
    if name == "libexec" {
        return false;
    }
    matches!(name, "bin" | "etc" | "sbin" | "var") || name.starts_with("lib")
}

fn apply_mtree(source_files: &Path, dest_usr: &Path, mtree_path: &Path, gzipped: bool) -> Result<()> {
    std::fs::create_dir_all(dest_usr)?;
    let entries = read_mtree_file(mtree_path, gzipped)?;

    for entry in &entries {
        let dest_path = dest_usr.join(&entry.relative_path);
        match entry.entry_type {
            EntryType::Dir => {
                std::fs::create_dir_all(&dest_path).with_context(|| {
                    format!("failed to create directory {}", dest_path.display())
                })?;
            }
            EntryType::Link => {
                if let Some(parent) = dest_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let target = entry
                    .link_target
                    .as_ref()
                    .with_context(|| format!("mtree link entry {:?} has no target", entry.relative_path))?;
                std::os::unix::fs::symlink(target, &dest_path).with_context(|| {
                    format!("failed to create symlink {}", dest_path.display())
                })?;
            }
            EntryType::File => {
                if let Some(parent) = dest_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let src_path = source_files.join(&entry.relative_path);
                fileutil::copy_file_cow(&src_path, &dest_path).with_context(|| {
                    format!(
                        "failed to materialize {} from {}",
                        dest_path.display(),
                        src_path.display()
                    )
                })?;
                std::fs::set_permissions(
                    &dest_path,
                    std::fs::Permissions::from_mode(entry.mode),
                )
                .ok();
            }
        }
    }

    Ok(())
}

/// Copies the children of `src` into an already-existing directory `dst`,
/// using [`fileutil::copy_tree_cow`] per entry. `copy_tree_cow` itself
/// requires its destination not to exist yet (it calls `mkdir`), so this is
/// needed wherever the destination is a tempdir that already exists.
fn copy_tree_contents_cow(src: &Path, dst: &Path) -> Result<()> {
    for entry in std::fs::read_dir(src).with_context(|| format!("readdir {}", src.display()))? {
        let entry = entry?;
        fileutil::copy_tree_cow(&entry.path(), &dst.join(entry.file_name()))?;
    }
    Ok(())
}

/// Creates a mutable sysroot from a classified deployment, holding a
/// blocking read lock on the cache while populating it. `source_lock` is
/// the caller's read lock on the source deployment's `.ref`; it is held
/// until the new runtime lock is acquired, then released, so the source
/// can never be garbage collected mid-copy.
pub fn create_mutable_sysroot(
    cache_dir: &Path,
    classified: &ClassifiedSource,
    source_lock: Lock,
    usrmerge: bool,
) -> Result<MutableSysroot> {
    let cache_ref = cache_dir.join(".ref");
    let _cache_read_lock = Lock::acquire_blocking(None, &cache_ref, LockMode::Read, true)
        .context("failed to take cache read lock while building mutable sysroot")?;

    let temp = tempfile::Builder::new()
        .prefix("tmp-")
        .rand_bytes(6)
        .tempdir_in(cache_dir)
        .context("failed to create temp directory for mutable sysroot")?;
    let temp_path = temp.path().to_path_buf();

    let result = (|| -> Result<()> {
        match &classified.kind {
            RuntimeKind::Manifest { mtree_path, gzipped } => {
                apply_mtree(
                    &classified.source_root,
                    &temp_path.join("usr"),
                    mtree_path,
                    *gzipped,
                )?;
            }
            RuntimeKind::FlatpakStyle => {
                fileutil::copy_tree_cow(&classified.source_root, &temp_path.join("usr"))?;
            }
            RuntimeKind::Sysroot => {
                copy_tree_contents_cow(&classified.source_root, &temp_path)?;
                if usrmerge {
                    merge_into_usr(&temp_path)?;
                }
            }
            RuntimeKind::MergedUsr => {
                fileutil::copy_tree_cow(&classified.source_root, &temp_path.join("usr"))?;
            }
        }

        // Break any hardlink the copy preserved between our `.ref` and the
        // source deployment's: our runtime lock must live on an
        // independent inode.
        let _ = std::fs::remove_file(temp_path.join(".ref"));
        let _ = std::fs::remove_file(temp_path.join("usr/.ref"));

        Ok(())
    })();

    if let Err(e) = result {
        // `temp` drops here, recursively removing the half-built tree.
        return Err(e);
    }

    let runtime_lock = Lock::acquire_blocking(
        None,
        &temp_path.join("usr/.ref"),
        LockMode::Write,
        true,
    )
    .context("failed to take runtime lock on new mutable sysroot")?;
    drop(source_lock);

    for entry in std::fs::read_dir(temp_path.join("usr"))? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if !is_usrmerge_symlink_name(&name_str) {
            continue;
        }
        let link_path = temp_path.join(&name);
        if link_path.symlink_metadata().is_ok() {
            continue;
        }
        std::os::unix::fs::symlink(Path::new("usr").join(&name), &link_path).with_context(|| {
            format!("failed to create top-level symlink {}", link_path.display())
        })?;
    }

    if temp_path.join(".ref").symlink_metadata().is_err() {
        std::os::unix::fs::symlink("usr/.ref", temp_path.join(".ref"))
            .context("failed to create top-level .ref symlink")?;
    }

    let persisted = temp.into_path();
    MutableSysroot::from_parts(persisted, runtime_lock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_source::classify;
    use std::fs;

    #[test]
    fn builds_mutable_sysroot_from_merged_usr_source() -> Result<()> {
        let cache = tempfile::tempdir()?;
        fs::write(cache.path().join(".ref"), b"")?;

        let source = tempfile::tempdir()?;
        fs::create_dir_all(source.path().join("bin"))?;
        fs::write(source.path().join("bin/game"), b"")?;
        fs::write(source.path().join(".ref"), b"")?;

        let classified = classify(source.path());
        let source_lock =
            Lock::acquire_blocking(None, &source.path().join(".ref"), LockMode::Read, true)?;

        let sysroot = create_mutable_sysroot(cache.path(), &classified, source_lock, false)?;

        assert!(sysroot.path().join("usr/bin/game").exists());
        assert!(sysroot.path().join("bin").is_symlink());
        assert!(sysroot.path().join(".ref").is_symlink());

        Ok(())
    }

    #[test]
    fn usrmerge_folds_legacy_sysroot_bin_into_usr() -> Result<()> {
        let cache = tempfile::tempdir()?;
        fs::write(cache.path().join(".ref"), b"")?;

        let source = tempfile::tempdir()?;
        fs::create_dir_all(source.path().join("usr/lib"))?;
        fs::create_dir_all(source.path().join("bin"))?;
        fs::write(source.path().join("bin/game"), b"")?;
        fs::write(source.path().join(".ref"), b"")?;

        let classified = classify(source.path());
        let source_lock =
            Lock::acquire_blocking(None, &source.path().join(".ref"), LockMode::Read, true)?;

        let sysroot = create_mutable_sysroot(cache.path(), &classified, source_lock, true)?;

        assert!(sysroot.path().join("usr/bin/game").exists());
        assert!(sysroot.path().join("bin").is_symlink());

        Ok(())
    }
}
