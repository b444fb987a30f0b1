// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::{
    fs::{metadata, read_dir, remove_dir, remove_file, set_permissions},
    io::ErrorKind,
    os::unix::fs::PermissionsExt,
    path::Path,
};

use anyhow::{Context, Result};

/// Runs `f` with `path` temporarily made at least `mode`-permissive, then
/// restores its original permissions, even if `f` fails.
pub fn with_permissions<T>(path: &Path, mode: u32, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let original = metadata(path)
        .with_context(|| format!("stat {}", path.display()))?
        .permissions();

    set_permissions(path, PermissionsExt::from_mode(mode))
        .with_context(|| format!("chmod 0{mode:o} {}", path.display()))?;

    let result = f();

    set_permissions(path, original)
        .with_context(|| format!("restoring permissions on {}", path.display()))?;

    result
}

/// Removes a single file, first chmod'ing its parent directory writable if
/// necessary so that the unlink itself isn't blocked by a read-only parent.
pub fn remove_file_with_chmod(path: &Path) -> Result<()> {
    match remove_file(path) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) if e.raw_os_error() != Some(libc::EACCES) && e.raw_os_error() != Some(libc::EPERM) => {
            return Err(e).with_context(|| format!("failed to remove {}", path.display()));
        }
        Err(_) => {}
    }

    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent", path.display()))?;
    with_permissions(parent, 0o755, || {
        remove_file(path).with_context(|| format!("failed to remove {}", path.display()))
    })
}

/// Recursively removes a directory tree, repairing permissions along the way
/// so that directories an earlier step made read-only (e.g. to protect a
/// durable/immutable deployment) don't block cleanup.
///
/// This is more expensive than [`std::fs::remove_dir_all`] because it always
/// walks the tree itself, but it never fails merely because some ancestor is
/// not writable.
pub fn remove_dir_all_with_chmod(path: &Path) -> Result<()> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("stat {}", path.display())),
    };

    if meta.is_symlink() || !meta.is_dir() {
        return remove_file_with_chmod(path);
    }

    // Make sure we can list and modify this directory's contents.
    with_permissions(path, 0o755, || {
        let entries: Vec<_> = read_dir(path)
            .with_context(|| format!("readdir {}", path.display()))?
            .collect::<std::io::Result<_>>()
            .with_context(|| format!("readdir {}", path.display()))?;

        for entry in entries {
            remove_dir_all_with_chmod(&entry.path())?;
        }
        Ok(())
    })?;

    match remove_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => {
            // Parent might be the thing that's not writable.
            if let Some(parent) = path.parent() {
                with_permissions(parent, 0o755, || {
                    remove_dir(path)
                        .with_context(|| format!("failed to remove directory {}", path.display()))
                })
            } else {
                Err(e).with_context(|| format!("failed to remove directory {}", path.display()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir_all, write};

    #[test]
    fn removes_readonly_tree() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("a/b/c");
        create_dir_all(&nested)?;
        write(nested.join("file"), b"data")?;
        set_permissions(&nested, PermissionsExt::from_mode(0o500))?;
        set_permissions(dir.path().join("a/b"), PermissionsExt::from_mode(0o500))?;

        remove_dir_all_with_chmod(&dir.path().join("a"))?;
        assert!(!dir.path().join("a").exists());
        Ok(())
    }

    #[test]
    fn missing_path_is_not_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        remove_dir_all_with_chmod(&dir.path().join("does-not-exist"))?;
        Ok(())
    }

    #[test]
    fn removes_symlink_without_following() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("target");
        create_dir_all(&target)?;
        write(target.join("keep"), b"x")?;
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link)?;

        remove_dir_all_with_chmod(&link)?;
        assert!(!link.exists());
        assert!(target.join("keep").exists(), "target must survive");
        Ok(())
    }
}
