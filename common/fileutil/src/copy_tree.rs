// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The "cheap tree copy" used everywhere a deployment or cache entry needs to
//! become an independent, writable tree: try `link(2)` first so same-
//! filesystem copies cost nothing, fall back to `copy_file_range(2)` (which
//! the kernel turns into a reflink on filesystems that support one, e.g.
//! btrfs/xfs), and fall back to a plain byte-for-byte copy last.

use std::fs::{create_dir, hard_link, read_dir, read_link, set_permissions, symlink_metadata};
use std::os::unix::fs::{symlink, MetadataExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

// Warn only once per process when we're forced past a hardlink: the common
// case (same filesystem) is silent, and a tree copy can visit thousands of
// files.
static WARNED_FALLBACK: AtomicBool = AtomicBool::new(false);

fn warn_fallback_once(reason: &str) {
    if !WARNED_FALLBACK.swap(true, Ordering::Relaxed) {
        tracing::warn!(
            "falling back to a data copy instead of hardlinking ({reason}); \
             this usually means the cache and source are on different filesystems"
        );
    }
}

fn try_copy_file_range(src: &Path, dst: &Path) -> Result<bool> {
    let src_file = std::fs::File::open(src).with_context(|| format!("open {}", src.display()))?;
    let len = src_file.metadata()?.len();

    let dst_file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(dst)
        .with_context(|| format!("create {}", dst.display()))?;

    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(1 << 30) as usize;
        match nix::fcntl::copy_file_range(
            src_file.as_raw_fd(),
            None,
            dst_file.as_raw_fd(),
            None,
            chunk,
        ) {
            Ok(0) => break,
            Ok(n) => remaining -= n as u64,
            Err(nix::errno::Errno::EXDEV)
            | Err(nix::errno::Errno::ENOSYS)
            | Err(nix::errno::Errno::EOPNOTSUPP)
            | Err(nix::errno::Errno::EINVAL) => return Ok(false),
            Err(e) => return Err(e).with_context(|| {
                format!("copy_file_range {} -> {}", src.display(), dst.display())
            }),
        }
    }
    Ok(true)
}

/// Copies a single regular file from `src` to `dst`, preferring the cheapest
/// available mechanism. `dst` must not already exist.
pub fn copy_file_cow(src: &Path, dst: &Path) -> Result<()> {
    match hard_link(src, dst) {
        Ok(()) => return Ok(()),
        Err(e)
            if matches!(
                e.raw_os_error(),
                Some(libc::EXDEV) | Some(libc::EPERM) | Some(libc::EMLINK)
            ) =>
        {
            warn_fallback_once("hard_link failed");
        }
        Err(e) => return Err(e).with_context(|| format!("hard_link {} -> {}", src.display(), dst.display())),
    }

    if try_copy_file_range(src, dst)? {
        let mode = symlink_metadata(src)?.permissions().mode();
        set_permissions(dst, PermissionsExt::from_mode(mode))?;
        return Ok(());
    }

    std::fs::copy(src, dst)
        .with_context(|| format!("copy {} -> {}", src.display(), dst.display()))?;
    Ok(())
}

/// Recursively copies `src` into `dst` (which must not exist), using
/// [`copy_file_cow`] for regular files and recreating symlinks and
/// directories verbatim.
pub fn copy_tree_cow(src: &Path, dst: &Path) -> Result<()> {
    let meta = symlink_metadata(src).with_context(|| format!("stat {}", src.display()))?;

    if meta.is_symlink() {
        let target = read_link(src)?;
        symlink(&target, dst)
            .with_context(|| format!("symlink {} -> {}", dst.display(), target.display()))?;
        return Ok(());
    }

    if meta.is_dir() {
        create_dir(dst).with_context(|| format!("mkdir {}", dst.display()))?;
        for entry in read_dir(src).with_context(|| format!("readdir {}", src.display()))? {
            let entry = entry?;
            copy_tree_cow(&entry.path(), &dst.join(entry.file_name()))?;
        }
        set_permissions(dst, PermissionsExt::from_mode(meta.mode() & 0o7777))?;
        return Ok(());
    }

    copy_file_cow(src, dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{create_dir_all, write};

    #[test]
    fn copies_files_dirs_and_symlinks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("src");
        create_dir_all(src.join("sub"))?;
        write(src.join("file"), b"hello")?;
        write(src.join("sub/nested"), b"world")?;
        symlink("nested", src.join("sub/link"))?;

        let dst = dir.path().join("dst");
        copy_tree_cow(&src, &dst)?;

        assert_eq!(std::fs::read(dst.join("file"))?, b"hello");
        assert_eq!(std::fs::read(dst.join("sub/nested"))?, b"world");
        assert_eq!(read_link(dst.join("sub/link"))?, Path::new("nested"));
        Ok(())
    }

    #[test]
    fn preserves_file_mode() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let src = dir.path().join("file");
        write(&src, b"x")?;
        set_permissions(&src, PermissionsExt::from_mode(0o700))?;

        let dst = dir.path().join("copy");
        copy_file_cow(&src, &dst)?;

        assert_eq!(symlink_metadata(&dst)?.permissions().mode() & 0o777, 0o700);
        Ok(())
    }
}
