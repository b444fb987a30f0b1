// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;

use anyhow::{Context, Result};

/// Top-level directories that a legacy (non-merged) sysroot keeps separate
/// from `/usr` and that get folded into it when the USRMERGE flag is set.
const MERGE_CANDIDATES: &[&str] = &["bin", "sbin", "lib", "lib32", "lib64"];

/// Moves the contents of each top-level `bin`/`sbin`/`lib*` directory under
/// `root` into the matching directory under `root/usr`, then removes the
/// now-empty top-level directory so a later pass can replace it with a
/// symlink into `usr/`. No-op for directories that are already symlinks
/// (already merged) or that don't exist.
pub fn merge_into_usr(root: &Path) -> Result<()> {
    let usr = root.join("usr");
    std::fs::create_dir_all(&usr)?;

    for name in MERGE_CANDIDATES {
        let src = root.join(name);
        let meta = match std::fs::symlink_metadata(&src) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if meta.file_type().is_symlink() {
            continue;
        }
        if !meta.is_dir() {
            continue;
        }

        let dst = usr.join(name);
        std::fs::create_dir_all(&dst)
            .with_context(|| format!("failed to create merge target {}", dst.display()))?;

        for entry in std::fs::read_dir(&src)? {
            let entry = entry?;
            let target = dst.join(entry.file_name());
            std::fs::rename(entry.path(), &target).with_context(|| {
                format!(
                    "failed to merge {} into {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }

        std::fs::remove_dir(&src)
            .with_context(|| format!("failed to remove merged directory {}", src.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn merges_bin_into_usr_bin() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin/ls"), b"").unwrap();
        fs::create_dir_all(root.join("usr")).unwrap();

        merge_into_usr(root).unwrap();

        assert!(!root.join("bin").exists());
        assert!(root.join("usr/bin/ls").exists());
    }

    #[test]
    fn leaves_symlinked_bin_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("usr/bin")).unwrap();
        std::os::unix::fs::symlink("usr/bin", root.join("bin")).unwrap();

        merge_into_usr(root).unwrap();

        assert!(root.join("bin").is_symlink());
    }
}
