// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Step 4: hardlink/symlink coalescing. Sources that resolve to the same
//! underlying file are captured once; remaining aliases become local
//! symlinks pointing at the captured copy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::sys::stat::stat;

/// One group of capture slots that all resolve to the same file.
#[derive(Debug, Clone)]
pub struct CoalescedGroup {
    /// The slot actually handed to the capture helper.
    pub primary: usize,
    /// Slots that should instead become local symlinks to `primary`'s
    /// destination, keyed by their own index in the input slice.
    pub aliases: Vec<usize>,
}

/// Groups `sources` (resolved against `provider_root`) by `(st_dev,
/// st_ino)`. `sources[i].0` is an identifying label only; `.1` is the
/// provider-relative or provider-absolute source path to `stat`.
pub fn coalesce_by_inode(provider_root: &Path, sources: &[PathBuf]) -> Result<Vec<CoalescedGroup>> {
    let mut by_inode: HashMap<(u64, u64), usize> = HashMap::new();
    let mut groups: Vec<CoalescedGroup> = Vec::new();

    for (idx, source) in sources.iter().enumerate() {
        let full_path = if source.is_absolute() {
            provider_root.join(source.strip_prefix("/").unwrap_or(source))
        } else {
            provider_root.join(source)
        };
        let st = stat(&full_path).with_context(|| format!("failed to stat {}", full_path.display()))?;
        let key = (st.st_dev as u64, st.st_ino as u64);
        match by_inode.get(&key) {
            Some(&group_idx) => groups[group_idx].aliases.push(idx),
            None => {
                by_inode.insert(key, groups.len());
                groups.push(CoalescedGroup {
                    primary: idx,
                    aliases: Vec::new(),
                });
            }
        }
    }

    Ok(groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::symlink;

    #[test]
    fn hardlinked_sources_coalesce() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("real.so"), b"data")?;
        fs::hard_link(dir.path().join("real.so"), dir.path().join("alias.so"))?;

        let groups = coalesce_by_inode(
            dir.path(),
            &[PathBuf::from("real.so"), PathBuf::from("alias.so")],
        )?;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].aliases, vec![1]);
        Ok(())
    }

    #[test]
    fn symlinked_sources_coalesce_to_their_target() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("real.so"), b"data")?;
        symlink("real.so", dir.path().join("link.so"))?;

        let groups = coalesce_by_inode(
            dir.path(),
            &[PathBuf::from("real.so"), PathBuf::from("link.so")],
        )?;
        assert_eq!(groups.len(), 1);
        Ok(())
    }

    #[test]
    fn distinct_files_stay_separate() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("a.so"), b"a")?;
        fs::write(dir.path().join("b.so"), b"b")?;

        let groups = coalesce_by_inode(dir.path(), &[PathBuf::from("a.so"), PathBuf::from("b.so")])?;
        assert_eq!(groups.len(), 2);
        Ok(())
    }
}
