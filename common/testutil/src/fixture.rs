// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A small declarative tree builder, for constructing fixture runtime
//! deployments and provider roots in tests without repeating
//! `fs::create_dir_all`/`fs::write` boilerplate at every call site.

use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// One entry to materialize under a fixture tree's root.
pub enum Entry {
    File { path: &'static str, contents: &'static [u8] },
    Dir { path: &'static str },
    Symlink { path: &'static str, target: &'static str },
}

pub fn file(path: &'static str, contents: &'static [u8]) -> Entry {
    Entry::File { path, contents }
}

pub fn dir(path: &'static str) -> Entry {
    Entry::Dir { path }
}

pub fn symlink_entry(path: &'static str, target: &'static str) -> Entry {
    Entry::Symlink { path, target }
}

/// Materializes `entries` under `root`, creating parent directories as
/// needed.
pub fn build_tree(root: &Path, entries: &[Entry]) -> Result<()> {
    for entry in entries {
        match entry {
            Entry::File { path, contents } => {
                let full = root.join(path);
                if let Some(parent) = full.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                std::fs::write(&full, contents).with_context(|| format!("failed to write {}", full.display()))?;
            }
            Entry::Dir { path } => {
                std::fs::create_dir_all(root.join(path))
                    .with_context(|| format!("failed to create {}", root.join(path).display()))?;
            }
            Entry::Symlink { path, target } => {
                let full = root.join(path);
                if let Some(parent) = full.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("failed to create {}", parent.display()))?;
                }
                symlink(target, &full).with_context(|| format!("failed to symlink {}", full.display()))?;
            }
        }
    }
    Ok(())
}

/// Builds a tree in a fresh temp directory and returns it, so callers don't
/// need a separate `tempfile::tempdir()` call at every fixture site.
pub fn build_temp_tree(entries: &[Entry]) -> Result<tempfile::TempDir> {
    let dir = tempfile::tempdir()?;
    build_tree(dir.path(), entries)?;
    Ok(dir)
}

/// A minimal `usr-mtree.txt`-classified runtime deployment: just enough for
/// `runtime_source::classify` to pick `RuntimeKind::MergedUsr`.
pub fn minimal_merged_usr_entries() -> Vec<Entry> {
    vec![
        dir("usr/bin"),
        file("usr/bin/true", b"#!/bin/sh\nexit 0\n"),
        dir("usr/lib/x86_64-linux-gnu"),
    ]
}

pub fn entry_path(entry: &Entry) -> PathBuf {
    match entry {
        Entry::File { path, .. } | Entry::Dir { path } | Entry::Symlink { path, .. } => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_declared_entries() -> Result<()> {
        let dir = build_temp_tree(&[
            file("a/b.txt", b"hi"),
            dir_entry_helper(),
            symlink_entry("a/link.txt", "b.txt"),
        ])?;
        assert_eq!(std::fs::read(dir.path().join("a/b.txt"))?, b"hi");
        assert!(dir.path().join("c").is_dir());
        assert_eq!(std::fs::read_link(dir.path().join("a/link.txt"))?, PathBuf::from("b.txt"));
        Ok(())
    }

    fn dir_entry_helper() -> Entry {
        dir("c")
    }
}
