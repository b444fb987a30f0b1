// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Describes a filesystem tree's contents and metadata, so tests can assert
//! on the shape of a mutable sysroot or an overrides tree without hardcoding
//! every path.

use std::collections::BTreeMap;
use std::fs::{read_link, File};
use std::os::unix::prelude::*;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use fileutil::get_user_xattrs_map;
use itertools::Itertools;
use sha2::{Digest, Sha256};

const MODE_MASK: u32 = 0o7777;

/// One entry in a described tree, sorted depth-first by path.
#[derive(Debug, Eq, PartialEq)]
pub enum FileDescription {
    File {
        path: PathBuf,
        mode: u32,
        hash: String,
        user_xattrs: BTreeMap<String, Vec<u8>>,
    },
    Dir {
        path: PathBuf,
        mode: u32,
        user_xattrs: BTreeMap<String, Vec<u8>>,
    },
    Symlink {
        path: PathBuf,
        target: PathBuf,
    },
}

fn describe_tree_impl(root_dir: &Path, relative_path: &Path, out: &mut Vec<FileDescription>) -> Result<()> {
    let full_path = root_dir.join(relative_path);
    let metadata = std::fs::symlink_metadata(&full_path)?;
    let mode = metadata.mode() & MODE_MASK;
    let file_type = metadata.file_type();

    if file_type.is_file() {
        let mut file = File::open(&full_path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        let hash = hex_encode(&hasher.finalize());
        out.push(FileDescription::File {
            path: relative_path.to_owned(),
            mode,
            hash,
            user_xattrs: get_user_xattrs_map(&full_path)?,
        });
    } else if file_type.is_dir() {
        out.push(FileDescription::Dir {
            path: relative_path.to_owned(),
            mode,
            user_xattrs: get_user_xattrs_map(&full_path)?,
        });
        let entries = std::fs::read_dir(&full_path)?
            .collect::<std::io::Result<Vec<_>>>()?
            .into_iter()
            .sorted_by(|a, b| a.file_name().cmp(&b.file_name()));
        for entry in entries {
            describe_tree_impl(root_dir, &relative_path.join(entry.file_name()), out)?;
        }
    } else if file_type.is_symlink() {
        out.push(FileDescription::Symlink {
            path: relative_path.to_owned(),
            target: read_link(&full_path)?,
        });
    } else {
        bail!("unsupported file type at {}: {:?}", full_path.display(), file_type);
    }

    Ok(())
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Recursively describes every entry under `root_dir`, depth-first with
/// siblings in filename order, so two trees built differently but
/// equivalent in content compare equal.
pub fn describe_tree(root_dir: &Path) -> Result<Vec<FileDescription>> {
    let mut out = Vec::new();
    describe_tree_impl(root_dir, Path::new(""), &mut out)?;
    Ok(out)
}

/// Finds the entry for `relative_path`, if the tree has one.
pub fn find<'a>(tree: &'a [FileDescription], relative_path: &str) -> Option<&'a FileDescription> {
    tree.iter().find(|entry| match entry {
        FileDescription::File { path, .. }
        | FileDescription::Dir { path, .. }
        | FileDescription::Symlink { path, .. } => path == Path::new(relative_path),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    #[test]
    fn describes_files_dirs_and_symlinks() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir(dir.path().join("sub"))?;
        std::fs::write(dir.path().join("sub/a.txt"), b"hello")?;
        symlink("a.txt", dir.path().join("sub/link.txt"))?;

        let tree = describe_tree(dir.path())?;
        assert!(matches!(find(&tree, "sub"), Some(FileDescription::Dir { .. })));
        assert!(matches!(find(&tree, "sub/a.txt"), Some(FileDescription::File { .. })));
        assert!(matches!(find(&tree, "sub/link.txt"), Some(FileDescription::Symlink { .. })));
        Ok(())
    }
}
