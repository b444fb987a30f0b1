// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};

/// The four shapes a deployment directory can take, in classification
/// priority order: a manifest runtime outranks a Flatpak-style deployment,
/// which outranks a plain sysroot, which outranks a bare merged-`/usr`
/// tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeKind {
    /// Has `usr-mtree.txt` or `usr-mtree.txt.gz`; `/usr` must be
    /// reconstructed from the manifest rather than copied directly, so a
    /// mutable sysroot is mandatory.
    Manifest { mtree_path: PathBuf, gzipped: bool },
    /// Has a `files/` directory that is itself a merged `/usr`.
    FlatpakStyle,
    /// Has a top-level `usr/` directory alongside `bin`, `lib`, etc.
    Sysroot,
    /// No `usr/`: the deployment root itself is a merged `/usr`, and the
    /// final container tree needs synthesized top-level symlinks.
    MergedUsr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedSource {
    pub kind: RuntimeKind,
    /// The directory that `/usr`'s contents should be derived from.
    pub source_root: PathBuf,
    /// Manifest runtimes and Flatpak-style deployments always require a
    /// mutable copy before anything can be mounted or linked against them.
    pub mutable_copy_mandatory: bool,
}

/// Classifies `deployment_dir` by inspecting its top-level entries, in
/// `RuntimeKind`'s priority order.
pub fn classify(deployment_dir: &Path) -> ClassifiedSource {
    let plain_mtree = deployment_dir.join("usr-mtree.txt");
    let gz_mtree = deployment_dir.join("usr-mtree.txt.gz");

    if plain_mtree.is_file() {
        return ClassifiedSource {
            kind: RuntimeKind::Manifest {
                mtree_path: plain_mtree,
                gzipped: false,
            },
            source_root: deployment_dir.join("files"),
            mutable_copy_mandatory: true,
        };
    }
    if gz_mtree.is_file() {
        return ClassifiedSource {
            kind: RuntimeKind::Manifest {
                mtree_path: gz_mtree,
                gzipped: true,
            },
            source_root: deployment_dir.join("files"),
            mutable_copy_mandatory: true,
        };
    }

    if deployment_dir.join("files").is_dir() {
        return ClassifiedSource {
            kind: RuntimeKind::FlatpakStyle,
            source_root: deployment_dir.join("files"),
            mutable_copy_mandatory: true,
        };
    }

    if deployment_dir.join("usr").is_dir() {
        return ClassifiedSource {
            kind: RuntimeKind::Sysroot,
            source_root: deployment_dir.to_path_buf(),
            mutable_copy_mandatory: false,
        };
    }

    ClassifiedSource {
        kind: RuntimeKind::MergedUsr,
        source_root: deployment_dir.to_path_buf(),
        mutable_copy_mandatory: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn classifies_manifest_runtime() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("usr-mtree.txt"), "").unwrap();
        let c = classify(dir.path());
        assert!(matches!(c.kind, RuntimeKind::Manifest { gzipped: false, .. }));
        assert!(c.mutable_copy_mandatory);
    }

    #[test]
    fn classifies_gzipped_manifest_runtime_over_flatpak_style() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("usr-mtree.txt.gz"), "").unwrap();
        fs::create_dir(dir.path().join("files")).unwrap();
        let c = classify(dir.path());
        assert!(matches!(c.kind, RuntimeKind::Manifest { gzipped: true, .. }));
    }

    #[test]
    fn classifies_flatpak_style() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("files")).unwrap();
        let c = classify(dir.path());
        assert_eq!(c.kind, RuntimeKind::FlatpakStyle);
        assert!(c.mutable_copy_mandatory);
    }

    #[test]
    fn classifies_sysroot() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("usr")).unwrap();
        let c = classify(dir.path());
        assert_eq!(c.kind, RuntimeKind::Sysroot);
        assert!(!c.mutable_copy_mandatory);
    }

    #[test]
    fn classifies_merged_usr_as_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let c = classify(dir.path());
        assert_eq!(c.kind, RuntimeKind::MergedUsr);
    }
}
