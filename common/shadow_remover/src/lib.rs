// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Removes runtime-provided libraries a capture has shadowed, so the
//! dynamic linker picks up the captured (provider) copy instead of the
//! runtime's own bundled one.

mod soname;

pub use soname::read_soname;

use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nix::sys::stat::stat;
use nix::unistd::unlinkat;
use nix::unistd::UnlinkatFlags;
use tracing::warn;

/// Candidate runtime library directories, relative to a mutable sysroot
/// root, checked for one architecture.
pub fn candidate_library_dirs(tuple: &str, bits: &str) -> Vec<PathBuf> {
    vec![
        PathBuf::from("usr/lib").join(tuple),
        PathBuf::from("usr/lib/mesa").join(tuple),
        PathBuf::from("lib"),
        PathBuf::from(format!("lib{bits}")),
        // Exherbo-style per-tuple top-level dir.
        PathBuf::from("usr").join(format!("{tuple}/lib")),
    ]
}

/// Deduplicates `dirs` (resolved against `sysroot_root`) by `(st_dev,
/// st_ino)`, so a library directory reached by more than one path (e.g. via
/// a compat symlink) is only processed once.
pub fn dedup_library_dirs(sysroot_root: &Path, dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    for dir in dirs {
        let full = sysroot_root.join(&dir);
        let Ok(st) = stat(&full) else { continue };
        let key = (st.st_dev as u64, st.st_ino as u64);
        if seen.insert(key) {
            result.push(dir);
        }
    }
    result
}

fn is_library_name(name: &str) -> bool {
    name.starts_with("lib") && name.contains(".so")
}

fn overrides_has_symlink(overrides_lib_tuple: &Path, name: &str) -> bool {
    match fs::symlink_metadata(overrides_lib_tuple.join(name)) {
        Ok(meta) => meta.file_type().is_symlink(),
        Err(_) => false,
    }
}

#[derive(Debug, Clone)]
pub struct ShadowDecision {
    pub name: String,
    pub reason: String,
    pub symlink_target_basename: Option<String>,
}

/// Where the capture pipeline placed its output, used to decide whether a
/// runtime library has been shadowed.
pub struct OverridesContext {
    pub overrides_root: PathBuf,
    pub tuple: String,
}

impl OverridesContext {
    pub fn overrides_lib_tuple(&self) -> PathBuf {
        self.overrides_root.join("lib").join(&self.tuple)
    }
}

/// Pass 1: decides, without mutating anything, which entries in `dir`
/// should be removed because a capture shadows them.
pub fn decide_deletions(dir: &Path, ctx: &OverridesContext) -> Result<Vec<ShadowDecision>> {
    let overrides_lib = ctx.overrides_lib_tuple();
    let mut decisions = Vec::new();

    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(decisions),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", dir.display())),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_library_name(&name) {
            continue;
        }
        let path = entry.path();
        let meta = fs::symlink_metadata(&path)?;

        if overrides_has_symlink(&overrides_lib, &name) {
            decisions.push(ShadowDecision {
                name,
                reason: "direct basename clash with a captured library".into(),
                symlink_target_basename: None,
            });
            continue;
        }

        if meta.file_type().is_symlink() {
            if let Ok(target) = fs::read_link(&path) {
                if let Some(target_basename) = target.file_name().map(|n| n.to_string_lossy().into_owned()) {
                    if overrides_has_symlink(&overrides_lib, &target_basename) {
                        decisions.push(ShadowDecision {
                            name,
                            reason: "symlink target clashes with a captured library".into(),
                            symlink_target_basename: Some(target_basename),
                        });
                        continue;
                    }
                }
            }
            // A plain symlink whose target doesn't clash is left for pass 2
            // to reconsider once dangling-alias propagation has run.
            continue;
        }

        let alias_path = overrides_lib.join("aliases").join(&name);
        if let Ok(final_target) = fs::canonicalize(&alias_path) {
            if final_target.starts_with(&ctx.overrides_root) {
                decisions.push(ShadowDecision {
                    name,
                    reason: "alias maps to a captured library, not the runtime's own copy".into(),
                    symlink_target_basename: None,
                });
                continue;
            }
        }

        if let Some(soname) = read_soname(&path)? {
            if overrides_has_symlink(&overrides_lib, &soname) {
                decisions.push(ShadowDecision {
                    name,
                    reason: format!("DT_SONAME {soname} clashes with a captured library"),
                    symlink_target_basename: Some(soname),
                });
            }
        }
    }

    Ok(decisions)
}

/// Pass 2: any symlink in `dir` whose target is already scheduled for
/// deletion is itself scheduled, so dangling links don't survive removal.
pub fn schedule_dangling_symlinks(dir: &Path, decisions: &mut Vec<ShadowDecision>) -> Result<()> {
    let scheduled: HashSet<String> = decisions.iter().map(|d| d.name.clone()).collect();
    let mut already = scheduled.clone();

    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e).with_context(|| format!("failed to read {}", dir.display())),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if already.contains(&name) || !is_library_name(&name) {
            continue;
        }
        let meta = fs::symlink_metadata(entry.path())?;
        if !meta.file_type().is_symlink() {
            continue;
        }
        if let Ok(target) = fs::read_link(entry.path()) {
            if let Some(target_basename) = target.file_name().map(|n| n.to_string_lossy().into_owned()) {
                if scheduled.contains(&target_basename) {
                    decisions.push(ShadowDecision {
                        name: name.clone(),
                        reason: format!("dangling after its target {target_basename} was removed"),
                        symlink_target_basename: Some(target_basename),
                    });
                    already.insert(name);
                }
            }
        }
    }

    Ok(())
}

/// Pass 3: applies the decisions, `unlinkat`-ing each scheduled name
/// relative to `dirfd`. Failures are logged as warnings, not returned as
/// errors — a partially-applied shadow pass is still strictly better than
/// none.
pub fn apply_deletions(dirfd: RawFd, decisions: &[ShadowDecision]) {
    for decision in decisions {
        if let Err(e) = unlinkat(Some(dirfd), decision.name.as_str(), UnlinkatFlags::NoRemoveDir) {
            warn!(name = %decision.name, error = %e, "failed to remove shadowed library");
        }
    }
}

/// Runs all three passes against one library directory.
pub fn remove_shadows(dirfd: RawFd, dir: &Path, ctx: &OverridesContext) -> Result<Vec<ShadowDecision>> {
    let mut decisions = decide_deletions(dir, ctx)?;
    schedule_dangling_symlinks(dir, &mut decisions)?;
    apply_deletions(dirfd, &decisions);
    Ok(decisions)
}

/// Confirms `path` is a directory (not a block/char device or other odd
/// node sometimes left behind by partial extractions) before scanning it.
pub fn is_scannable_dir(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) => meta.is_dir() && !meta.file_type().is_block_device() && !meta.file_type().is_char_device(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn make_overrides(dir: &Path, tuple: &str, captured: &[&str]) -> OverridesContext {
        let overrides_root = dir.join("overrides");
        let lib_tuple = overrides_root.join("lib").join(tuple);
        fs::create_dir_all(&lib_tuple).unwrap();
        for name in captured {
            fs::write(lib_tuple.join(format!("{name}.real")), b"captured").unwrap();
            symlink(format!("{name}.real"), lib_tuple.join(name)).unwrap();
        }
        OverridesContext {
            overrides_root,
            tuple: tuple.to_owned(),
        }
    }

    #[test]
    fn direct_basename_clash_is_scheduled() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = make_overrides(dir.path(), "x86_64-linux-gnu", &["libfoo.so.1"]);
        let runtime_dir = dir.path().join("usr/lib/x86_64-linux-gnu");
        fs::create_dir_all(&runtime_dir)?;
        fs::write(runtime_dir.join("libfoo.so.1"), b"bundled")?;

        let decisions = decide_deletions(&runtime_dir, &ctx)?;
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].name, "libfoo.so.1");
        Ok(())
    }

    #[test]
    fn non_clashing_library_survives() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = make_overrides(dir.path(), "x86_64-linux-gnu", &["libfoo.so.1"]);
        let runtime_dir = dir.path().join("usr/lib/x86_64-linux-gnu");
        fs::create_dir_all(&runtime_dir)?;
        fs::write(runtime_dir.join("libbar.so.1"), b"bundled")?;

        let decisions = decide_deletions(&runtime_dir, &ctx)?;
        assert!(decisions.is_empty());
        Ok(())
    }

    #[test]
    fn dangling_symlink_to_removed_target_is_scheduled() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = make_overrides(dir.path(), "x86_64-linux-gnu", &["libfoo.so.1"]);
        let runtime_dir = dir.path().join("usr/lib/x86_64-linux-gnu");
        fs::create_dir_all(&runtime_dir)?;
        fs::write(runtime_dir.join("libfoo.so.1"), b"bundled")?;
        symlink("libfoo.so.1", runtime_dir.join("libfoo.so"))?;

        let mut decisions = decide_deletions(&runtime_dir, &ctx)?;
        schedule_dangling_symlinks(&runtime_dir, &mut decisions)?;
        let names: HashSet<_> = decisions.iter().map(|d| d.name.clone()).collect();
        assert!(names.contains("libfoo.so.1"));
        assert!(names.contains("libfoo.so"));
        Ok(())
    }

    #[test]
    fn apply_deletions_removes_scheduled_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let ctx = make_overrides(dir.path(), "x86_64-linux-gnu", &["libfoo.so.1"]);
        let runtime_dir = dir.path().join("usr/lib/x86_64-linux-gnu");
        fs::create_dir_all(&runtime_dir)?;
        fs::write(runtime_dir.join("libfoo.so.1"), b"bundled")?;

        let dirfd = nix::fcntl::open(
            &runtime_dir,
            nix::fcntl::OFlag::O_DIRECTORY,
            nix::sys::stat::Mode::empty(),
        )?;
        let decisions = remove_shadows(dirfd, &runtime_dir, &ctx)?;
        nix::unistd::close(dirfd)?;

        assert_eq!(decisions.len(), 1);
        assert!(!runtime_dir.join("libfoo.so.1").exists());
        Ok(())
    }

    #[test]
    fn dedup_by_inode_drops_repeated_directories() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let real = dir.path().join("usr/lib/x86_64-linux-gnu");
        fs::create_dir_all(&real)?;
        symlink(&real, dir.path().join("lib"))?;

        let deduped = dedup_library_dirs(
            dir.path(),
            vec![PathBuf::from("usr/lib/x86_64-linux-gnu"), PathBuf::from("lib")],
        );
        assert_eq!(deduped.len(), 1);
        Ok(())
    }
}
