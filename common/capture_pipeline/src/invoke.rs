// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Steps 5–7: invoking the per-architecture `capture-libs` helper in bulk
//! and verifying what it actually produced.

use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Result;
use nix::errno::Errno;
use nix::fcntl::AtFlags;
use nix::sys::stat::fstatat;

/// One invocation of the capture helper: a destination plus the list of
/// patterns (absolute paths or bare SONAMEs) to look for.
#[derive(Debug, Clone)]
pub struct CaptureInvocation {
    pub container: PathBuf,
    pub provider: PathBuf,
    pub remap_link_prefix_args: Vec<String>,
    pub library_knowledge: Option<PathBuf>,
    pub dest: PathBuf,
    pub patterns: Vec<String>,
}

impl CaptureInvocation {
    pub fn command(&self, helper: &Path) -> Command {
        let mut cmd = Command::new(helper);
        cmd.arg("--container").arg(&self.container);
        cmd.arg("--provider").arg(&self.provider);
        for arg in &self.remap_link_prefix_args {
            cmd.arg(arg);
        }
        if let Some(keyfile) = &self.library_knowledge {
            cmd.arg("--library-knowledge").arg(keyfile);
        }
        cmd.arg("--dest").arg(&self.dest);
        cmd.args(&self.patterns);
        cmd
    }
}

/// Runs one capture invocation via the subreaper-aware process runner.
pub fn run_capture(helper: &Path, invocation: &CaptureInvocation) -> Result<()> {
    processes::run_and_check(&mut invocation.command(helper))
}

/// Step 6: whether `basename` landed in `dest_fd` after a capture
/// invocation. `Ok(false)` means the driver was wrong-ABI or didn't exist
/// upstream and its kind should flip back to `Absent`.
pub fn capture_produced_entry(dest_fd: RawFd, basename: &str) -> Result<bool> {
    match fstatat(dest_fd, basename, AtFlags::AT_SYMLINK_NOFOLLOW) {
        Ok(_) => Ok(true),
        Err(Errno::ENOENT) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_includes_required_flags() {
        let invocation = CaptureInvocation {
            container: "/mnt/ctr".into(),
            provider: "/mnt/provider".into(),
            remap_link_prefix_args: vec!["--remap-link-prefix=/usr/=/run/host/usr/".into()],
            library_knowledge: Some("/mnt/ctr/knowledge.keyfile".into()),
            dest: "/mnt/ctr/overrides/lib/x86_64-linux-gnu".into(),
            patterns: vec!["libfoo.so.1".into()],
        };
        let cmd = invocation.command(Path::new("/usr/bin/capture-libs"));
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.contains(&"--container".to_string()));
        assert!(args.contains(&"--library-knowledge".to_string()));
        assert!(args.contains(&"libfoo.so.1".to_string()));
    }

    #[test]
    fn capture_produced_entry_detects_presence_and_absence() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("libfoo.so"), b"x")?;
        let fd = nix::fcntl::open(
            dir.path(),
            nix::fcntl::OFlag::O_DIRECTORY,
            nix::sys::stat::Mode::empty(),
        )?;
        assert!(capture_produced_entry(fd, "libfoo.so")?);
        assert!(!capture_produced_entry(fd, "missing.so")?);
        nix::unistd::close(fd)?;
        Ok(())
    }
}
