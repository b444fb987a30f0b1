// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A writable, session-private copy-on-write tree rooted at a directory fd.
//! All mutation of the runtime happens here; the source deployment is never
//! touched.

mod build;
mod usrmerge;

pub use build::*;

use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use locks::Lock;

/// A writable session-private runtime tree. Its root has the shape of a
/// sysroot: `usr/` plus top-level symlinks `bin`, `sbin`, `lib*`, `etc`,
/// `var` pointing into it.
pub struct MutableSysroot {
    path: PathBuf,
    dirfd: OwnedFd,
    /// The session's exclusive hold on `usr/.ref`, kept alive for the
    /// lifetime of the sysroot. Outlives the read lock that was held on the
    /// source deployment while the copy was made.
    runtime_lock: Lock,
}

impl MutableSysroot {
    pub(crate) fn from_parts(path: PathBuf, runtime_lock: Lock) -> Result<Self> {
        let dirfd = nix::fcntl::open(
            &path,
            nix::fcntl::OFlag::O_PATH | nix::fcntl::OFlag::O_DIRECTORY | nix::fcntl::OFlag::O_CLOEXEC,
            nix::sys::stat::Mode::empty(),
        )
        .with_context(|| format!("failed to open directory fd for {}", path.display()))?;
        let dirfd = unsafe { OwnedFd::from_raw_fd(dirfd) };
        Ok(Self {
            path,
            dirfd,
            runtime_lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn usr_path(&self) -> PathBuf {
        self.path.join("usr")
    }

    pub fn dirfd(&self) -> RawFd {
        self.dirfd.as_raw_fd()
    }

    pub fn runtime_lock(&self) -> &Lock {
        &self.runtime_lock
    }
}
