// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Advisory file locks used to coordinate cache readers and cache GC.
//!
//! Two flavours are supported: open file description locks (`F_OFD_SETLK{,W}`,
//! preferred — the lock lives on the file description, not the process, so it
//! survives `fork(2)` and is released exactly when the owning fd is closed)
//! and BSD `flock(2)` as a fallback for kernels or filesystems that reject OFD
//! locks. Callers never need to know which strategy was used.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Unknown,
    Ofd,
    Flock,
}

// Cached process-wide choice of locking strategy. OFD lock support depends on
// the kernel, not the individual file, so probing once is sufficient and
// avoids a syscall round-trip of `EINVAL` on every lock acquisition once we
// know the answer.
static STRATEGY: AtomicU8 = AtomicU8::new(Strategy::Unknown as u8);

fn strategy_from_u8(v: u8) -> Strategy {
    match v {
        x if x == Strategy::Ofd as u8 => Strategy::Ofd,
        x if x == Strategy::Flock as u8 => Strategy::Flock,
        _ => Strategy::Unknown,
    }
}

/// A lock held on a file. Releasing it (by dropping) closes the underlying fd,
/// which atomically releases an OFD lock or an `flock`.
pub struct Lock {
    file: Option<File>,
    strategy: Strategy,
}

fn open_lock_file(dirfd: Option<RawFd>, path: &Path, create: bool) -> Result<File> {
    let mut opts = OpenOptions::new();
    opts.read(true).write(true);
    if create {
        opts.create(true).mode(0o644);
    }
    opts.custom_flags(libc::O_CLOEXEC);

    let file = if let Some(dirfd) = dirfd {
        openat(dirfd, path, &opts)?
    } else {
        opts.open(path)
            .with_context(|| format!("failed to open lock file {}", path.display()))?
    };
    Ok(file)
}

fn openat(dirfd: RawFd, path: &Path, opts: &OpenOptions) -> Result<File> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("path {} contains a NUL byte", path.display()))?;

    let mut flags = libc::O_RDWR | libc::O_CLOEXEC;
    // `OpenOptions` doesn't expose whether `.create(true)` was set, so peek at
    // the custom flags we stashed; we only ever call this with the flags we
    // built above, so keep it simple and pass `create`/mode explicitly.
    let _ = opts;
    flags |= libc::O_CREAT;

    let fd = unsafe { libc::openat(dirfd, c_path.as_ptr(), flags, 0o644u32) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("openat({}) failed", path.display()));
    }
    Ok(unsafe { File::from_raw_fd(fd) })
}

fn try_ofd_lock(fd: RawFd, mode: LockMode, blocking: bool) -> std::io::Result<bool> {
    let l_type = match mode {
        LockMode::Read => libc::F_RDLCK,
        LockMode::Write => libc::F_WRLCK,
    };
    let mut flock_buf: libc::flock = unsafe { std::mem::zeroed() };
    flock_buf.l_type = l_type as libc::c_short;
    flock_buf.l_whence = libc::SEEK_SET as libc::c_short;
    flock_buf.l_start = 0;
    flock_buf.l_len = 0;

    let cmd = if blocking {
        libc::F_OFD_SETLKW
    } else {
        libc::F_OFD_SETLK
    };

    let rc = unsafe { libc::fcntl(fd, cmd, &flock_buf) };
    if rc == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EAGAIN) | Some(libc::EACCES) if !blocking => Ok(false),
        Some(libc::EINVAL) => {
            // Kernel (or filesystem, e.g. some network filesystems) doesn't
            // support OFD locks at all. Let the caller fall back to flock(2).
            Err(err)
        }
        _ => Err(err),
    }
}

fn try_flock(fd: RawFd, mode: LockMode, blocking: bool) -> std::io::Result<bool> {
    use nix::fcntl::{flock, FlockArg};

    let arg = match (mode, blocking) {
        (LockMode::Read, true) => FlockArg::LockShared,
        (LockMode::Read, false) => FlockArg::LockSharedNonblock,
        (LockMode::Write, true) => FlockArg::LockExclusive,
        (LockMode::Write, false) => FlockArg::LockExclusiveNonblock,
    };
    match flock(fd, arg) {
        Ok(()) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) if !blocking => Ok(false),
        Err(e) => Err(std::io::Error::from_raw_os_error(e as i32)),
    }
}

impl Lock {
    /// Acquires a lock on `relative_path` under `dirfd` (or as an absolute/
    /// relative path if `dirfd` is `None`). If `create` is true, the file is
    /// created with `O_RDWR|O_CLOEXEC|O_CREAT|0644` if it doesn't exist yet.
    ///
    /// Returns `Ok(None)` if `blocking` is false and the lock is currently
    /// held by someone else; `Ok(Some(lock))` otherwise.
    pub fn acquire(
        dirfd: Option<RawFd>,
        relative_path: &Path,
        mode: LockMode,
        blocking: bool,
        create: bool,
    ) -> Result<Option<Lock>> {
        let file = open_lock_file(dirfd, relative_path, create)?;
        let fd = file.as_raw_fd();

        let strategy = strategy_from_u8(STRATEGY.load(Ordering::Relaxed));

        let (granted, used) = match strategy {
            Strategy::Ofd => (try_ofd_lock(fd, mode, blocking), Strategy::Ofd),
            Strategy::Flock => (try_flock(fd, mode, blocking), Strategy::Flock),
            Strategy::Unknown => match try_ofd_lock(fd, mode, blocking) {
                Ok(granted) => {
                    STRATEGY.store(Strategy::Ofd as u8, Ordering::Relaxed);
                    (Ok(granted), Strategy::Ofd)
                }
                Err(_) => {
                    tracing::debug!("OFD locks unsupported here, falling back to flock(2)");
                    STRATEGY.store(Strategy::Flock as u8, Ordering::Relaxed);
                    (try_flock(fd, mode, blocking), Strategy::Flock)
                }
            },
        };

        match granted {
            Ok(true) => Ok(Some(Lock {
                file: Some(file),
                strategy: used,
            })),
            Ok(false) => Ok(None),
            Err(e) => Err(e).with_context(|| {
                format!(
                    "failed to acquire {:?} lock on {}",
                    mode,
                    relative_path.display()
                )
            }),
        }
    }

    /// Convenience wrapper for acquiring a blocking lock, failing if it cannot
    /// be granted.
    pub fn acquire_blocking(
        dirfd: Option<RawFd>,
        relative_path: &Path,
        mode: LockMode,
        create: bool,
    ) -> Result<Lock> {
        Self::acquire(dirfd, relative_path, mode, true, create)?
            .context("blocking lock acquisition returned no lock")
    }

    /// Attempts a non-blocking lock, returning `None` if it's already held.
    pub fn try_acquire(
        dirfd: Option<RawFd>,
        relative_path: &Path,
        mode: LockMode,
        create: bool,
    ) -> Result<Option<Lock>> {
        Self::acquire(dirfd, relative_path, mode, false, create)
    }

    /// Yields the underlying fd to be inherited across `exec`, for example by
    /// a child sandbox process that must keep holding this lock. After
    /// calling this, dropping `Lock` no longer closes the fd or releases it;
    /// the caller becomes responsible for it.
    #[must_use]
    pub fn into_inheritable_fd(mut self) -> OwnedFd {
        let file = self.file.take().expect("lock file already taken");
        // Clear FD_CLOEXEC so the fd (and the lock on it) survives exec.
        let fd = file.into_raw_fd();
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC);
        }
        unsafe { OwnedFd::from_raw_fd(fd) }
    }

    pub fn strategy_name(&self) -> &'static str {
        match self.strategy {
            Strategy::Ofd => "ofd",
            Strategy::Flock => "flock",
            Strategy::Unknown => "unknown",
        }
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        // Dropping `self.file` closes the fd, which releases an OFD lock
        // immediately (it's tied to the file description) or an flock (tied
        // to the open file table entry).
        let _ = self.file.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_rw(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(0o644)
            .open(path)
            .unwrap()
    }

    #[test]
    fn exclusive_lock_excludes_second_writer() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("lock");
        std::fs::write(&path, b"")?;

        let lock1 = Lock::try_acquire(None, &path, LockMode::Write, false)?;
        assert!(lock1.is_some());

        let lock2 = Lock::try_acquire(None, &path, LockMode::Write, false)?;
        assert!(lock2.is_none(), "second writer must not acquire the lock");

        drop(lock1);

        let lock3 = Lock::try_acquire(None, &path, LockMode::Write, false)?;
        assert!(lock3.is_some(), "lock must be free after the first is dropped");
        Ok(())
    }

    #[test]
    fn readers_do_not_exclude_each_other() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("lock");
        std::fs::write(&path, b"")?;

        let r1 = Lock::try_acquire(None, &path, LockMode::Read, false)?;
        let r2 = Lock::try_acquire(None, &path, LockMode::Read, false)?;
        assert!(r1.is_some());
        assert!(r2.is_some());
        Ok(())
    }

    #[test]
    fn writer_excludes_reader() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("lock");
        std::fs::write(&path, b"")?;

        let _w = Lock::try_acquire(None, &path, LockMode::Write, false)?.unwrap();
        let r = Lock::try_acquire(None, &path, LockMode::Read, false)?;
        assert!(r.is_none());
        Ok(())
    }

    #[test]
    fn create_makes_missing_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("missing-ref");
        assert!(!path.exists());

        let lock = Lock::try_acquire(None, &path, LockMode::Write, true)?;
        assert!(lock.is_some());
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn dirfd_relative_lock() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let dirfd_file = open_rw(&dir.path().join(".keepalive"));
        let dirfd = nix::fcntl::open(
            dir.path(),
            nix::fcntl::OFlag::O_DIRECTORY | nix::fcntl::OFlag::O_CLOEXEC,
            nix::sys::stat::Mode::empty(),
        )?;
        drop(dirfd_file);

        let rel = Path::new(".ref");
        let lock = Lock::acquire(Some(dirfd), rel, LockMode::Write, false, true)?;
        assert!(lock.is_some());
        assert!(dir.path().join(".ref").exists());
        nix::unistd::close(dirfd)?;
        Ok(())
    }
}
