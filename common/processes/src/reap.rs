// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Process tree teardown for the case where this process is responsible for
//! reaping the sandboxed game process's grandchildren (i.e. it is running as
//! a subreaper). `SIGCHLD` is blocked and consumed via a `signalfd` so waits
//! are race-free with respect to children exiting between a `waitpid` poll
//! and a subsequent `select`/`read`.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// Marks the current process as a subreaper (`PR_SET_CHILD_SUBREAPER`):
/// orphaned descendants are re-parented to it instead of to PID 1.
pub fn become_subreaper() -> Result<()> {
    let rc = unsafe { libc::prctl(libc::PR_SET_CHILD_SUBREAPER, 1, 0, 0, 0) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error()).context("prctl(PR_SET_CHILD_SUBREAPER) failed");
    }
    Ok(())
}

/// Blocks `SIGCHLD` via `sigprocmask` and returns a `signalfd` that receives
/// it, so a subreaper's event loop can wait for children without racing a
/// traditional signal handler.
pub struct ChildSignalFd {
    fd: SignalFd,
}

impl ChildSignalFd {
    pub fn new() -> Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGCHLD);
        mask.thread_block().context("blocking SIGCHLD")?;
        let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_CLOEXEC)
            .context("creating signalfd for SIGCHLD")?;
        Ok(Self { fd })
    }

    /// Blocks until at least one `SIGCHLD` has been delivered (coalesced
    /// deliveries still wake this up exactly once per `read`), then drains
    /// all currently-exited children with non-blocking `waitpid`.
    pub fn wait_for_children(&mut self) -> Result<Vec<(Pid, WaitStatus)>> {
        self.fd.read_signal().context("reading signalfd")?;
        self.reap_available()
    }

    /// Reaps every child that has already exited without blocking.
    pub fn reap_available(&self) -> Result<Vec<(Pid, WaitStatus)>> {
        let mut reaped = Vec::new();
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(status) => {
                    if let Some(pid) = status.pid() {
                        reaped.push((pid, status));
                    }
                }
                Err(nix::errno::Errno::ECHILD) => break,
                Err(e) => return Err(e).context("waitpid"),
            }
        }
        Ok(reaped)
    }
}

fn read_children(pid: Pid) -> Vec<Pid> {
    let task_dir = format!("/proc/{pid}/task");
    let Ok(tasks) = std::fs::read_dir(&task_dir) else {
        return Vec::new();
    };

    let mut children = Vec::new();
    for task in tasks.flatten() {
        let children_path = task.path().join("children");
        if let Ok(contents) = std::fs::read_to_string(children_path) {
            for tok in contents.split_whitespace() {
                if let Ok(raw) = tok.parse::<i32>() {
                    children.push(Pid::from_raw(raw));
                }
            }
        }
    }
    children
}

/// Enumerates every descendant of `root_pid` by walking
/// `/proc/<pid>/task/<tid>/children`, breadth-first.
pub fn descendants(root_pid: Pid) -> Vec<Pid> {
    let mut seen = BTreeSet::new();
    let mut frontier = vec![root_pid];
    let mut result = Vec::new();

    while let Some(pid) = frontier.pop() {
        for child in read_children(pid) {
            if seen.insert(child) {
                result.push(child);
                frontier.push(child);
            }
        }
    }
    result
}

fn still_alive(pids: &[Pid]) -> Vec<Pid> {
    pids.iter()
        .copied()
        .filter(|pid| nix::sys::signal::kill(*pid, None).is_ok())
        .collect()
}

fn signal_all(pids: &[Pid], signal: Signal) {
    for pid in pids {
        // ESRCH just means it already exited; anything else isn't actionable
        // during teardown.
        let _ = nix::sys::signal::kill(*pid, signal);
    }
}

/// Terminates the whole descendant tree of `root_pid`: sends `SIGTERM`,
/// polls for up to `wait` for voluntary exit, then escalates to `SIGKILL`
/// for stragglers after an additional `grace` period.
pub fn terminate_tree(root_pid: Pid, wait: Duration, grace: Duration) -> Result<()> {
    let victims = descendants(root_pid);
    if victims.is_empty() {
        return Ok(());
    }

    signal_all(&victims, Signal::SIGTERM);

    let deadline = Instant::now() + wait;
    let mut remaining = still_alive(&victims);
    while !remaining.is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
        remaining = still_alive(&remaining);
    }

    if remaining.is_empty() {
        return Ok(());
    }

    tracing::warn!(
        count = remaining.len(),
        "descendants still alive after SIGTERM wait, entering grace period"
    );

    let kill_deadline = Instant::now() + grace;
    while !remaining.is_empty() && Instant::now() < kill_deadline {
        std::thread::sleep(Duration::from_millis(20));
        remaining = still_alive(&remaining);
    }

    if !remaining.is_empty() {
        tracing::warn!(count = remaining.len(), "escalating to SIGKILL");
        signal_all(&remaining, Signal::SIGKILL);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn descendants_of_leaf_process_is_empty() {
        let child = Command::new("true").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        // The process may have already exited; either way it has no children.
        assert!(descendants(pid).is_empty());
    }

    #[test]
    fn terminate_tree_on_exited_process_is_a_no_op() -> Result<()> {
        let mut child = Command::new("true").spawn()?;
        child.wait()?;
        terminate_tree(
            Pid::from_raw(child.id() as i32),
            Duration::from_millis(50),
            Duration::from_millis(50),
        )?;
        Ok(())
    }
}
