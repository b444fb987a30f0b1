// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Entry point: parses the command line, runs a session, and prints the
//! resulting sandbox argument list as JSON on stdout for the launcher to
//! consume.

mod config;
mod session;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use config::{Cli, RuntimeConfig};
use session::RuntimeSession;
use sysroot_assembler::SandboxArgumentList;

/// How long `terminate_tree` waits for a `SIGTERM`'d descendant to exit
/// voluntarily before escalating to `SIGKILL`, and how much grace it gives
/// stragglers after that.
const TEARDOWN_WAIT: Duration = Duration::from_secs(2);
const TEARDOWN_GRACE: Duration = Duration::from_secs(1);

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = RuntimeConfig::from(cli);

    // Bounded helper subprocesses (capture-libs, tar) are reaped directly by
    // `processes::run`, but some of them spawn their own children; becoming
    // a subreaper guarantees those are re-parented to us instead of PID 1 so
    // the teardown sweep below can always find and collect them.
    processes::become_subreaper().context("failed to mark this process as a subreaper")?;
    let self_pid = nix::unistd::getpid();

    let result = RuntimeSession::new(config).run();

    // Safety net: if a helper left descendants behind (crashed mid-fork, or
    // we're unwinding from an error without having waited on everything),
    // sweep the whole tree before leaving.
    processes::terminate_tree(self_pid, TEARDOWN_WAIT, TEARDOWN_GRACE)
        .context("failed to tear down leftover child processes")?;

    let output = result?;

    for decision in &output.shadow_decisions {
        tracing::info!(name = %decision.name, reason = %decision.reason, "removed shadowed library");
    }
    if let Some(stats) = &output.gc_stats {
        tracing::info!(
            removed = ?stats.removed,
            skipped_locked = ?stats.skipped_locked,
            skipped_kept = ?stats.skipped_kept,
            "garbage collected cache"
        );
    }
    tracing::info!(architectures = ?output.active_architectures, "runtime prepared");

    let list = SandboxArgumentList {
        ops: output.ops,
        args: Vec::new(),
        envs: output.environment,
        chdir: "/".into(),
    };
    println!("{}", serde_json::to_string_pretty(&list)?);

    Ok(())
}

fn main() -> ExitCode {
    cliutil::cli_main(run, cliutil::Config::default())
}
