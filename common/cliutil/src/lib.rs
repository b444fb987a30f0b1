// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Startup/shutdown plumbing shared by every `runtime-prep-setup` binary:
//! logging setup from the environment, a top-level error handler, and an
//! optional stdout/stderr redirector for wrapping commands that must stay
//! quiet on success.

use itertools::Itertools;
use std::{
    ffi::OsStr,
    fmt::Debug,
    process::{ExitCode, Termination},
};

use anyhow::Result;

mod config;
mod logging;
mod stdio_redirector;

pub use crate::config::*;
pub use crate::logging::*;
pub use crate::stdio_redirector::{RedirectorConfig, StdioRedirector};

/// Wraps a CLI main function with the common startup/cleanup logic: sets up
/// logging, runs `main`, and on failure prints `FATAL: <prog>: <error>` and
/// replays any redirected stdout/stderr to the real streams.
pub fn cli_main<F, T, E>(main: F, config: Config) -> ExitCode
where
    F: FnOnce() -> Result<T, E>,
    T: Termination,
    E: Debug,
{
    let _log_guard = config.logging.setup().unwrap();
    if config.log_command_line {
        log_current_command_line();
    }
    let result = main();
    let failure = result.is_err();

    let exit_code = handle_top_level_result(result);

    if failure {
        if let Some(redirector) = config.stdio_redirector {
            redirector.flush_to_real_stderr().unwrap();
        }
    }

    exit_code
}

/// Logs the command line of the current process. Called automatically by
/// [`cli_main`].
pub fn log_current_command_line() {
    let escaped_command = std::env::args()
        .map(|s| shell_escape::escape(s.into()))
        .join(" ");
    tracing::info!("COMMAND: {}", escaped_command);
}

/// Handles the top-level [`Result`] and returns the [`ExitCode`] to return
/// from `main`. Called automatically by [`cli_main`].
pub fn handle_top_level_result<T: Termination, E: Debug>(result: Result<T, E>) -> ExitCode {
    match result {
        Err(error) => {
            eprintln!("FATAL: {}: {:?}", get_current_process_name(), error);
            ExitCode::FAILURE
        }
        Ok(value) => value.report(),
    }
}

/// Returns the current process name, or `__unknown__` if it failed to get one.
fn get_current_process_name() -> String {
    let current_exe = std::env::current_exe().unwrap_or_default();
    current_exe
        .file_name()
        .unwrap_or(OsStr::new("__unknown__"))
        .to_string_lossy()
        .into_owned()
}
