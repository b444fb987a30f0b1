// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use anyhow::{bail, Context, Result};
use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::Layer;

/// Name of the environment variable containing the log directory and file
/// respectively. If both are provided, an error is thrown. If neither is
/// provided, no logging to a file is performed.
pub const LOG_DIR_ENV: &str = "RUNTIME_PREP_LOG_DIR";
pub const LOG_FILE_ENV: &str = "RUNTIME_PREP_LOG_FILE";

/// Chooses whether to log to the console. If "0", don't. Otherwise, do.
pub const CONSOLE_LOG_ENV: &str = "RUNTIME_PREP_LOG_CONSOLE";

/// A guard object to perform cleanups with RAII.
pub struct LogGuard {
    _span_guard: tracing::span::EnteredSpan,
}

/// The configuration for the logger.
pub struct LoggingConfig {
    /// The path to dump the logs to, and a filter for which logs should be
    /// dumped there. If `None`, logs will not be written to a file.
    pub log_file: Option<(PathBuf, EnvFilter)>,
    /// A filter for which logs should be written to the console. If `None`,
    /// logs will not be written to the console.
    pub console_logger: Option<EnvFilter>,
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self> {
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_nanos();

        let log_file = match (
            std::env::var_os(LOG_FILE_ENV),
            std::env::var_os(LOG_DIR_ENV),
        ) {
            (Some(_), Some(_)) => bail!("you can't have both {LOG_FILE_ENV} and {LOG_DIR_ENV} set"),
            (Some(file), None) => {
                // Subprocesses shouldn't try to share a log file with us.
                std::env::remove_var(LOG_FILE_ENV);
                Some(PathBuf::from(file))
            }
            (None, Some(dir)) => {
                let name = format!("{}.{timestamp}.log", crate::get_current_process_name());
                Some(Path::new(&dir).join(name))
            }
            (None, None) => None,
        };

        let console_logger = match std::env::var(CONSOLE_LOG_ENV).ok().as_deref() {
            Some("0") => None,
            _ => Some(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env()?,
            ),
        };

        let log_file = match log_file {
            Some(log_file) => Some((
                log_file,
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env()?,
            )),
            None => None,
        };

        Ok(Self {
            log_file,
            console_logger,
        })
    }

    /// Sets up the standard tracing subscriber in accordance with the
    /// config, and starts a span named "main".
    pub fn setup(self) -> Result<LogGuard> {
        let mut layers = Vec::new();

        if let Some(filter) = self.console_logger {
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_ansi(true)
                    .with_writer(std::io::stderr)
                    .with_filter(filter)
                    .boxed(),
            );
        }

        if let Some((log_file, filter)) = self.log_file {
            let f = std::fs::File::create(&log_file)
                .with_context(|| format!("failed to open log file {log_file:?}"))?;
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(f)
                    .with_filter(filter)
                    .boxed(),
            );
        }

        tracing_subscriber::registry().with(layers).try_init().context(
            "failed to start tracing, a subscriber is probably already running",
        )?;

        let args = std::env::args()
            .map(|s| shell_escape::escape(s.into()))
            .collect::<Vec<_>>()
            .join(" ");
        // Trace level so the (potentially huge) environment dump doesn't
        // print on every invocation.
        let span_guard = tracing::trace_span!("main", args = args).entered();

        Ok(LogGuard {
            _span_guard: span_guard,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fileutil::SafeTempDir;

    #[test]
    fn setup_logging_writes_filtered_file() -> Result<()> {
        const INFO_MESSAGE: &str = "log at level info";
        const DEBUG_MESSAGE: &str = "log at level debug";

        let dir = SafeTempDir::new()?;
        std::env::set_var("RUST_LOG", "INFO");
        let log_file = dir.path().join("out.log");
        std::env::set_var(LOG_FILE_ENV, &log_file);
        std::env::set_var(CONSOLE_LOG_ENV, "0");

        {
            let _guard = LoggingConfig::from_env()?.setup()?;
            tracing::info!("{}", INFO_MESSAGE);
            tracing::debug!("{}", DEBUG_MESSAGE);
        }

        let log_content = std::fs::read_to_string(log_file)?;
        assert!(log_content.contains(INFO_MESSAGE));
        assert!(!log_content.contains(DEBUG_MESSAGE));

        Ok(())
    }
}
