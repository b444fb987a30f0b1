// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::{LoggingConfig, RedirectorConfig, StdioRedirector};
use anyhow::Result;

fn unwrap_or_else<T, F>(value: Option<T>, default: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match value {
        Some(value) => Ok(value),
        None => default(),
    }
}

/// Builder for [`Config`]. Most callers just want `Default::default()`.
#[derive(Default)]
pub struct ConfigBuilder {
    logging: Option<LoggingConfig>,
    log_command_line: bool,
    stdio_redirector: Option<RedirectorConfig>,
}

impl ConfigBuilder {
    #[inline(always)]
    pub fn new() -> Self {
        Self {
            logging: None,
            log_command_line: true,
            stdio_redirector: None,
        }
    }

    #[inline(always)]
    /// Overrides the logging config. Defaults to `LoggingConfig::from_env()`.
    pub fn logging(mut self, cfg: LoggingConfig) -> Self {
        self.logging = Some(cfg);
        self
    }

    #[inline(always)]
    /// Controls whether to log the command line of the current process.
    pub fn log_command_line(mut self, enable: bool) -> Self {
        self.log_command_line = enable;
        self
    }

    #[inline(always)]
    /// Overrides the stdio redirector config. Defaults to `RedirectorConfig::from_env()`.
    pub fn stdio_redirector(mut self, cfg: RedirectorConfig) -> Self {
        self.stdio_redirector = Some(cfg);
        self
    }

    #[inline(always)]
    pub fn build(self) -> Result<Config> {
        let redirector_config = unwrap_or_else(self.stdio_redirector, || Ok(RedirectorConfig::from_env()))?;
        Ok(Config {
            logging: unwrap_or_else(self.logging, LoggingConfig::from_env)?,
            log_command_line: self.log_command_line,
            stdio_redirector: redirector_config.create()?,
        })
    }
}

/// A POD struct of the config to use, after applying defaults for unset
/// fields. Build with `cliutil::ConfigBuilder::new().<setters>().build()`.
pub struct Config {
    pub(crate) logging: LoggingConfig,
    pub(crate) log_command_line: bool,
    pub(crate) stdio_redirector: Option<StdioRedirector>,
}

impl Default for Config {
    fn default() -> Self {
        ConfigBuilder::new().build().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_config_with_overrides() {
        let config = ConfigBuilder::new().log_command_line(false).build().unwrap();
        assert!(!config.log_command_line);
    }
}
