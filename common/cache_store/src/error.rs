// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use thiserror::Error;

/// Typed errors a `RuntimeSession` needs to match on, as opposed to the
/// `anyhow::Error` used everywhere else for ad-hoc context chains.
///
/// `ArchitectureUnsupported` is the one variant the per-architecture loop
/// must be able to catch and downgrade to a log line rather than unwind the
/// whole session; the rest exist so call sites can decide fatal-vs-warning
/// without string-matching an error message.
#[derive(Debug, Error)]
pub enum PrepError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("runtime source error: {0}")]
    Source(String),

    #[error("lock contention on {path}")]
    LockContention { path: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("architecture {tuple} is unsupported in this session: {reason}")]
    ArchitectureUnsupported { tuple: String, reason: String },

    #[error("driver {name} skipped: {reason}")]
    DriverSkip { name: String, reason: String },

    #[error("shadow removal warning for {path}: {reason}")]
    ShadowRemovalWarning { path: String, reason: String },
}

impl PrepError {
    /// Whether this error is "session-fatal" per the propagation rule: fatal
    /// errors unwind to the caller and trigger cleanup of any `tmp-XXXXXX`
    /// the session created. Everything else is meant to be downgraded to a
    /// warning by the caller instead of being returned at all.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            PrepError::Config(_) | PrepError::Source(_) | PrepError::LockContention { .. } | PrepError::Io { .. }
        )
    }
}
