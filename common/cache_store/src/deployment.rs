// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::error::PrepError;
use std::path::{Path, PathBuf};

/// Validates a build-id: alphanumerics, `.`, `-`, `_`, with the first
/// character required to be alphanumeric (a leading `.`/`-`/`_` would make
/// `deploy-<id>` ambiguous with the cache's own dotfiles and legacy
/// name patterns).
pub fn validate_build_id(id: &str) -> Result<(), PrepError> {
    if id.is_empty() {
        return Err(PrepError::Source("build-id is empty".into()));
    }
    let mut chars = id.chars();
    let first = chars.next().unwrap();
    if !first.is_ascii_alphanumeric() {
        return Err(PrepError::Source(format!(
            "build-id {id:?} must not start with a non-alphanumeric character"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(PrepError::Source(format!(
            "build-id {id:?} contains characters outside [A-Za-z0-9._-]"
        )));
    }
    Ok(())
}

/// Parses a build-id sidecar file's contents: strict charset validation, a
/// single trailing newline tolerated.
pub fn parse_build_id_sidecar(contents: &str) -> Result<String, PrepError> {
    let trimmed = contents.strip_suffix('\n').unwrap_or(contents);
    if trimmed.contains('\n') {
        return Err(PrepError::Source(
            "build-id sidecar must contain a single line".into(),
        ));
    }
    validate_build_id(trimmed)?;
    Ok(trimmed.to_owned())
}

/// The directory name of a deployment with the given build-id.
pub fn deployment_dir_name(build_id: &str) -> String {
    format!("deploy-{build_id}")
}

pub fn deployment_path(cache_dir: &Path, build_id: &str) -> PathBuf {
    cache_dir.join(deployment_dir_name(build_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_build_ids() {
        assert!(validate_build_id("0.20230101.0").is_ok());
        assert!(validate_build_id("abc_DEF-123.45").is_ok());
    }

    #[test]
    fn rejects_leading_punctuation() {
        assert!(validate_build_id(".hidden").is_err());
        assert!(validate_build_id("-dash").is_err());
    }

    #[test]
    fn rejects_invalid_characters() {
        assert!(validate_build_id("has space").is_err());
        assert!(validate_build_id("has/slash").is_err());
    }

    #[test]
    fn sidecar_tolerates_one_trailing_newline() {
        assert_eq!(
            parse_build_id_sidecar("0.20230101.0\n").unwrap(),
            "0.20230101.0"
        );
        assert!(parse_build_id_sidecar("0.20230101.0\n\n").is_err());
    }
}
