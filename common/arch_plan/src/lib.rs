// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-architecture constants and the activation test that decides which
//! ABIs are live in a session.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::Result;

/// An immutable, baked-in record describing one supported ABI.
#[derive(Debug, Clone)]
pub struct Architecture {
    pub index: usize,
    /// Debian multiarch tuple, e.g. `x86_64-linux-gnu`.
    pub tuple: String,
    /// Ordered library-directory search list, most to least specific:
    /// multiarch dirs, `/lib64`/`/lib32`/`/lib`, Exherbo-style per-tuple
    /// dirs.
    pub multilib_search_list: Vec<String>,
    /// Values `${PLATFORM}` can expand to for this architecture, e.g.
    /// `haswell`, `x86_64`.
    pub platform_tokens: Vec<String>,
    /// Canonical `ld.so.cache` path plus any OS-specific alternates (Clear
    /// Linux, Exherbo).
    pub ld_so_path: String,
    pub ld_so_cache_alternates: Vec<String>,
    /// Path to the per-arch `capture-libs` helper binary.
    pub capture_libs_helper: PathBuf,
}

/// The architectures known to this implementation, mirroring the runtimes
/// pressure-vessel-style launchers actually ship helpers for.
pub fn known_architectures(tools_dir: &std::path::Path) -> Vec<Architecture> {
    vec![
        Architecture {
            index: 0,
            tuple: "x86_64-linux-gnu".to_owned(),
            multilib_search_list: vec![
                "lib/x86_64-linux-gnu".to_owned(),
                "lib64".to_owned(),
                "lib".to_owned(),
            ],
            platform_tokens: vec!["haswell".to_owned(), "x86_64".to_owned()],
            ld_so_path: "/lib64/ld-linux-x86-64.so.2".to_owned(),
            ld_so_cache_alternates: vec![
                "/var/cache/ldconfig/ld.so.cache".to_owned(),
                "/var/cache/ld.so.cache".to_owned(),
            ],
            capture_libs_helper: tools_dir.join("x86_64-linux-gnu/capture-libs"),
        },
        Architecture {
            index: 1,
            tuple: "i386-linux-gnu".to_owned(),
            multilib_search_list: vec![
                "lib/i386-linux-gnu".to_owned(),
                "lib32".to_owned(),
                "lib".to_owned(),
            ],
            platform_tokens: vec!["i686".to_owned(), "i386".to_owned()],
            ld_so_path: "/lib/ld-linux.so.2".to_owned(),
            ld_so_cache_alternates: vec!["/var/cache/ldconfig/ld.so.cache".to_owned()],
            capture_libs_helper: tools_dir.join("i386-linux-gnu/capture-libs"),
        },
    ]
}

/// Runs `<helper> --print-ld.so` and returns its stdout, trimmed. An
/// architecture is active in a session iff this succeeds and returns a
/// non-empty string; otherwise the caller should skip it with a log line.
pub fn probe_activation(arch: &Architecture) -> Result<Option<String>> {
    let mut cmd = Command::new(&arch.capture_libs_helper);
    cmd.arg("--print-ld.so")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = match cmd.output() {
        Ok(output) => output,
        Err(e) => {
            tracing::info!(tuple = %arch.tuple, error = %e, "architecture inactive: helper could not be spawned");
            return Ok(None);
        }
    };

    if !output.status.success() {
        tracing::info!(tuple = %arch.tuple, "architecture inactive: helper exited with failure");
        return Ok(None);
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if stdout.is_empty() {
        tracing::info!(tuple = %arch.tuple, "architecture inactive: empty ld.so path");
        return Ok(None);
    }

    Ok(Some(stdout))
}

/// Filters `architectures` down to those that pass [`probe_activation`].
/// Returns an error (the session's "no-common-architecture" failure) if none
/// activate.
pub fn activate(architectures: &[Architecture]) -> Result<Vec<(Architecture, String)>> {
    let mut active = Vec::new();
    for arch in architectures {
        if let Some(ld_so) = probe_activation(arch)? {
            active.push((arch.clone(), ld_so));
        }
    }
    if active.is_empty() {
        anyhow::bail!("no-common-architecture: no supported ABI activated in this session");
    }
    Ok(active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn fake_helper(dir: &std::path::Path, script: &str) -> PathBuf {
        let path = dir.join("capture-libs");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn activation_fails_closed_on_empty_output() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let helper = fake_helper(dir.path(), "#!/bin/sh\nexit 0\n");
        let arch = Architecture {
            index: 0,
            tuple: "x86_64-linux-gnu".into(),
            multilib_search_list: vec![],
            platform_tokens: vec![],
            ld_so_path: String::new(),
            ld_so_cache_alternates: vec![],
            capture_libs_helper: helper,
        };
        assert_eq!(probe_activation(&arch)?, None);
        Ok(())
    }

    #[test]
    fn activation_succeeds_with_nonempty_stdout() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let helper = fake_helper(dir.path(), "#!/bin/sh\necho /lib64/ld-linux-x86-64.so.2\n");
        let arch = Architecture {
            index: 0,
            tuple: "x86_64-linux-gnu".into(),
            multilib_search_list: vec![],
            platform_tokens: vec![],
            ld_so_path: String::new(),
            ld_so_cache_alternates: vec![],
            capture_libs_helper: helper,
        };
        assert_eq!(
            probe_activation(&arch)?,
            Some("/lib64/ld-linux-x86-64.so.2".to_owned())
        );
        Ok(())
    }

    #[test]
    fn no_common_architecture_is_an_error() {
        let arch = Architecture {
            index: 0,
            tuple: "x86_64-linux-gnu".into(),
            multilib_search_list: vec![],
            platform_tokens: vec![],
            ld_so_path: String::new(),
            ld_so_cache_alternates: vec![],
            capture_libs_helper: PathBuf::from("/nonexistent/capture-libs"),
        };
        assert!(activate(&[arch]).is_err());
    }
}
