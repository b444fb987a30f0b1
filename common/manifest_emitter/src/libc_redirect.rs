// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Keeps the container's glibc family consistent with whichever `libc.so.6`
//! a capture pulled in from the provider.

use std::path::{Path, PathBuf};

/// What to do with the canonical `ld.so` path inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LdSoAction {
    /// A mutable sysroot exists: replace the canonical path with a symlink
    /// into the remapped provider prefix.
    SymlinkInMutableSysroot { canonical_path: PathBuf, target: PathBuf },
    /// No mutable sysroot: the sandbox executor must bind-mount instead.
    BindMountInstruction { host_path: PathBuf, container_path: PathBuf },
}

pub fn plan_ld_so_redirect(
    mutable_sysroot_available: bool,
    canonical_ld_so_in_container: &Path,
    provider_remapped_ld_so: &Path,
) -> LdSoAction {
    if mutable_sysroot_available {
        LdSoAction::SymlinkInMutableSysroot {
            canonical_path: canonical_ld_so_in_container.to_path_buf(),
            target: provider_remapped_ld_so.to_path_buf(),
        }
    } else {
        LdSoAction::BindMountInstruction {
            host_path: provider_remapped_ld_so.to_path_buf(),
            container_path: canonical_ld_so_in_container.to_path_buf(),
        }
    }
}

/// SONAME glob patterns for the small allowlist of NSS and IDN plugins
/// captured alongside the provider's libc.
pub const NSS_IDN_SONAME_PATTERNS: &[&str] = &[
    "libnss_dns.so*",
    "libnss_files.so*",
    "libnss_mdns*.so*",
    "libnss_myhostname.so*",
    "libidn2.so*",
    "libidn.so*",
];

const HWCAPS_SUBDIRS: &[&str] = &["tls", "sse2", "i686", "cmov", "x86_64"];

/// Locates the `gconv` modules directory by walking up from the resolved
/// target of a captured `libc.so.6` symlink, stripping hwcaps subdirs glibc
/// sometimes nests per-CPU variants under.
pub fn locate_gconv_dir(libc_so_6_target: &Path) -> Option<PathBuf> {
    let mut dir = libc_so_6_target.parent()?.to_path_buf();
    loop {
        let is_hwcaps_subdir = dir
            .file_name()
            .map(|n| HWCAPS_SUBDIRS.contains(&n.to_string_lossy().as_ref()))
            .unwrap_or(false);
        if !is_hwcaps_subdir {
            break;
        }
        dir = dir.parent()?.to_path_buf();
    }
    Some(dir.join("gconv"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableImportance {
    Essential,
    Important,
    Optional,
}

#[derive(Debug, Clone, Copy)]
pub struct GlibcExecutable {
    pub name: &'static str,
    pub importance: ExecutableImportance,
}

/// The glibc executables worth capturing alongside locale data.
pub const GLIBC_EXECUTABLES: &[GlibcExecutable] = &[
    GlibcExecutable { name: "ldconfig", importance: ExecutableImportance::Essential },
    GlibcExecutable { name: "locale", importance: ExecutableImportance::Important },
    GlibcExecutable { name: "localedef", importance: ExecutableImportance::Important },
    GlibcExecutable { name: "ldd", importance: ExecutableImportance::Important },
    GlibcExecutable { name: "iconv", importance: ExecutableImportance::Optional },
    GlibcExecutable { name: "getent", importance: ExecutableImportance::Optional },
];

/// Whether provider locale data (`/usr/lib/locale`, `/usr/share/i18n`,
/// plus the executables above) should be captured for this session: true
/// as soon as the provider's libc was used for at least one ABI.
pub fn should_import_locale_data(libc_from_provider_count: usize) -> bool {
    libc_from_provider_count > 0
}

/// A warning to log when the provider's libc is mixed in with some ABIs
/// still using the runtime's own: theoretically inconsistent, but workable
/// in practice, so it's a warning rather than an error.
pub fn mixed_libc_warning(libc_from_provider_count: usize, total_abis: usize) -> Option<String> {
    if libc_from_provider_count > 0 && libc_from_provider_count < total_abis {
        Some(format!(
            "libc came from the provider for {libc_from_provider_count}/{total_abis} architectures; \
             using provider locale data for all of them"
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mutable_sysroot_available_chooses_symlink_action() {
        let action = plan_ld_so_redirect(
            true,
            Path::new("/lib64/ld-linux-x86-64.so.2"),
            Path::new("/run/host/usr/lib/x86_64-linux-gnu/ld-linux-x86-64.so.2"),
        );
        assert!(matches!(action, LdSoAction::SymlinkInMutableSysroot { .. }));
    }

    #[test]
    fn no_mutable_sysroot_chooses_bind_mount() {
        let action = plan_ld_so_redirect(
            false,
            Path::new("/lib64/ld-linux-x86-64.so.2"),
            Path::new("/run/host/usr/lib/x86_64-linux-gnu/ld-linux-x86-64.so.2"),
        );
        assert!(matches!(action, LdSoAction::BindMountInstruction { .. }));
    }

    #[test]
    fn gconv_dir_strips_hwcaps_subdirs() {
        let dir = locate_gconv_dir(Path::new("/usr/lib/x86_64-linux-gnu/x86_64/libc.so.6")).unwrap();
        assert_eq!(dir, PathBuf::from("/usr/lib/x86_64-linux-gnu/gconv"));
    }

    #[test]
    fn gconv_dir_with_no_hwcaps_subdir() {
        let dir = locate_gconv_dir(Path::new("/usr/lib/x86_64-linux-gnu/libc.so.6")).unwrap();
        assert_eq!(dir, PathBuf::from("/usr/lib/x86_64-linux-gnu/gconv"));
    }

    #[test]
    fn mixed_libc_produces_a_warning_only_when_partial() {
        assert!(mixed_libc_warning(0, 2).is_none());
        assert!(mixed_libc_warning(2, 2).is_none());
        assert!(mixed_libc_warning(1, 2).is_some());
    }
}
