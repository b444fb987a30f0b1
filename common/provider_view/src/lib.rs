// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A read-only handle on the graphics provider sysroot: a dirfd (shareable
//! freely across threads, since it's never mutated) plus the mapping needed
//! to rewrite a provider-absolute path into its in-container namespace path.

use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Where the provider's root is remapped to inside the container namespace.
/// Defaults to `/run/host`; a Flatpak subsandbox instead exposes it as
/// `/run/parent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderNamespace {
    Host,
    FlatpakParent,
}

impl ProviderNamespace {
    pub fn in_container_root(self) -> &'static str {
        match self {
            ProviderNamespace::Host => "/run/host",
            ProviderNamespace::FlatpakParent => "/run/parent",
        }
    }
}

/// A read-only view of the provider's filesystem tree.
pub struct ProviderView {
    path: PathBuf,
    dirfd: OwnedFd,
    namespace: ProviderNamespace,
}

impl ProviderView {
    pub fn open(path: impl Into<PathBuf>, namespace: ProviderNamespace) -> Result<Self> {
        let path = path.into();
        let raw = nix::fcntl::open(
            &path,
            nix::fcntl::OFlag::O_PATH | nix::fcntl::OFlag::O_DIRECTORY | nix::fcntl::OFlag::O_CLOEXEC,
            nix::sys::stat::Mode::empty(),
        )
        .with_context(|| format!("failed to open provider view {}", path.display()))?;
        let dirfd = unsafe { std::os::unix::io::FromRawFd::from_raw_fd(raw) };
        Ok(Self {
            path,
            dirfd,
            namespace,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dirfd(&self) -> RawFd {
        self.dirfd.as_raw_fd()
    }

    pub fn namespace(&self) -> ProviderNamespace {
        self.namespace
    }

    /// Rewrites an absolute provider-namespace path (e.g.
    /// `/usr/lib/x86_64-linux-gnu/libEGL_mesa.so.0`) into the path it has
    /// inside the container once the provider is bind-mounted at
    /// `namespace.in_container_root()`.
    pub fn remap(&self, provider_absolute_path: &Path) -> PathBuf {
        let stripped = provider_absolute_path
            .strip_prefix("/")
            .unwrap_or(provider_absolute_path);
        Path::new(self.namespace.in_container_root()).join(stripped)
    }

    /// The `--remap-link-prefix` arguments `capture-libs` needs so it
    /// rewrites symlink targets it creates, covering the three prefixes a
    /// merged-`/usr` provider root can expose libraries under.
    pub fn remap_link_prefix_args(&self) -> Vec<String> {
        let root = self.namespace.in_container_root();
        ["/app/", "/usr/", "/lib"]
            .iter()
            .map(|prefix| format!("--remap-link-prefix={prefix}={root}{prefix}"))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaps_absolute_path_into_host_namespace() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let view = ProviderView::open(dir.path(), ProviderNamespace::Host)?;
        assert_eq!(
            view.remap(Path::new("/usr/lib/x86_64-linux-gnu/libEGL_mesa.so.0")),
            PathBuf::from("/run/host/usr/lib/x86_64-linux-gnu/libEGL_mesa.so.0")
        );
        Ok(())
    }

    #[test]
    fn flatpak_subsandbox_remaps_into_parent_namespace() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let view = ProviderView::open(dir.path(), ProviderNamespace::FlatpakParent)?;
        assert_eq!(
            view.remap(Path::new("/lib/libc.so.6")),
            PathBuf::from("/run/parent/lib/libc.so.6")
        );
        Ok(())
    }

    #[test]
    fn builds_remap_link_prefix_args() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let view = ProviderView::open(dir.path(), ProviderNamespace::Host)?;
        let args = view.remap_link_prefix_args();
        assert!(args.contains(&"--remap-link-prefix=/usr/=/run/host/usr/".to_owned()));
        Ok(())
    }
}
