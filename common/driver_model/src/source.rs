// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The `DriverSource` capability interface: the boundary between this core
//! and whatever component actually walks the provider's filesystem and
//! talks to its loaders to enumerate drivers. Kept as a trait so the core
//! can be exercised against a stub in tests without a real graphics stack.

use anyhow::Result;

use arch_plan::Architecture;
use provider_view::ProviderView;

use crate::{DriDriver, EglExtPlatform, EglIcd, VaApiDriver, VdpauDriver, VulkanIcd, VulkanLayer};

/// Enumerates drivers present in a provider, one call per driver kind. A
/// session calls each method once per architecture that activated.
///
/// `Send + Sync` so a session can fan enumeration out across one thread per
/// active architecture, sharing one `DriverSource` across the pool.
pub trait DriverSource: Send + Sync {
    fn enumerate_egl_icds(&self, provider: &ProviderView, arch: &Architecture) -> Result<Vec<EglIcd>>;
    fn enumerate_egl_ext_platforms(
        &self,
        provider: &ProviderView,
        arch: &Architecture,
    ) -> Result<Vec<EglExtPlatform>>;
    fn enumerate_vulkan_icds(&self, provider: &ProviderView, arch: &Architecture) -> Result<Vec<VulkanIcd>>;
    fn enumerate_vulkan_layers(
        &self,
        provider: &ProviderView,
        arch: &Architecture,
    ) -> Result<Vec<VulkanLayer>>;
    fn enumerate_dri_drivers(&self, provider: &ProviderView, arch: &Architecture) -> Result<Vec<DriDriver>>;
    fn enumerate_va_api_drivers(
        &self,
        provider: &ProviderView,
        arch: &Architecture,
    ) -> Result<Vec<VaApiDriver>>;
    fn enumerate_vdpau_drivers(
        &self,
        provider: &ProviderView,
        arch: &Architecture,
    ) -> Result<Vec<VdpauDriver>>;
    /// The `${PLATFORM}` dynamic-linker token reported by the provider's
    /// `libdl` for this architecture, if it could be determined.
    fn libdl_platform(&self, provider: &ProviderView, arch: &Architecture) -> Result<Option<String>>;
}

/// A `DriverSource` that finds nothing, used when no graphics stack was
/// configured for a session (`PROVIDER_GRAPHICS_STACK` unset).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDriverSource;

impl DriverSource for NullDriverSource {
    fn enumerate_egl_icds(&self, _provider: &ProviderView, _arch: &Architecture) -> Result<Vec<EglIcd>> {
        Ok(Vec::new())
    }

    fn enumerate_egl_ext_platforms(
        &self,
        _provider: &ProviderView,
        _arch: &Architecture,
    ) -> Result<Vec<EglExtPlatform>> {
        Ok(Vec::new())
    }

    fn enumerate_vulkan_icds(&self, _provider: &ProviderView, _arch: &Architecture) -> Result<Vec<VulkanIcd>> {
        Ok(Vec::new())
    }

    fn enumerate_vulkan_layers(
        &self,
        _provider: &ProviderView,
        _arch: &Architecture,
    ) -> Result<Vec<VulkanLayer>> {
        Ok(Vec::new())
    }

    fn enumerate_dri_drivers(&self, _provider: &ProviderView, _arch: &Architecture) -> Result<Vec<DriDriver>> {
        Ok(Vec::new())
    }

    fn enumerate_va_api_drivers(
        &self,
        _provider: &ProviderView,
        _arch: &Architecture,
    ) -> Result<Vec<VaApiDriver>> {
        Ok(Vec::new())
    }

    fn enumerate_vdpau_drivers(
        &self,
        _provider: &ProviderView,
        _arch: &Architecture,
    ) -> Result<Vec<VdpauDriver>> {
        Ok(Vec::new())
    }

    fn libdl_platform(&self, _provider: &ProviderView, _arch: &Architecture) -> Result<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider_view::ProviderNamespace;

    fn fake_arch() -> Architecture {
        Architecture {
            index: 0,
            tuple: "x86_64-linux-gnu".into(),
            multilib_search_list: vec!["lib/x86_64-linux-gnu".into()],
            platform_tokens: vec!["x86_64".into()],
            ld_so_path: "/etc/ld.so.cache".into(),
            ld_so_cache_alternates: Vec::new(),
            capture_libs_helper: "/usr/bin/capture-libs".into(),
        }
    }

    #[test]
    fn null_driver_source_finds_nothing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let provider = ProviderView::open(dir.path(), ProviderNamespace::Host)?;
        let arch = fake_arch();
        let source = NullDriverSource;
        assert!(source.enumerate_egl_icds(&provider, &arch)?.is_empty());
        assert!(source.enumerate_vulkan_layers(&provider, &arch)?.is_empty());
        assert_eq!(source.libdl_platform(&provider, &arch)?, None);
        Ok(())
    }
}
