// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Builds the environment variables a session's container is launched
//! with, from the search-path accumulators the capture pipeline filled in.

use std::collections::BTreeMap;
use std::ffi::OsString;

/// One active architecture's library search directories, as in-container
/// paths.
#[derive(Debug, Clone)]
pub struct ArchSearchPaths {
    pub library_dir: String,
    pub aliases_dir: String,
}

/// The driver search-path accumulators the capture pipeline filled in,
/// already joined across architectures in priority order.
#[derive(Debug, Clone, Default)]
pub struct DriverSearchPaths {
    pub libgl_drivers: Vec<String>,
    pub libva_drivers: Vec<String>,
    pub vulkan_icds: Vec<String>,
    pub vulkan_explicit_layers: Vec<String>,
    pub vulkan_implicit_layers: Vec<String>,
    pub egl_vendor_manifests: Vec<String>,
    pub egl_external_platform_manifests: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct EnvironmentInputs {
    pub arch_search_paths: Vec<ArchSearchPaths>,
    pub driver_search_paths: DriverSearchPaths,
    pub overrides_share_dir: Option<String>,
    pub vulkan_layers_imported: bool,
    pub vdpau_driver_path: Option<String>,
    pub is_legacy_scout_runtime: bool,
    pub existing_xdg_data_dirs: Option<String>,
}

const SEARCH_PATH_SEP: &str = ":";

fn join_paths(paths: &[String]) -> Option<String> {
    if paths.is_empty() {
        None
    } else {
        Some(paths.join(SEARCH_PATH_SEP))
    }
}

/// Builds the full environment as a `BTreeMap` so output is deterministic;
/// callers encode it however their exec path needs (the sandbox argument
/// list's `envs` field, or direct `std::env::set_var` calls for an in-process
/// launch).
pub fn build_environment(inputs: &EnvironmentInputs) -> BTreeMap<OsString, OsString> {
    let mut env = BTreeMap::new();
    let mut set = |key: &str, value: String| {
        env.insert(OsString::from(key), OsString::from(value));
    };

    let mut ld_library_path = Vec::new();
    for arch in &inputs.arch_search_paths {
        ld_library_path.push(arch.library_dir.clone());
        ld_library_path.push(arch.aliases_dir.clone());
    }
    if let Some(joined) = join_paths(&ld_library_path) {
        set("LD_LIBRARY_PATH", joined);
    }

    set("PATH", "/usr/bin:/bin".to_owned());

    if let Some(joined) = join_paths(&inputs.driver_search_paths.libgl_drivers) {
        set("LIBGL_DRIVERS_PATH", joined);
    }
    if let Some(joined) = join_paths(&inputs.driver_search_paths.libva_drivers) {
        set("LIBVA_DRIVERS_PATH", joined);
    }
    if let Some(joined) = join_paths(&inputs.driver_search_paths.vulkan_icds) {
        set("VK_DRIVER_FILES", joined.clone());
        set("VK_ICD_FILENAMES", joined);
    }
    let mut vulkan_layers = inputs.driver_search_paths.vulkan_explicit_layers.clone();
    vulkan_layers.extend(inputs.driver_search_paths.vulkan_implicit_layers.clone());
    if let Some(joined) = join_paths(&vulkan_layers) {
        set("VK_LAYER_PATH", joined);
    }
    if let Some(joined) = join_paths(&inputs.driver_search_paths.egl_vendor_manifests) {
        set("__EGL_VENDOR_LIBRARY_FILENAMES", joined);
    }
    if let Some(joined) = join_paths(&inputs.driver_search_paths.egl_external_platform_manifests) {
        set("__EGL_EXTERNAL_PLATFORM_CONFIG_FILENAMES", joined);
    }
    if let Some(vdpau) = &inputs.vdpau_driver_path {
        set("VDPAU_DRIVER_PATH", vdpau.clone());
    }

    if inputs.vulkan_layers_imported {
        if let Some(share_dir) = &inputs.overrides_share_dir {
            let xdg_data_dirs = match &inputs.existing_xdg_data_dirs {
                Some(existing) if !existing.is_empty() => format!("{share_dir}{SEARCH_PATH_SEP}{existing}"),
                _ => share_dir.clone(),
            };
            set("XDG_DATA_DIRS", xdg_data_dirs);
        }
    }

    if inputs.is_legacy_scout_runtime {
        set("STEAM_RUNTIME", "/".to_owned());
        env.remove(&OsString::from("SDL_VIDEODRIVER"));
    }

    env
}

/// A session should explicitly unset `SDL_VIDEODRIVER` when it was set to
/// `wayland` and the runtime self-identifies as legacy "scout" — scout's
/// bundled SDL predates reliable Wayland support. Returns true when the
/// caller's existing `SDL_VIDEODRIVER=wayland` should be dropped.
pub fn should_unset_wayland_video_driver(is_legacy_scout_runtime: bool, current_sdl_video_driver: Option<&str>) -> bool {
    is_legacy_scout_runtime && current_sdl_video_driver == Some("wayland")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ld_library_path_interleaves_library_and_alias_dirs() {
        let inputs = EnvironmentInputs {
            arch_search_paths: vec![
                ArchSearchPaths {
                    library_dir: "/overrides/lib/x86_64-linux-gnu".into(),
                    aliases_dir: "/overrides/lib/x86_64-linux-gnu/aliases".into(),
                },
                ArchSearchPaths {
                    library_dir: "/overrides/lib/i386-linux-gnu".into(),
                    aliases_dir: "/overrides/lib/i386-linux-gnu/aliases".into(),
                },
            ],
            ..Default::default()
        };
        let env = build_environment(&inputs);
        assert_eq!(
            env.get(&OsString::from("LD_LIBRARY_PATH")).unwrap(),
            &OsString::from(
                "/overrides/lib/x86_64-linux-gnu:/overrides/lib/x86_64-linux-gnu/aliases:\
                 /overrides/lib/i386-linux-gnu:/overrides/lib/i386-linux-gnu/aliases"
            )
        );
    }

    #[test]
    fn vulkan_icd_sets_both_modern_and_legacy_vars() {
        let inputs = EnvironmentInputs {
            driver_search_paths: DriverSearchPaths {
                vulkan_icds: vec!["/overrides/share/vulkan/icd.d/0-x86_64-linux-gnu.json".into()],
                ..Default::default()
            },
            ..Default::default()
        };
        let env = build_environment(&inputs);
        assert_eq!(env.get(&OsString::from("VK_DRIVER_FILES")), env.get(&OsString::from("VK_ICD_FILENAMES")));
    }

    #[test]
    fn xdg_data_dirs_only_set_when_layers_imported() {
        let inputs = EnvironmentInputs {
            overrides_share_dir: Some("/overrides/share".into()),
            vulkan_layers_imported: false,
            ..Default::default()
        };
        assert!(!build_environment(&inputs).contains_key(&OsString::from("XDG_DATA_DIRS")));

        let inputs = EnvironmentInputs {
            overrides_share_dir: Some("/overrides/share".into()),
            vulkan_layers_imported: true,
            existing_xdg_data_dirs: Some("/usr/share".into()),
            ..Default::default()
        };
        let env = build_environment(&inputs);
        assert_eq!(
            env.get(&OsString::from("XDG_DATA_DIRS")).unwrap(),
            &OsString::from("/overrides/share:/usr/share")
        );
    }

    #[test]
    fn legacy_scout_sets_steam_runtime_and_drops_wayland() {
        let inputs = EnvironmentInputs {
            is_legacy_scout_runtime: true,
            ..Default::default()
        };
        let env = build_environment(&inputs);
        assert_eq!(env.get(&OsString::from("STEAM_RUNTIME")).unwrap(), &OsString::from("/"));
        assert!(should_unset_wayland_video_driver(true, Some("wayland")));
        assert!(!should_unset_wayland_video_driver(true, Some("x11")));
        assert!(!should_unset_wayland_video_driver(false, Some("wayland")));
    }
}
