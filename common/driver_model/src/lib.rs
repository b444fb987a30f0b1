// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The driver data model: a tagged sum of the driver kinds the Driver
//! Enumerator can produce (re-architected from the source's runtime type
//! hierarchy per the polymorphism design note), plus the `DriverSource`
//! capability trait the core consumes it through.

mod source;

pub use source::*;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;

/// How a driver's library resolved against a given architecture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LibraryPathSpec {
    /// An absolute path in the provider's namespace.
    Absolute(PathBuf),
    /// A bare SONAME, resolved by the capture helper's search path.
    Soname(String),
    /// No library is associated with this driver (a Vulkan meta-layer).
    None,
}

/// The common shape every concrete driver record exposes to the core,
/// regardless of its specific kind.
pub trait DriverInfo {
    /// Path to the driver's JSON manifest in the provider, if any.
    fn json_path(&self) -> Option<&Path>;
    /// The library path as declared by the manifest, before classification.
    fn library_path_spec(&self) -> &LibraryPathSpec;
    /// Resolves the library path, consulting dynamic-linker token expansion
    /// where applicable. Returns the same value as `library_path_spec` for
    /// drivers that don't need extra resolution.
    fn resolve_library_path(&self) -> &LibraryPathSpec {
        self.library_path_spec()
    }
    /// A loader-reported error for this driver, if enumeration found one.
    fn check_error(&self) -> Option<&str>;
    /// Renders a new JSON manifest with `library_path` replaced by
    /// `new_path`, for drivers captured as an `Absolute` library.
    fn write_json_with_library_path(&self, original_json: &str, new_path: &str) -> Result<String>;
}

macro_rules! driver_struct {
    ($name:ident) => {
        #[derive(Debug, Clone)]
        pub struct $name {
            pub debug_name: String,
            pub json_path: Option<PathBuf>,
            pub library_path: LibraryPathSpec,
            pub error: Option<String>,
        }

        impl DriverInfo for $name {
            fn json_path(&self) -> Option<&Path> {
                self.json_path.as_deref()
            }
            fn library_path_spec(&self) -> &LibraryPathSpec {
                &self.library_path
            }
            fn check_error(&self) -> Option<&str> {
                self.error.as_deref()
            }
            fn write_json_with_library_path(&self, original_json: &str, new_path: &str) -> Result<String> {
                rewrite_library_path_field(original_json, new_path)
            }
        }
    };
}

driver_struct!(EglIcd);
driver_struct!(EglExtPlatform);
driver_struct!(VulkanIcd);
driver_struct!(DriDriver);
driver_struct!(VaApiDriver);
driver_struct!(VdpauDriver);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VulkanLayerKind {
    Explicit,
    Implicit,
}

#[derive(Debug, Clone)]
pub struct VulkanLayer {
    pub debug_name: String,
    pub json_path: Option<PathBuf>,
    pub library_path: LibraryPathSpec,
    pub error: Option<String>,
    pub kind: VulkanLayerKind,
    /// True for meta-layers, which have no library of their own.
    pub is_meta: bool,
}

impl DriverInfo for VulkanLayer {
    fn json_path(&self) -> Option<&Path> {
        self.json_path.as_deref()
    }
    fn library_path_spec(&self) -> &LibraryPathSpec {
        if self.is_meta {
            &LibraryPathSpec::None
        } else {
            &self.library_path
        }
    }
    fn check_error(&self) -> Option<&str> {
        self.error.as_deref()
    }
    fn write_json_with_library_path(&self, original_json: &str, new_path: &str) -> Result<String> {
        rewrite_library_path_field(original_json, new_path)
    }
}

/// The tagged sum of every driver kind the enumerator can produce.
#[derive(Debug, Clone)]
pub enum Driver {
    EglIcd(EglIcd),
    EglExtPlatform(EglExtPlatform),
    VulkanIcd(VulkanIcd),
    VulkanLayer(VulkanLayer),
    DriDriver(DriDriver),
    VaApiDriver(VaApiDriver),
    VdpauDriver(VdpauDriver),
}

impl Driver {
    pub fn debug_name(&self) -> &str {
        match self {
            Driver::EglIcd(d) => &d.debug_name,
            Driver::EglExtPlatform(d) => &d.debug_name,
            Driver::VulkanIcd(d) => &d.debug_name,
            Driver::VulkanLayer(d) => &d.debug_name,
            Driver::DriDriver(d) => &d.debug_name,
            Driver::VaApiDriver(d) => &d.debug_name,
            Driver::VdpauDriver(d) => &d.debug_name,
        }
    }

    pub fn info(&self) -> &dyn DriverInfo {
        match self {
            Driver::EglIcd(d) => d,
            Driver::EglExtPlatform(d) => d,
            Driver::VulkanIcd(d) => d,
            Driver::VulkanLayer(d) => d,
            Driver::DriDriver(d) => d,
            Driver::VaApiDriver(d) => d,
            Driver::VdpauDriver(d) => d,
        }
    }

    /// The subdirectory under `overrides/share/` this driver's manifest
    /// belongs in.
    pub fn manifest_subdir(&self) -> &'static str {
        match self {
            Driver::EglIcd(_) => "glvnd/egl_vendor.d",
            Driver::EglExtPlatform(_) => "egl/egl_external_platform.d",
            Driver::VulkanIcd(_) => "vulkan/icd.d",
            Driver::VulkanLayer(d) => match d.kind {
                VulkanLayerKind::Explicit => "vulkan/explicit_layer.d",
                VulkanLayerKind::Implicit => "vulkan/implicit_layer.d",
            },
            // DRI/VA-API/VDPAU drivers aren't manifest-described; they're
            // found via search-path env vars instead (§4.12).
            Driver::DriDriver(_) | Driver::VaApiDriver(_) | Driver::VdpauDriver(_) => "",
        }
    }
}

/// A minimal, dependency-free JSON `library_path` field rewrite: this core
/// only ever needs to replace one top-level string field, so a hand-rolled
/// search avoids pulling a full JSON value tree through this crate just to
/// round-trip one field. `manifest_emitter` uses `serde_json` for anything
/// structural.
fn rewrite_library_path_field(original_json: &str, new_path: &str) -> Result<String> {
    let key = "\"library_path\"";
    let Some(key_pos) = original_json.find(key) else {
        anyhow::bail!("manifest has no \"library_path\" field");
    };
    let after_key = &original_json[key_pos + key.len()..];
    let colon_pos = after_key
        .find(':')
        .ok_or_else(|| anyhow::anyhow!("malformed manifest near \"library_path\""))?;
    let after_colon = &after_key[colon_pos + 1..];
    let value_start_rel = after_colon
        .find('"')
        .ok_or_else(|| anyhow::anyhow!("library_path value is not a string"))?;
    let value_start = key_pos + key.len() + colon_pos + 1 + value_start_rel + 1;
    let rest = &original_json[value_start..];
    let mut value_end_rel = None;
    let mut escaped = false;
    for (i, c) in rest.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '"' => {
                value_end_rel = Some(i);
                break;
            }
            _ => {}
        }
    }
    let value_end = value_start
        + value_end_rel.ok_or_else(|| anyhow::anyhow!("unterminated library_path string"))?;

    let escaped_new_path = new_path.replace('\\', "\\\\").replace('"', "\\\"");
    let mut result = String::with_capacity(original_json.len());
    result.push_str(&original_json[..value_start]);
    result.push_str(&escaped_new_path);
    result.push_str(&original_json[value_end..]);
    Ok(result)
}

/// Per-architecture resolution state for one enumerated driver, keyed by
/// `Architecture::index`. One `DriverRecord` is created per enumerated
/// object and lives for the session.
#[derive(Debug, Clone, Default)]
pub struct DriverRecord {
    pub slots: BTreeMap<usize, DriverSlot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Absent,
    Absolute,
    Soname,
    MetaLayer,
}

#[derive(Debug, Clone, Default)]
pub struct DriverSlot {
    pub resolved_library: Option<LibraryPathSpec>,
    pub kind: Option<SlotKind>,
    pub path_in_container: Option<PathBuf>,
}

impl DriverRecord {
    pub fn slot_mut(&mut self, arch_index: usize) -> &mut DriverSlot {
        self.slots.entry(arch_index).or_default()
    }

    pub fn slot(&self, arch_index: usize) -> Option<&DriverSlot> {
        self.slots.get(&arch_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_library_path_field() {
        let original = r#"{"file_format_version":"1.0.0","ICD":{"library_path":"libEGL_mesa.so.0","api_version":"1.0"}}"#;
        let rewritten = rewrite_library_path_field(
            original,
            "/run/host/usr/lib/x86_64-linux-gnu/libEGL_mesa.so.0",
        )
        .unwrap();
        assert!(rewritten.contains("\"library_path\":\"/run/host/usr/lib/x86_64-linux-gnu/libEGL_mesa.so.0\""));
        assert!(rewritten.contains("\"api_version\":\"1.0\""));
    }

    #[test]
    fn manifest_subdir_routes_by_driver_kind() {
        let icd = Driver::EglIcd(EglIcd {
            debug_name: "mesa".into(),
            json_path: None,
            library_path: LibraryPathSpec::None,
            error: None,
        });
        assert_eq!(icd.manifest_subdir(), "glvnd/egl_vendor.d");

        let layer = Driver::VulkanLayer(VulkanLayer {
            debug_name: "overlay".into(),
            json_path: None,
            library_path: LibraryPathSpec::None,
            error: None,
            kind: VulkanLayerKind::Implicit,
            is_meta: false,
        });
        assert_eq!(layer.manifest_subdir(), "vulkan/implicit_layer.d");
    }

    #[test]
    fn meta_layer_reports_no_library() {
        let layer = VulkanLayer {
            debug_name: "meta".into(),
            json_path: None,
            library_path: LibraryPathSpec::Absolute(PathBuf::from("/should/be/ignored")),
            error: None,
            kind: VulkanLayerKind::Explicit,
            is_meta: true,
        };
        assert_eq!(layer.library_path_spec(), &LibraryPathSpec::None);
    }
}
