// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Writes the rewritten or copied-through JSON manifests for Vulkan/EGL
//! ICDs and Vulkan layers.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use driver_model::{Driver, SlotKind};

/// One driver's manifest output, once written.
#[derive(Debug, Clone)]
pub struct EmittedManifest {
    pub driver_debug_name: String,
    pub container_path: PathBuf,
}

fn digit_width(len: usize) -> usize {
    if len <= 1 {
        1
    } else {
        (len - 1).to_string().len()
    }
}

/// One driver queued for manifest emission: its record, how its library
/// resolved for this architecture, and (for `Absolute` drivers) the
/// in-container path the capture pipeline placed the library at.
pub struct ManifestInput<'a> {
    pub driver: &'a Driver,
    pub kind: SlotKind,
    pub in_container_library_path: Option<PathBuf>,
}

/// Emits one manifest per driver in `inputs` into `dest_dir`
/// (`overrides/share/<subdir>`), numbering filenames `0`-padded to the
/// width `inputs.len()` needs. Drivers whose kind is `Absent` are skipped —
/// they weren't actually captured.
pub fn emit_manifests(
    dest_dir: &Path,
    tuple: &str,
    inputs: &[ManifestInput],
    read_original_json: &dyn Fn(&Path) -> Result<String>,
) -> Result<Vec<EmittedManifest>> {
    fs::create_dir_all(dest_dir).with_context(|| format!("failed to create {}", dest_dir.display()))?;

    let width = digit_width(inputs.len());
    let mut emitted = Vec::new();

    for (idx, input) in inputs.iter().enumerate() {
        if input.kind == SlotKind::Absent {
            continue;
        }

        let info = input.driver.info();
        let Some(json_path) = info.json_path() else {
            bail!(
                "driver {} has no source manifest to emit from",
                input.driver.debug_name()
            );
        };
        let original = read_original_json(json_path)
            .with_context(|| format!("failed to read manifest {}", json_path.display()))?;

        let (filename, contents) = match input.kind {
            SlotKind::Absolute => {
                let Some(library_path) = &input.in_container_library_path else {
                    bail!(
                        "driver {} classified Absolute but has no captured library path",
                        input.driver.debug_name()
                    );
                };
                let rewritten = info.write_json_with_library_path(&original, &library_path.to_string_lossy())?;
                (format!("{idx:0width$}-{tuple}.json"), rewritten)
            }
            SlotKind::Soname | SlotKind::MetaLayer => (format!("{idx:0width$}.json"), original),
            SlotKind::Absent => unreachable!("filtered above"),
        };

        let container_path = dest_dir.join(&filename);
        fs::write(&container_path, contents)
            .with_context(|| format!("failed to write {}", container_path.display()))?;

        emitted.push(EmittedManifest {
            driver_debug_name: input.driver.debug_name().to_owned(),
            container_path,
        });
    }

    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use driver_model::{LibraryPathSpec, VulkanIcd};

    fn icd(name: &str, json_path: PathBuf) -> Driver {
        Driver::VulkanIcd(VulkanIcd {
            debug_name: name.into(),
            json_path: Some(json_path),
            library_path: LibraryPathSpec::Absolute("libvulkan_fake.so".into()),
            error: None,
        })
    }

    #[test]
    fn absolute_driver_gets_rewritten_manifest() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source_json = dir.path().join("source.json");
        fs::write(&source_json, r#"{"ICD":{"library_path":"libvulkan_fake.so","api_version":"1.3"}}"#)?;

        let driver = icd("fake_icd", source_json.clone());
        let inputs = vec![ManifestInput {
            driver: &driver,
            kind: SlotKind::Absolute,
            in_container_library_path: Some(PathBuf::from("/run/host/usr/lib/x86_64-linux-gnu/libvulkan_fake.so")),
        }];

        let dest = dir.path().join("overrides/share/vulkan/icd.d");
        let emitted = emit_manifests(&dest, "x86_64-linux-gnu", &inputs, &|p| Ok(fs::read_to_string(p)?))?;

        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].container_path, dest.join("0-x86_64-linux-gnu.json"));
        let contents = fs::read_to_string(&emitted[0].container_path)?;
        assert!(contents.contains("/run/host/usr/lib/x86_64-linux-gnu/libvulkan_fake.so"));
        Ok(())
    }

    #[test]
    fn absent_driver_is_skipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source_json = dir.path().join("source.json");
        fs::write(&source_json, "{}")?;
        let driver = icd("gone", source_json);
        let inputs = vec![ManifestInput {
            driver: &driver,
            kind: SlotKind::Absent,
            in_container_library_path: None,
        }];
        let dest = dir.path().join("dest");
        let emitted = emit_manifests(&dest, "x86_64-linux-gnu", &inputs, &|p| Ok(fs::read_to_string(p)?))?;
        assert!(emitted.is_empty());
        Ok(())
    }

    #[test]
    fn soname_driver_copies_manifest_through_unchanged() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source_json = dir.path().join("source.json");
        fs::write(&source_json, r#"{"ICD":{"library_path":"libvulkan_fake.so.1"}}"#)?;
        let driver = icd("soname_icd", source_json);
        let inputs = vec![ManifestInput {
            driver: &driver,
            kind: SlotKind::Soname,
            in_container_library_path: None,
        }];
        let dest = dir.path().join("dest");
        let emitted = emit_manifests(&dest, "x86_64-linux-gnu", &inputs, &|p| Ok(fs::read_to_string(p)?))?;
        assert_eq!(emitted[0].container_path, dest.join("0.json"));
        Ok(())
    }
}
