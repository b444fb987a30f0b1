// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Builds the sandbox argument list that describes how the container's
//! filesystem view is put together: provider binds, the `etc`/`var` entry
//! policy, the `ld.so.cache` tmpfs indirection, and the launcher's own
//! install prefix.

mod op;
mod policy;

pub use op::*;
pub use policy::*;

use std::path::{Path, PathBuf};

use anyhow::Result;
use provider_view::ProviderView;

pub const LDSO_INDIRECTION_DIR: &str = "run/pressure-vessel/ldso";
pub const LDSO_INDIRECTION_CACHE: &str = "run/pressure-vessel/ldso/ld.so.cache";
const LDSO_INDIRECTION_RUNTIME_COPY: &str = "run/pressure-vessel/ldso/runtime-ld.so.cache";

/// Step 1: binds the provider's `/usr` and (if present) `/etc` at its
/// in-container namespace root.
pub fn bind_provider_roots(provider: &ProviderView, provider_has_etc: bool) -> Vec<SandboxOp> {
    let mut ops = vec![SandboxOp::Bind(BindMountOp {
        host_path: provider.path().join("usr"),
        container_path: provider.remap(Path::new("/usr")),
        writable: false,
    })];
    if provider_has_etc {
        ops.push(SandboxOp::Bind(BindMountOp {
            host_path: provider.path().join("etc"),
            container_path: provider.remap(Path::new("/etc")),
            writable: false,
        }));
    }
    ops
}

/// Steps 2 and 6: classifies and binds each `etc`/`var/cache`/`var/lib`
/// entry the runtime ships, given its path relative to the sysroot root
/// (e.g. `"etc/resolv.conf"`).
pub fn bind_etc_var_entries(provider: &ProviderView, relative_paths: &[String]) -> Vec<SandboxOp> {
    let mut ops = Vec::new();
    for relative in relative_paths {
        let container_path = PathBuf::from("/").join(relative);
        match classify_entry(relative) {
            BindSource::None | BindSource::Runtime => {}
            BindSource::Host => ops.push(SandboxOp::Bind(BindMountOp {
                host_path: PathBuf::from("/").join(relative),
                container_path,
                writable: false,
            })),
            BindSource::Provider => ops.push(SandboxOp::Bind(BindMountOp {
                host_path: provider.path().join(relative),
                container_path,
                writable: false,
            })),
        }
    }
    ops
}

/// Steps 3–4: the `ld.so.cache` tmpfs indirection. `runtime_ld_so_cache` is
/// the host path to the runtime's own original cache file, seeded as the
/// indirection's initial target; `alternate_container_paths` are the
/// per-OS alternate locations (e.g. `var/cache/ldconfig/ld.so.cache`) that
/// should point at the same indirection.
pub fn ld_so_cache_indirection_ops(
    runtime_ld_so_cache: &Path,
    alternate_container_paths: &[String],
) -> Vec<SandboxOp> {
    let mut ops = vec![
        SandboxOp::Dir(DirOp {
            container_path: PathBuf::from("/").join(LDSO_INDIRECTION_DIR),
        }),
        SandboxOp::Bind(BindMountOp {
            host_path: runtime_ld_so_cache.to_path_buf(),
            container_path: PathBuf::from("/").join(LDSO_INDIRECTION_RUNTIME_COPY),
            writable: true,
        }),
        SandboxOp::Symlink(SymlinkOp {
            container_path: PathBuf::from("/").join(LDSO_INDIRECTION_CACHE),
            target: PathBuf::from("/").join(LDSO_INDIRECTION_RUNTIME_COPY),
        }),
        SandboxOp::Symlink(SymlinkOp {
            container_path: PathBuf::from("/etc/ld.so.cache"),
            target: PathBuf::from("/").join(LDSO_INDIRECTION_CACHE),
        }),
    ];

    for alternate in alternate_container_paths {
        ops.push(SandboxOp::Symlink(SymlinkOp {
            container_path: PathBuf::from("/").join(alternate),
            target: PathBuf::from("/").join(LDSO_INDIRECTION_CACHE),
        }));
    }

    ops
}

/// Step 5: binds `/etc/machine-id` and `/etc/timezone` from whichever host
/// source is present. `machine_id_source` may be host `/etc/machine-id` or
/// `/var/lib/dbus/machine-id`, whichever `existing_machine_id_source`
/// resolved to.
pub fn bind_machine_id_and_timezone(
    machine_id_source: Option<&Path>,
    timezone_source: Option<&Path>,
) -> Vec<SandboxOp> {
    let mut ops = Vec::new();
    if let Some(source) = machine_id_source {
        ops.push(SandboxOp::Bind(BindMountOp {
            host_path: source.to_path_buf(),
            container_path: PathBuf::from("/etc/machine-id"),
            writable: false,
        }));
    }
    if let Some(source) = timezone_source {
        ops.push(SandboxOp::Bind(BindMountOp {
            host_path: source.to_path_buf(),
            container_path: PathBuf::from("/etc/timezone"),
            writable: false,
        }));
    }
    ops
}

/// Step 8: binds the launcher's own install prefix into the container and
/// returns the in-container path of the adverb helper binary.
pub fn bind_launcher_prefix(launcher_install_prefix: &Path, container_mount_point: &str) -> (SandboxOp, PathBuf) {
    let container_path = PathBuf::from("/").join(container_mount_point);
    let op = SandboxOp::Bind(BindMountOp {
        host_path: launcher_install_prefix.to_path_buf(),
        container_path: container_path.clone(),
        writable: false,
    });
    (op, container_path.join("bin/pressure-vessel-adverb"))
}

/// Everything `assemble` needs collected up front; steps that need
/// filesystem enumeration (which `etc` entries the runtime ships, where
/// machine-id/timezone live) are the caller's job, since those depend on
/// the concrete runtime tree this crate doesn't otherwise touch.
pub struct AssembleInputs<'a> {
    pub provider: &'a ProviderView,
    pub provider_has_etc: bool,
    pub runtime_etc_var_entries: Vec<String>,
    pub runtime_ld_so_cache: PathBuf,
    pub ld_so_cache_alternates: Vec<String>,
    pub machine_id_source: Option<PathBuf>,
    pub timezone_source: Option<PathBuf>,
    pub launcher_install_prefix: PathBuf,
    pub launcher_container_mount_point: String,
    /// Step 7: when `None`, the overrides tree is already inside a mutable
    /// sysroot and needs no further ops; when `Some`, these are the
    /// `Dir`/`Symlink` ops that finalize it (built by `mutable_sysroot` /
    /// `manifest_emitter` callers and passed through unchanged).
    pub overrides_tree_ops: Option<Vec<SandboxOp>>,
}

/// The result of assembling the sandbox argument list's filesystem ops:
/// the ops themselves plus the resolved adverb helper path step 8 hands
/// back to the launcher.
pub struct Assembled {
    pub ops: Vec<SandboxOp>,
    pub adverb_helper_path: PathBuf,
}

pub fn assemble(inputs: &AssembleInputs) -> Result<Assembled> {
    let mut ops = bind_provider_roots(inputs.provider, inputs.provider_has_etc);
    ops.extend(bind_etc_var_entries(inputs.provider, &inputs.runtime_etc_var_entries));
    ops.extend(ld_so_cache_indirection_ops(
        &inputs.runtime_ld_so_cache,
        &inputs.ld_so_cache_alternates,
    ));
    ops.extend(bind_machine_id_and_timezone(
        inputs.machine_id_source.as_deref(),
        inputs.timezone_source.as_deref(),
    ));
    if let Some(overrides_ops) = &inputs.overrides_tree_ops {
        ops.extend(overrides_ops.clone());
    }
    let (launcher_op, adverb_helper_path) =
        bind_launcher_prefix(&inputs.launcher_install_prefix, &inputs.launcher_container_mount_point);
    ops.push(launcher_op);

    Ok(Assembled { ops, adverb_helper_path })
}
