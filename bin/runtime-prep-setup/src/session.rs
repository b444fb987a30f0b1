// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! `RuntimeSession`: the object hierarchy's replacement per the "plain
//! structs + functions" design note. Owns the pieces a session threads
//! through its lifetime (mutable sysroot or bind root, provider view) and
//! drives every phase in order: source resolution, architecture activation,
//! per-architecture graphics capture, sandbox assembly, and environment
//! construction.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};

use arch_plan::{activate, known_architectures, Architecture};
use cache_store::{parse_build_id_sidecar, ArchiveSource, CacheStore, GcStats};
use capture_pipeline::{run_capture_pipeline, CaptureCandidate, CaptureContext, CaptureOutcome};
use driver_model::{Driver, DriverSource, LibraryPathSpec, NullDriverSource, SlotKind};
use environment_builder::{build_environment, ArchSearchPaths, DriverSearchPaths, EnvironmentInputs};
use locks::{Lock, LockMode};
use manifest_emitter::{
    emit_manifests, locate_gconv_dir, plan_ld_so_redirect, LdSoAction, ManifestInput, ExecutableImportance,
    GLIBC_EXECUTABLES, NSS_IDN_SONAME_PATTERNS,
};
use mutable_sysroot::{create_mutable_sysroot, MutableSysroot};
use provider_view::{ProviderNamespace, ProviderView};
use runtime_source::classify;
use shadow_remover::{candidate_library_dirs, dedup_library_dirs, remove_shadows, OverridesContext, ShadowDecision};
use sysroot_assembler::{
    assemble, bind_machine_id_and_timezone, bind_launcher_prefix, ld_so_cache_indirection_ops, AssembleInputs,
    BindMountOp, SandboxOp,
};

use crate::config::RuntimeConfig;

/// Where the overrides tree lives relative to a sysroot's `usr/`.
const OVERRIDES_REL: &str = "usr/lib/pressure-vessel/overrides";

/// Which of the mutually-exclusive container-root strategies a session
/// picked: mutable sysroot means direct writes; a bound root means every
/// change is expressed as a sandbox op instead. The two are never combined
/// for the same path.
enum ContainerRoot {
    Mutable(MutableSysroot),
    Bound { host_usr: PathBuf },
}

impl ContainerRoot {
    fn overrides_root(&self) -> Option<PathBuf> {
        match self {
            ContainerRoot::Mutable(ms) => Some(ms.path().join(OVERRIDES_REL)),
            ContainerRoot::Bound { .. } => None,
        }
    }
}

/// Bits-width used to pick the legacy (non-multiarch) library directory
/// name for a tuple, per `shadow_remover::candidate_library_dirs`.
fn arch_bits(tuple: &str) -> &'static str {
    if tuple.starts_with("x86_64") || tuple.starts_with("aarch64") {
        "64"
    } else {
        "32"
    }
}

fn logical_set_name(driver: &Driver) -> &'static str {
    match driver {
        Driver::EglIcd(_) => "egl_icd",
        Driver::EglExtPlatform(_) => "egl_ext_platform",
        Driver::VulkanIcd(_) => "vulkan_icd",
        Driver::VulkanLayer(l) => match l.kind {
            driver_model::VulkanLayerKind::Explicit => "vulkan_explicit_layer",
            driver_model::VulkanLayerKind::Implicit => "vulkan_implicit_layer",
        },
        Driver::DriDriver(_) => "dri",
        Driver::VaApiDriver(_) => "va_api",
        Driver::VdpauDriver(_) => "vdpau",
    }
}

/// Rewrites a host path under `overrides_root` into its in-container path
/// once the overrides tree is mounted at `/usr/lib/pressure-vessel/overrides`.
fn to_container_overrides_path(overrides_root: &Path, host_path: &Path) -> PathBuf {
    let relative = host_path.strip_prefix(overrides_root).unwrap_or(host_path);
    Path::new("/").join(OVERRIDES_REL).join(relative)
}

/// The outcome of driving one active architecture through graphics capture,
/// shadow removal and manifest emission.
struct ArchOutcome {
    tuple: String,
    capture: CaptureOutcome,
    shadow_decisions: Vec<ShadowDecision>,
    manifests: Vec<PathBuf>,
    vulkan_explicit_manifests: Vec<PathBuf>,
    vulkan_implicit_manifests: Vec<PathBuf>,
    egl_vendor_manifests: Vec<PathBuf>,
    egl_ext_manifests: Vec<PathBuf>,
    vulkan_icd_manifests: Vec<PathBuf>,
    libc_from_provider: bool,
    /// Ops the session's own `ops` list couldn't hold until capture finished
    /// for this architecture, e.g. the bind-mount form of the ld.so
    /// redirect when no mutable sysroot exists.
    extra_ops: Vec<SandboxOp>,
}

pub struct RuntimeSession {
    config: RuntimeConfig,
    driver_source: Box<dyn DriverSource>,
}

/// Everything a session produces: the sandbox argument list, the process
/// environment, and bookkeeping useful to callers and tests.
pub struct SessionOutput {
    pub ops: Vec<SandboxOp>,
    pub environment: BTreeMap<OsString, OsString>,
    pub active_architectures: Vec<String>,
    pub shadow_decisions: Vec<ShadowDecision>,
    pub gc_stats: Option<GcStats>,
}

impl RuntimeSession {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            driver_source: Box::new(NullDriverSource),
        }
    }

    pub fn with_driver_source(mut self, source: Box<dyn DriverSource>) -> Self {
        self.driver_source = source;
        self
    }

    pub fn run(&self) -> Result<SessionOutput> {
        let cache = CacheStore::open_or_create(&self.config.var_dir)?;

        let deployment_dir = self.resolve_deployment_dir(&cache)?;
        let classified = classify(&deployment_dir);

        let need_mutable = classified.mutable_copy_mandatory || self.config.copy_runtime;
        let container_root = if need_mutable {
            let source_ref = deployment_dir.join(".ref");
            let source_lock = Lock::acquire_blocking(None, &source_ref, LockMode::Read, true)
                .context("failed to take read lock on runtime source")?;
            let mutable = create_mutable_sysroot(cache.root(), &classified, source_lock, true)
                .context("failed to build mutable sysroot")?;
            ContainerRoot::Mutable(mutable)
        } else {
            if self.config.executor.is_none() {
                bail!("ConfigError: --executor is required when no mutable sysroot is built");
            }
            ContainerRoot::Bound {
                host_usr: classified.source_root.clone(),
            }
        };

        let provider_namespace = if self.config.flatpak_subsandbox {
            ProviderNamespace::FlatpakParent
        } else {
            ProviderNamespace::Host
        };
        let provider_view = match &self.config.provider {
            Some(p) if self.config.provider_graphics_stack => {
                Some(ProviderView::open(p, provider_namespace).context("failed to open graphics provider")?)
            }
            _ => None,
        };

        let architectures = known_architectures(&self.config.tools_dir);
        let active = activate(&architectures)?;

        let (overrides_root, overrides_tree_ops) = match container_root.overrides_root() {
            Some(root) => (root, None),
            None => {
                let scratch = tempfile::Builder::new()
                    .prefix("tmp-")
                    .rand_bytes(6)
                    .tempdir_in(cache.root())
                    .context("failed to create overrides scratch directory")?
                    .into_path();
                let ops = vec![SandboxOp::Bind(BindMountOp {
                    host_path: scratch.clone(),
                    container_path: Path::new("/").join(OVERRIDES_REL),
                    writable: false,
                })];
                (scratch, Some(ops))
            }
        };
        fs::create_dir_all(&overrides_root).context("failed to create overrides tree")?;

        let sysroot_root: Option<PathBuf> = match &container_root {
            ContainerRoot::Mutable(ms) => Some(ms.path().to_path_buf()),
            ContainerRoot::Bound { .. } => None,
        };

        let arch_outcomes = if let Some(provider) = &provider_view {
            if self.config.single_thread {
                active
                    .iter()
                    .map(|(arch, _)| self.process_architecture(arch, provider, &overrides_root, sysroot_root.as_deref()))
                    .collect::<Result<Vec<_>>>()?
            } else {
                std::thread::scope(|scope| -> Result<Vec<ArchOutcome>> {
                    let handles: Vec<_> = active
                        .iter()
                        .map(|(arch, _)| {
                            scope.spawn(|| self.process_architecture(arch, provider, &overrides_root, sysroot_root.as_deref()))
                        })
                        .collect();
                    handles
                        .into_iter()
                        .map(|h| h.join().map_err(|_| anyhow!("driver capture thread panicked"))?)
                        .collect()
                })?
            }
        } else {
            Vec::new()
        };

        self.write_vdpau_platform_symlinks(&overrides_root, &active, &arch_outcomes)?;

        let runtime_etc_dir = deployment_dir.join("etc");
        let runtime_etc_var_entries: Vec<String> = fs::read_dir(&runtime_etc_dir)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .map(|e| format!("etc/{}", e.file_name().to_string_lossy()))
            .collect();
        let runtime_ld_so_cache = deployment_dir.join("etc/ld.so.cache");
        let ld_so_cache_alternates: Vec<String> = active
            .iter()
            .flat_map(|(arch, _)| arch.ld_so_cache_alternates.clone())
            .collect();
        let machine_id_source = [Path::new("/etc/machine-id"), Path::new("/var/lib/dbus/machine-id")]
            .into_iter()
            .find(|p| p.exists())
            .map(Path::to_path_buf);
        let timezone_source = Path::new("/etc/timezone").exists().then(|| PathBuf::from("/etc/timezone"));

        let mut ops = Vec::new();
        if let Some(provider) = &provider_view {
            let assembled = assemble(&AssembleInputs {
                provider,
                provider_has_etc: provider.path().join("etc").is_dir(),
                runtime_etc_var_entries,
                runtime_ld_so_cache,
                ld_so_cache_alternates,
                machine_id_source,
                timezone_source,
                launcher_install_prefix: self.config.launcher_install_prefix.clone(),
                launcher_container_mount_point: "run/pressure-vessel/from-host".into(),
                overrides_tree_ops: overrides_tree_ops.clone(),
            })?;
            ops = assembled.ops;
        } else {
            ops.extend(ld_so_cache_indirection_ops(&runtime_ld_so_cache, &ld_so_cache_alternates));
            ops.extend(bind_machine_id_and_timezone(
                machine_id_source.as_deref(),
                timezone_source.as_deref(),
            ));
            if let Some(extra) = overrides_tree_ops {
                ops.extend(extra);
            }
            let (launcher_op, _adverb_helper_path) =
                bind_launcher_prefix(&self.config.launcher_install_prefix, "run/pressure-vessel/from-host");
            ops.push(launcher_op);
        }
        if let ContainerRoot::Bound { host_usr } = &container_root {
            ops.push(SandboxOp::Bind(BindMountOp {
                host_path: host_usr.clone(),
                container_path: PathBuf::from("/usr"),
                writable: false,
            }));
        }

        for outcome in &arch_outcomes {
            ops.extend(outcome.extra_ops.iter().cloned());
        }
        if self.config.generate_locales {
            if let Some(provider) = &provider_view {
                self.import_provider_locale_data(provider, &arch_outcomes, &mut ops)?;
            }
        }

        let environment = self.build_environment(&overrides_root, &active, &arch_outcomes);

        let gc_stats = if self.config.gc_runtimes {
            let current = match &container_root {
                ContainerRoot::Mutable(ms) => Some(ms.path().to_path_buf()),
                ContainerRoot::Bound { .. } => None,
            };
            Some(cache.gc(current.as_deref())?)
        } else {
            None
        };

        let shadow_decisions = arch_outcomes.iter().flat_map(|a| a.shadow_decisions.clone()).collect();

        Ok(SessionOutput {
            ops,
            environment,
            active_architectures: active.into_iter().map(|(a, _)| a.tuple).collect(),
            shadow_decisions,
            gc_stats,
        })
    }

    fn resolve_deployment_dir(&self, cache: &CacheStore) -> Result<PathBuf> {
        if self.config.unpack_archive {
            let sidecar_path = self
                .config
                .build_id_sidecar
                .as_ref()
                .context("ConfigError: --build-id-sidecar is required when unpacking an archive")?;
            let contents = fs::read_to_string(sidecar_path)
                .with_context(|| format!("failed to read build-id sidecar {}", sidecar_path.display()))?;
            let build_id = parse_build_id_sidecar(&contents).map_err(anyhow::Error::msg)?;
            let mut source = ArchiveSource::new(self.config.runtime_source.clone(), build_id)?;
            if let Some(debug) = &self.config.debug_archive {
                source = source.with_debug_archive(debug.clone());
            }
            cache.unpack_archive(&source)
        } else {
            Ok(self.config.runtime_source.clone())
        }
    }

    fn process_architecture(
        &self,
        arch: &Architecture,
        provider: &ProviderView,
        overrides_root: &Path,
        sysroot_root: Option<&Path>,
    ) -> Result<ArchOutcome> {
        let lib_tuple_dir = overrides_root.join("lib").join(&arch.tuple);
        fs::create_dir_all(&lib_tuple_dir)
            .with_context(|| format!("failed to create {}", lib_tuple_dir.display()))?;
        let dirfd = nix::fcntl::open(
            &lib_tuple_dir,
            nix::fcntl::OFlag::O_DIRECTORY | nix::fcntl::OFlag::O_CLOEXEC,
            nix::sys::stat::Mode::empty(),
        )
        .with_context(|| format!("failed to open {}", lib_tuple_dir.display()))?;

        let drivers = self.enumerate_drivers(provider, arch)?;
        let mut candidates: Vec<CaptureCandidate> = drivers
            .iter()
            .map(|d| CaptureCandidate {
                debug_name: d.debug_name().to_owned(),
                library: d.info().resolve_library_path().clone(),
                logical_set: logical_set_name(d).to_owned(),
            })
            .collect();

        // §4.9: the provider's libc family rides along in the same capture
        // batch as the graphics drivers, gated on the provider actually
        // shipping this architecture's canonical ld.so.
        let provider_ld_so_host = provider.path().join(arch.ld_so_path.trim_start_matches('/'));
        let provider_has_libc = provider_ld_so_host.symlink_metadata().is_ok();
        if provider_has_libc {
            candidates.push(CaptureCandidate {
                debug_name: "libc.so.6".to_owned(),
                library: LibraryPathSpec::Soname("libc.so.6".to_owned()),
                logical_set: "libc".to_owned(),
            });
            candidates.extend(NSS_IDN_SONAME_PATTERNS.iter().map(|pattern| CaptureCandidate {
                debug_name: format!("libc:{pattern}"),
                library: LibraryPathSpec::Soname((*pattern).to_owned()),
                logical_set: "libc".to_owned(),
            }));
        }

        let ctx = CaptureContext {
            helper: arch.capture_libs_helper.clone(),
            container: PathBuf::from("/"),
            provider_root: provider.path().to_path_buf(),
            remap_link_prefix_args: provider.remap_link_prefix_args(),
            library_knowledge: None,
            overrides_lib_tuple: lib_tuple_dir.clone(),
            overrides_lib_dirfd: dirfd as RawFd,
            deterministic: self.config.deterministic,
            provider_is_current_namespace: matches!(provider.namespace(), ProviderNamespace::Host)
                && self.config.provider.as_deref() == Some(Path::new("/")),
            dynamic_token_probe: &|_| None,
            basename_exists: &|set, name| lib_tuple_dir.join(set).join(name).exists(),
        };
        let capture = run_capture_pipeline(&ctx, candidates)?;

        // Shadow removal mutates the runtime's own library directories, so
        // it only runs against a mutable sysroot; a bound (read-only)
        // runtime source relies on bind-mount ordering in the sandbox
        // executor to let captured libraries take precedence instead.
        let mut shadow_decisions = Vec::new();
        if let Some(sysroot_root) = sysroot_root {
            let shadow_ctx = OverridesContext {
                overrides_root: overrides_root.to_path_buf(),
                tuple: arch.tuple.clone(),
            };
            let candidate_dirs =
                dedup_library_dirs(sysroot_root, candidate_library_dirs(&arch.tuple, arch_bits(&arch.tuple)));
            for dir in candidate_dirs {
                let full = sysroot_root.join(&dir);
                if !shadow_remover::is_scannable_dir(&full) {
                    continue;
                }
                let dir_fd = nix::fcntl::open(
                    &full,
                    nix::fcntl::OFlag::O_DIRECTORY | nix::fcntl::OFlag::O_CLOEXEC,
                    nix::sys::stat::Mode::empty(),
                )
                .with_context(|| format!("failed to open {}", full.display()))?;
                let decisions = remove_shadows(dir_fd, &full, &shadow_ctx)?;
                nix::unistd::close(dir_fd)?;
                shadow_decisions.extend(decisions);
            }
        }

        let read_json = |p: &Path| -> Result<String> {
            fs::read_to_string(p).with_context(|| format!("failed to read {}", p.display()))
        };

        let mut libc_from_provider = false;
        let mut manifests = Vec::new();
        let mut vulkan_explicit_manifests = Vec::new();
        let mut vulkan_implicit_manifests = Vec::new();
        let mut egl_vendor_manifests = Vec::new();
        let mut egl_ext_manifests = Vec::new();
        let mut vulkan_icd_manifests = Vec::new();

        for driver in &drivers {
            let subdir = driver.manifest_subdir();
            if subdir.is_empty() {
                continue;
            }
            let kind = match capture.captured.contains(&driver.debug_name().to_owned()) {
                true => match driver.info().resolve_library_path() {
                    LibraryPathSpec::Absolute(_) => SlotKind::Absolute,
                    LibraryPathSpec::Soname(_) => SlotKind::Soname,
                    LibraryPathSpec::None => SlotKind::MetaLayer,
                },
                false if matches!(driver.info().resolve_library_path(), LibraryPathSpec::None) => SlotKind::MetaLayer,
                false => SlotKind::Absent,
            };
            if kind == SlotKind::Absent {
                continue;
            }
            let in_container_library_path = match kind {
                SlotKind::Absolute => driver
                    .info()
                    .json_path()
                    .map(|_| to_container_overrides_path(overrides_root, &lib_tuple_dir.join(driver.debug_name()))),
                _ => None,
            };
            let dest_dir = overrides_root.join("share").join(subdir);
            let inputs = vec![ManifestInput {
                driver,
                kind,
                in_container_library_path,
            }];
            let emitted = emit_manifests(&dest_dir, &arch.tuple, &inputs, &read_json)?;
            for e in emitted {
                let container_path = to_container_overrides_path(overrides_root, &e.container_path);
                manifests.push(container_path.clone());
                match driver {
                    Driver::EglIcd(_) => egl_vendor_manifests.push(container_path),
                    Driver::EglExtPlatform(_) => egl_ext_manifests.push(container_path),
                    Driver::VulkanIcd(_) => vulkan_icd_manifests.push(container_path),
                    Driver::VulkanLayer(l) => match l.kind {
                        driver_model::VulkanLayerKind::Explicit => vulkan_explicit_manifests.push(container_path),
                        driver_model::VulkanLayerKind::Implicit => vulkan_implicit_manifests.push(container_path),
                    },
                    _ => {}
                }
            }
        }

        let mut extra_ops = Vec::new();
        if provider_has_libc && capture.captured.iter().any(|s| s == "libc.so.6") {
            libc_from_provider = true;

            let canonical_ld_so_container = PathBuf::from(&arch.ld_so_path);
            let provider_remapped_ld_so = provider.remap(Path::new(&arch.ld_so_path));
            match plan_ld_so_redirect(sysroot_root.is_some(), &canonical_ld_so_container, &provider_remapped_ld_so) {
                LdSoAction::SymlinkInMutableSysroot { canonical_path, target } => {
                    if let Some(sysroot_root) = sysroot_root {
                        let dest = sysroot_root.join(canonical_path.strip_prefix("/").unwrap_or(&canonical_path));
                        if let Some(parent) = dest.parent() {
                            fs::create_dir_all(parent)
                                .with_context(|| format!("failed to create {}", parent.display()))?;
                        }
                        let _ = fs::remove_file(&dest);
                        std::os::unix::fs::symlink(&target, &dest).with_context(|| {
                            format!("failed to symlink {} -> {}", dest.display(), target.display())
                        })?;
                    }
                }
                LdSoAction::BindMountInstruction { host_path, container_path } => {
                    extra_ops.push(SandboxOp::Bind(BindMountOp {
                        host_path,
                        container_path,
                        writable: false,
                    }));
                }
            }

            // The gconv modules directory rides along with the provider's
            // `/usr` bind already; this just checks it's actually there so a
            // missing one surfaces as a log line instead of a silent miss.
            let libc_link = lib_tuple_dir.join("libc").join("libc.so.6");
            if let Ok(target) = fs::read_link(&libc_link) {
                if let Some(gconv_dir) = locate_gconv_dir(&target) {
                    let in_container_root = provider.namespace().in_container_root();
                    let provider_relative = gconv_dir.strip_prefix(in_container_root).unwrap_or(&gconv_dir);
                    let host_gconv_dir = provider.path().join(provider_relative);
                    if !host_gconv_dir.is_dir() {
                        tracing::warn!(path = %gconv_dir.display(), "gconv modules directory not found in provider");
                    }
                }
            }
        }

        nix::unistd::close(dirfd)?;

        Ok(ArchOutcome {
            tuple: arch.tuple.clone(),
            capture,
            shadow_decisions,
            manifests,
            vulkan_explicit_manifests,
            vulkan_implicit_manifests,
            egl_vendor_manifests,
            egl_ext_manifests,
            vulkan_icd_manifests,
            libc_from_provider,
            extra_ops,
        })
    }

    /// §4.9 step 4: once libc came from the provider for at least one ABI,
    /// locale data and a handful of glibc executables come from there too,
    /// regardless of how many ABIs ended up using the provider's libc.
    fn import_provider_locale_data(
        &self,
        provider: &ProviderView,
        outcomes: &[ArchOutcome],
        ops: &mut Vec<SandboxOp>,
    ) -> Result<()> {
        let libc_from_provider_count = outcomes.iter().filter(|o| o.libc_from_provider).count();
        if !manifest_emitter::should_import_locale_data(libc_from_provider_count) {
            return Ok(());
        }

        for relative in ["usr/lib/locale", "usr/share/i18n"] {
            let host_path = provider.path().join(relative);
            if host_path.is_dir() {
                ops.push(SandboxOp::Bind(BindMountOp {
                    host_path: host_path.clone(),
                    container_path: provider.remap(&PathBuf::from("/").join(relative)),
                    writable: false,
                }));
            }
        }

        for exe in GLIBC_EXECUTABLES {
            let relative = format!("usr/bin/{}", exe.name);
            let host_path = provider.path().join(&relative);
            if host_path.is_file() {
                ops.push(SandboxOp::Bind(BindMountOp {
                    host_path: host_path.clone(),
                    container_path: provider.remap(&PathBuf::from("/").join(&relative)),
                    writable: false,
                }));
            } else if exe.importance == ExecutableImportance::Essential {
                bail!("ConfigError: essential glibc executable {} missing from provider", exe.name);
            }
        }

        Ok(())
    }

    fn enumerate_drivers(&self, provider: &ProviderView, arch: &Architecture) -> Result<Vec<Driver>> {
        let mut drivers = Vec::new();
        drivers.extend(self.driver_source.enumerate_egl_icds(provider, arch)?.into_iter().map(Driver::EglIcd));
        drivers.extend(
            self.driver_source
                .enumerate_egl_ext_platforms(provider, arch)?
                .into_iter()
                .map(Driver::EglExtPlatform),
        );
        drivers.extend(self.driver_source.enumerate_vulkan_icds(provider, arch)?.into_iter().map(Driver::VulkanIcd));
        drivers.extend(
            self.driver_source
                .enumerate_vulkan_layers(provider, arch)?
                .into_iter()
                .map(Driver::VulkanLayer),
        );
        drivers.extend(self.driver_source.enumerate_dri_drivers(provider, arch)?.into_iter().map(Driver::DriDriver));
        drivers.extend(
            self.driver_source
                .enumerate_va_api_drivers(provider, arch)?
                .into_iter()
                .map(Driver::VaApiDriver),
        );
        drivers.extend(
            self.driver_source
                .enumerate_vdpau_drivers(provider, arch)?
                .into_iter()
                .map(Driver::VdpauDriver),
        );
        Ok(drivers)
    }

    /// One `platform-<token>` symlink per architecture's platform tokens,
    /// pointing at its tuple directory, so
    /// `VDPAU_DRIVER_PATH=.../lib/platform-${PLATFORM}/vdpau` resolves
    /// regardless of which architecture the dynamic linker expands
    /// `${PLATFORM}` to at runtime.
    fn write_vdpau_platform_symlinks(
        &self,
        overrides_root: &Path,
        active: &[(Architecture, String)],
        outcomes: &[ArchOutcome],
    ) -> Result<()> {
        let lib_dir = overrides_root.join("lib");
        for (arch, _) in active {
            let has_vdpau = outcomes
                .iter()
                .find(|o| o.tuple == arch.tuple)
                .map(|o| !o.capture.search_paths.for_set("vdpau").is_empty())
                .unwrap_or(false);
            if !has_vdpau {
                continue;
            }
            for token in &arch.platform_tokens {
                let link = lib_dir.join(format!("platform-{token}"));
                if link.symlink_metadata().is_ok() {
                    continue;
                }
                std::os::unix::fs::symlink(&arch.tuple, &link)
                    .with_context(|| format!("failed to create {}", link.display()))?;
            }
        }
        Ok(())
    }

    fn build_environment(
        &self,
        overrides_root: &Path,
        active: &[(Architecture, String)],
        outcomes: &[ArchOutcome],
    ) -> BTreeMap<OsString, OsString> {
        let container_overrides = Path::new("/").join(OVERRIDES_REL);

        let arch_search_paths: Vec<ArchSearchPaths> = active
            .iter()
            .map(|(arch, _)| {
                let lib_dir = container_overrides.join("lib").join(&arch.tuple);
                ArchSearchPaths {
                    library_dir: lib_dir.to_string_lossy().into_owned(),
                    aliases_dir: lib_dir.join("aliases").to_string_lossy().into_owned(),
                }
            })
            .collect();

        let mut driver_search_paths = DriverSearchPaths::default();
        let mut libc_from_provider_count = 0usize;
        for outcome in outcomes {
            for dir in outcome.capture.search_paths.for_set("dri") {
                driver_search_paths
                    .libgl_drivers
                    .push(to_container_overrides_path(overrides_root, Path::new(dir)).to_string_lossy().into_owned());
            }
            for dir in outcome.capture.search_paths.for_set("va_api") {
                driver_search_paths
                    .libva_drivers
                    .push(to_container_overrides_path(overrides_root, Path::new(dir)).to_string_lossy().into_owned());
            }
            driver_search_paths
                .vulkan_icds
                .extend(outcome.vulkan_icd_manifests.iter().map(|p| p.to_string_lossy().into_owned()));
            driver_search_paths
                .vulkan_explicit_layers
                .extend(outcome.vulkan_explicit_manifests.iter().map(|p| p.to_string_lossy().into_owned()));
            driver_search_paths
                .vulkan_implicit_layers
                .extend(outcome.vulkan_implicit_manifests.iter().map(|p| p.to_string_lossy().into_owned()));
            driver_search_paths
                .egl_vendor_manifests
                .extend(outcome.egl_vendor_manifests.iter().map(|p| p.to_string_lossy().into_owned()));
            driver_search_paths
                .egl_external_platform_manifests
                .extend(outcome.egl_ext_manifests.iter().map(|p| p.to_string_lossy().into_owned()));
            if outcome.libc_from_provider {
                libc_from_provider_count += 1;
            }
        }

        let vdpau_driver_path = if outcomes.iter().any(|o| !o.capture.search_paths.for_set("vdpau").is_empty()) {
            Some(format!("{}/lib/platform-${{PLATFORM}}/vdpau", container_overrides.display()))
        } else {
            None
        };

        if let Some(warning) = manifest_emitter::mixed_libc_warning(libc_from_provider_count, active.len()) {
            tracing::warn!(%warning, "mixed libc provenance across architectures");
        }

        let inputs = EnvironmentInputs {
            arch_search_paths,
            driver_search_paths,
            overrides_share_dir: Some(container_overrides.join("share").to_string_lossy().into_owned()),
            vulkan_layers_imported: self.config.import_vulkan_layers,
            vdpau_driver_path,
            is_legacy_scout_runtime: false,
            existing_xdg_data_dirs: std::env::var("XDG_DATA_DIRS").ok(),
        };
        build_environment(&inputs)
    }
}
