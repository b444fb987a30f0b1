// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The `clap`-derived command line and the `RuntimeConfig` it builds,
//! mirroring `cliutil::ConfigBuilder`'s "plain data, sensible defaults"
//! shape.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "runtime-prep-setup")]
pub struct Cli {
    /// Deployment directory, or a `*.tar.gz` archive when `--unpack-archive`
    /// is set.
    #[arg(long)]
    pub runtime_source: PathBuf,

    /// Build-id sidecar file, required when the runtime source is an
    /// archive.
    #[arg(long)]
    pub build_id_sidecar: Option<PathBuf>,

    /// Optional `*-debug.tar.gz` sidecar, extracted best-effort.
    #[arg(long)]
    pub debug_archive: Option<PathBuf>,

    /// Cache root ("variable directory"); created 0700 if absent.
    #[arg(long)]
    pub var_dir: PathBuf,

    /// Bubblewrap-like sandbox executor; required when no mutable sysroot
    /// is built.
    #[arg(long)]
    pub executor: Option<PathBuf>,

    /// Graphics provider root, opened as a dirfd. Absent disables graphics
    /// stack capture.
    #[arg(long)]
    pub provider: Option<PathBuf>,

    /// Directory containing the per-architecture `capture-libs` helpers.
    #[arg(long)]
    pub tools_dir: PathBuf,

    /// Path the launcher itself is installed at, bound into the container
    /// as the final sandbox-assembly step.
    #[arg(long)]
    pub launcher_install_prefix: PathBuf,

    #[arg(long)]
    pub copy_runtime: bool,

    #[arg(long)]
    pub unpack_archive: bool,

    #[arg(long)]
    pub gc_runtimes: bool,

    #[arg(long)]
    pub generate_locales: bool,

    #[arg(long)]
    pub import_vulkan_layers: bool,

    #[arg(long)]
    pub flatpak_subsandbox: bool,

    /// FEX-style interpreter root for foreign-architecture execution.
    /// Accepted for compatibility with callers but never consulted: driver
    /// capture only reasons about the architectures the provider itself
    /// activates.
    #[arg(long)]
    pub interpreter_root: Option<PathBuf>,

    #[arg(long)]
    pub verbose: bool,

    #[arg(long)]
    pub single_thread: bool,

    #[arg(long)]
    pub deterministic: bool,

    #[arg(long)]
    pub provider_graphics_stack: bool,
}

/// Plain data the session runs against, built either from `Cli` or
/// programmatically by library callers.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub runtime_source: PathBuf,
    pub build_id_sidecar: Option<PathBuf>,
    pub debug_archive: Option<PathBuf>,
    pub var_dir: PathBuf,
    pub executor: Option<PathBuf>,
    pub provider: Option<PathBuf>,
    pub tools_dir: PathBuf,
    pub launcher_install_prefix: PathBuf,
    pub copy_runtime: bool,
    pub unpack_archive: bool,
    pub gc_runtimes: bool,
    pub generate_locales: bool,
    pub import_vulkan_layers: bool,
    pub flatpak_subsandbox: bool,
    pub interpreter_root: Option<PathBuf>,
    pub verbose: bool,
    pub single_thread: bool,
    pub deterministic: bool,
    pub provider_graphics_stack: bool,
}

impl From<Cli> for RuntimeConfig {
    fn from(cli: Cli) -> Self {
        RuntimeConfig {
            runtime_source: cli.runtime_source,
            build_id_sidecar: cli.build_id_sidecar,
            debug_archive: cli.debug_archive,
            var_dir: cli.var_dir,
            executor: cli.executor,
            provider: cli.provider,
            tools_dir: cli.tools_dir,
            launcher_install_prefix: cli.launcher_install_prefix,
            copy_runtime: cli.copy_runtime,
            unpack_archive: cli.unpack_archive,
            gc_runtimes: cli.gc_runtimes,
            generate_locales: cli.generate_locales,
            import_vulkan_layers: cli.import_vulkan_layers,
            flatpak_subsandbox: cli.flatpak_subsandbox,
            interpreter_root: cli.interpreter_root,
            verbose: cli.verbose,
            single_thread: cli.single_thread,
            deterministic: cli.deterministic,
            provider_graphics_stack: cli.provider_graphics_stack,
        }
    }
}
