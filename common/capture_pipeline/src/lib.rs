// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Runs a logical driver set's libraries through the capture helper: classify
//! each candidate, resolve collisions and aliases, invoke the helper in as
//! few bulk calls as possible, then verify what actually landed.

mod classify;
mod coalesce;
mod invoke;
mod numbering;
mod search_paths;

pub use classify::*;
pub use coalesce::*;
pub use invoke::*;
pub use numbering::*;
pub use search_paths::*;

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

/// Static knobs a capture pass needs beyond the candidate list itself.
pub struct CaptureContext<'a> {
    pub helper: PathBuf,
    pub container: PathBuf,
    pub provider_root: PathBuf,
    pub remap_link_prefix_args: Vec<String>,
    pub library_knowledge: Option<PathBuf>,
    pub overrides_lib_tuple: PathBuf,
    pub overrides_lib_dirfd: RawFd,
    pub deterministic: bool,
    pub provider_is_current_namespace: bool,
    pub dynamic_token_probe: &'a dyn Fn(&str) -> Option<PathBuf>,
    pub basename_exists: &'a dyn Fn(&str, &str) -> bool,
}

/// The outcome of running every candidate for one architecture through the
/// pipeline.
#[derive(Debug, Default)]
pub struct CaptureOutcome {
    pub search_paths: SearchPaths,
    pub skipped: Vec<(String, String)>,
    pub captured: Vec<String>,
    pub reverted_to_absent: Vec<String>,
}

/// Runs the full pipeline (steps 1–7) over one batch of candidates, which
/// should all belong to the logical sets being captured together in this
/// session phase (e.g. all of EGL+Vulkan+DRI for one architecture).
pub fn run_capture_pipeline(ctx: &CaptureContext, candidates: Vec<CaptureCandidate>) -> Result<CaptureOutcome> {
    let mut outcome = CaptureOutcome::default();

    let classified: Vec<ClassifiedCandidate> = candidates
        .into_iter()
        .map(|c| classify_candidate(c, ctx.provider_is_current_namespace, ctx.dynamic_token_probe))
        .collect();

    let mut soname_batch: HashMap<String, Vec<String>> = HashMap::new();
    let mut absolute: Vec<ClassifiedCandidate> = Vec::new();

    for c in classified {
        match c {
            ClassifiedCandidate::Soname { candidate, soname } => {
                soname_batch.entry(candidate.logical_set.clone()).or_default().push(soname);
            }
            ClassifiedCandidate::MetaLayer { candidate } => {
                info!(driver = %candidate.debug_name, "meta-layer has no library to capture");
            }
            ClassifiedCandidate::Skipped { candidate, reason } => {
                warn!(driver = %candidate.debug_name, %reason, "skipping capture candidate");
                outcome.skipped.push((candidate.debug_name, reason));
            }
            a @ ClassifiedCandidate::Absolute { .. } => absolute.push(a),
        }
    }

    // One bulk SONAME invocation per logical set.
    for (logical_set, patterns) in soname_batch {
        let dest = ctx.overrides_lib_tuple.join(&logical_set);
        let invocation = CaptureInvocation {
            container: ctx.container.clone(),
            provider: ctx.provider_root.clone(),
            remap_link_prefix_args: ctx.remap_link_prefix_args.clone(),
            library_knowledge: ctx.library_knowledge.clone(),
            dest: dest.clone(),
            patterns,
        };
        run_capture(&ctx.helper, &invocation)?;
        outcome
            .search_paths
            .add_base(&logical_set, &dest.to_string_lossy());
    }

    let planned = plan_absolute_captures(absolute, ctx.deterministic, ctx.basename_exists);

    // Group planned captures by (logical_set, slot) so each numbered
    // subdirectory (or the unnumbered common case) is one helper call.
    let mut by_dest: HashMap<(String, Option<String>), Vec<(CaptureCandidate, PathBuf)>> = HashMap::new();
    for (candidate, path, slot) in planned {
        by_dest
            .entry((candidate.logical_set.clone(), slot))
            .or_default()
            .push((candidate, path));
    }

    for ((logical_set, slot), members) in by_dest {
        let set_dir = ctx.overrides_lib_tuple.join(&logical_set);
        let dest = numbered_dest(&set_dir, slot.as_deref());
        outcome.search_paths.add_base(&logical_set, &set_dir.to_string_lossy());

        let sources: Vec<PathBuf> = members.iter().map(|(_, p)| p.clone()).collect();
        let groups = coalesce_by_inode(&ctx.provider_root, &sources)?;

        let mut patterns = Vec::new();
        for group in &groups {
            patterns.push(sources[group.primary].to_string_lossy().into_owned());
        }

        let invocation = CaptureInvocation {
            container: ctx.container.clone(),
            provider: ctx.provider_root.clone(),
            remap_link_prefix_args: ctx.remap_link_prefix_args.clone(),
            library_knowledge: ctx.library_knowledge.clone(),
            dest: dest.clone(),
            patterns,
        };
        run_capture(&ctx.helper, &invocation)?;

        if slot.is_some() {
            outcome
                .search_paths
                .add_numbered(&logical_set, &dest.to_string_lossy());
        }

        for group in &groups {
            let primary_basename = sources[group.primary]
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let produced = capture_produced_entry(ctx.overrides_lib_dirfd, &primary_basename)?;
            let (candidate, _) = &members[group.primary];
            if !produced {
                outcome.reverted_to_absent.push(candidate.debug_name.clone());
                if slot.is_some() {
                    let _ = std::fs::remove_dir(&dest);
                }
                continue;
            }
            outcome.captured.push(candidate.debug_name.clone());
            for &alias_idx in &group.aliases {
                let (alias_candidate, alias_path) = &members[alias_idx];
                let alias_basename = alias_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let link_path = dest.join(&alias_basename);
                if std::os::unix::fs::symlink(&primary_basename, &link_path).is_ok() {
                    outcome.captured.push(alias_candidate.debug_name.clone());
                }
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use driver_model::LibraryPathSpec;
    use std::fs;

    #[test]
    fn meta_layers_and_skips_never_reach_invocation() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let overrides = dir.path().join("overrides");
        fs::create_dir_all(&overrides)?;
        let dirfd = nix::fcntl::open(&overrides, nix::fcntl::OFlag::O_DIRECTORY, nix::sys::stat::Mode::empty())?;

        let ctx = CaptureContext {
            helper: PathBuf::from("/bin/false"),
            container: dir.path().join("ctr"),
            provider_root: dir.path().join("prov"),
            remap_link_prefix_args: vec![],
            library_knowledge: None,
            overrides_lib_tuple: overrides.clone(),
            overrides_lib_dirfd: dirfd,
            deterministic: true,
            provider_is_current_namespace: false,
            dynamic_token_probe: &|_| None,
            basename_exists: &|_, _| false,
        };

        let candidates = vec![
            CaptureCandidate {
                debug_name: "meta".into(),
                library: LibraryPathSpec::None,
                logical_set: "vulkan_layer".into(),
            },
            CaptureCandidate {
                debug_name: "dynamic".into(),
                library: LibraryPathSpec::Absolute("${ORIGIN}/libfoo.so".into()),
                logical_set: "dri".into(),
            },
        ];

        let outcome = run_capture_pipeline(&ctx, candidates)?;
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.captured.is_empty());
        nix::unistd::close(dirfd)?;
        Ok(())
    }
}
