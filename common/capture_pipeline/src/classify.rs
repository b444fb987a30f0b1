// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Step 1–2 of the pipeline: classifying a driver's resolved library
//! against the current ABI, and resolving dynamic-linker tokens.

use std::path::PathBuf;

use driver_model::LibraryPathSpec;

/// One library a logical driver set wants captured, tagged with the set it
/// belongs to (used for collision grouping and search-path accumulation).
#[derive(Debug, Clone)]
pub struct CaptureCandidate {
    pub debug_name: String,
    pub library: LibraryPathSpec,
    pub logical_set: String,
}

#[derive(Debug, Clone)]
pub enum ClassifiedCandidate {
    Absolute { candidate: CaptureCandidate, path: PathBuf },
    Soname { candidate: CaptureCandidate, soname: String },
    MetaLayer { candidate: CaptureCandidate },
    Skipped { candidate: CaptureCandidate, reason: String },
}

impl ClassifiedCandidate {
    pub fn candidate(&self) -> &CaptureCandidate {
        match self {
            ClassifiedCandidate::Absolute { candidate, .. }
            | ClassifiedCandidate::Soname { candidate, .. }
            | ClassifiedCandidate::MetaLayer { candidate }
            | ClassifiedCandidate::Skipped { candidate, .. } => candidate,
        }
    }
}

const DYNAMIC_TOKENS: &[&str] = &["${LIB}", "${PLATFORM}", "${ORIGIN}"];

fn has_dynamic_token(path: &str) -> bool {
    DYNAMIC_TOKENS.iter().any(|token| path.contains(token))
}

/// Classifies one candidate. `provider_is_current_namespace` and `probe`
/// implement step 2: when the provider *is* the process's own namespace, a
/// dynamic-token library can be resolved by having the core dlopen a probe;
/// `probe` performs that dlopen and returns the real path it landed on.
pub fn classify_candidate(
    candidate: CaptureCandidate,
    provider_is_current_namespace: bool,
    probe: &dyn Fn(&str) -> Option<PathBuf>,
) -> ClassifiedCandidate {
    match &candidate.library {
        LibraryPathSpec::None => ClassifiedCandidate::MetaLayer { candidate },
        LibraryPathSpec::Soname(soname) => ClassifiedCandidate::Soname {
            soname: soname.clone(),
            candidate,
        },
        LibraryPathSpec::Absolute(path) => {
            let path_str = path.to_string_lossy().into_owned();
            let path = path.clone();
            if has_dynamic_token(&path_str) {
                if provider_is_current_namespace {
                    match probe(&path_str) {
                        Some(resolved) => ClassifiedCandidate::Absolute {
                            candidate,
                            path: resolved,
                        },
                        None => ClassifiedCandidate::Skipped {
                            candidate,
                            reason: format!("dynamic-token probe failed for {path_str}"),
                        },
                    }
                } else {
                    ClassifiedCandidate::Skipped {
                        candidate,
                        reason: format!(
                            "{path_str} contains a dynamic-linker token and the provider is not the current namespace"
                        ),
                    }
                }
            } else {
                ClassifiedCandidate::Absolute {
                    candidate,
                    path: path.clone(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(library: LibraryPathSpec) -> CaptureCandidate {
        CaptureCandidate {
            debug_name: "test".into(),
            library,
            logical_set: "dri".into(),
        }
    }

    #[test]
    fn plain_absolute_path_classifies_as_absolute() {
        let c = classify_candidate(
            candidate(LibraryPathSpec::Absolute("/usr/lib/libfoo.so".into())),
            true,
            &|_| None,
        );
        assert!(matches!(c, ClassifiedCandidate::Absolute { .. }));
    }

    #[test]
    fn soname_classifies_as_soname() {
        let c = classify_candidate(candidate(LibraryPathSpec::Soname("libfoo.so.1".into())), true, &|_| None);
        assert!(matches!(c, ClassifiedCandidate::Soname { .. }));
    }

    #[test]
    fn dynamic_token_resolved_in_current_namespace() {
        let c = classify_candidate(
            candidate(LibraryPathSpec::Absolute("${LIB}/libfoo.so".into())),
            true,
            &|_| Some(PathBuf::from("/usr/lib/x86_64-linux-gnu/libfoo.so")),
        );
        match c {
            ClassifiedCandidate::Absolute { path, .. } => {
                assert_eq!(path, PathBuf::from("/usr/lib/x86_64-linux-gnu/libfoo.so"))
            }
            other => panic!("expected Absolute, got {other:?}"),
        }
    }

    #[test]
    fn dynamic_token_skipped_outside_current_namespace() {
        let c = classify_candidate(
            candidate(LibraryPathSpec::Absolute("${ORIGIN}/libfoo.so".into())),
            false,
            &|_| panic!("probe should not run"),
        );
        assert!(matches!(c, ClassifiedCandidate::Skipped { .. }));
    }
}
