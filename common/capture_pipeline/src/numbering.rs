// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Step 3: collision policy for absolute captures that share a basename.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::classify::{CaptureCandidate, ClassifiedCandidate};

/// The minimum number of decimal digits needed to print every index in
/// `0..len`, so numbered subdirectory names sort the same as their index.
fn digit_width(len: usize) -> usize {
    if len <= 1 {
        1
    } else {
        (len - 1).to_string().len()
    }
}

/// Groups absolute candidates by `(logical_set, basename)`, assigning each
/// group a numbered subdirectory only when it collides — more than one
/// candidate shares the basename, or `basename_exists` reports a pre-existing
/// symlink of that name in the set's directory.
///
/// `deterministic` sorts each collision group by debug name before
/// numbering, so the assignment is stable across runs; otherwise candidates
/// keep the order they were passed in.
pub fn plan_absolute_captures(
    classified: Vec<ClassifiedCandidate>,
    deterministic: bool,
    basename_exists: &dyn Fn(&str, &str) -> bool,
) -> Vec<(CaptureCandidate, PathBuf, Option<String>)> {
    let mut groups: HashMap<(String, String), Vec<(CaptureCandidate, PathBuf)>> = HashMap::new();
    for c in classified {
        if let ClassifiedCandidate::Absolute { candidate, path } = c {
            let basename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            groups
                .entry((candidate.logical_set.clone(), basename))
                .or_default()
                .push((candidate, path));
        }
    }

    let mut result = Vec::new();
    for ((logical_set, basename), mut members) in groups {
        let collides = members.len() > 1 || basename_exists(&logical_set, &basename);
        if !collides {
            let (candidate, path) = members.pop().expect("group is never empty");
            result.push((candidate, path, None));
            continue;
        }
        if deterministic {
            members.sort_by(|a, b| a.0.debug_name.cmp(&b.0.debug_name));
        }
        let width = digit_width(members.len());
        for (idx, (candidate, path)) in members.into_iter().enumerate() {
            result.push((candidate, path, Some(format!("{idx:0width$}"))));
        }
    }
    result
}

pub fn numbered_dest(base: &Path, subdir: Option<&str>) -> PathBuf {
    match subdir {
        Some(n) => base.join(n),
        None => base.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driver_model::LibraryPathSpec;

    fn candidate(name: &str, set: &str) -> CaptureCandidate {
        CaptureCandidate {
            debug_name: name.into(),
            library: LibraryPathSpec::Absolute(format!("/prov/{name}.so").into()),
            logical_set: set.into(),
        }
    }

    fn classified(name: &str, set: &str, basename: &str) -> ClassifiedCandidate {
        ClassifiedCandidate::Absolute {
            candidate: candidate(name, set),
            path: PathBuf::from(format!("/prov/{basename}")),
        }
    }

    #[test]
    fn non_colliding_candidate_has_no_slot() {
        let planned = plan_absolute_captures(vec![classified("a", "dri", "libfoo.so")], false, &|_, _| false);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].2, None);
    }

    #[test]
    fn colliding_basenames_get_numbered_slots() {
        let planned = plan_absolute_captures(
            vec![
                classified("a", "dri", "libfoo.so"),
                classified("b", "dri", "libfoo.so"),
            ],
            true,
            &|_, _| false,
        );
        assert_eq!(planned.len(), 2);
        let mut slots: Vec<_> = planned.iter().map(|(_, _, s)| s.clone().unwrap()).collect();
        slots.sort();
        assert_eq!(slots, vec!["0".to_string(), "1".to_string()]);
    }

    #[test]
    fn pre_existing_symlink_forces_numbering_even_for_one_candidate() {
        let planned =
            plan_absolute_captures(vec![classified("a", "dri", "libfoo.so")], false, &|_, _| true);
        assert_eq!(planned[0].2, Some("0".to_string()));
    }

    #[test]
    fn digit_width_matches_group_size() {
        assert_eq!(digit_width(1), 1);
        assert_eq!(digit_width(9), 1);
        assert_eq!(digit_width(10), 1);
        assert_eq!(digit_width(11), 2);
        assert_eq!(digit_width(100), 2);
        assert_eq!(digit_width(101), 3);
    }
}
