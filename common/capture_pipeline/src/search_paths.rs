// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Step 7: search-path accumulation per logical driver set.

use std::collections::BTreeMap;

/// Accumulates the in-container directories each logical set's drivers
/// ended up in: the set's own directory (added once, unconditionally) plus
/// one entry per numbered subdirectory actually used.
#[derive(Debug, Default, Clone)]
pub struct SearchPaths {
    paths: BTreeMap<String, Vec<String>>,
}

impl SearchPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_base(&mut self, logical_set: &str, base_path: &str) {
        let entry = self.paths.entry(logical_set.to_owned()).or_default();
        if !entry.iter().any(|p| p == base_path) {
            entry.insert(0, base_path.to_owned());
        }
    }

    pub fn add_numbered(&mut self, logical_set: &str, numbered_path: &str) {
        let entry = self.paths.entry(logical_set.to_owned()).or_default();
        if !entry.iter().any(|p| p == numbered_path) {
            entry.push(numbered_path.to_owned());
        }
    }

    pub fn for_set(&self, logical_set: &str) -> &[String] {
        self.paths.get(logical_set).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_path_is_added_once_and_first() {
        let mut paths = SearchPaths::new();
        paths.add_numbered("dri", "overrides/lib/x86_64-linux-gnu/dri/0");
        paths.add_base("dri", "overrides/lib/x86_64-linux-gnu/dri");
        paths.add_base("dri", "overrides/lib/x86_64-linux-gnu/dri");
        assert_eq!(
            paths.for_set("dri"),
            &[
                "overrides/lib/x86_64-linux-gnu/dri".to_string(),
                "overrides/lib/x86_64-linux-gnu/dri/0".to_string(),
            ]
        );
    }

    #[test]
    fn unknown_set_is_empty() {
        let paths = SearchPaths::new();
        assert!(paths.for_set("vdpau").is_empty());
    }
}
