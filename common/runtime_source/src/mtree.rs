// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryType {
    File,
    Dir,
    Link,
}

/// One entry from an mtree manifest: a relative path plus its type, mode,
/// and (for files) optional size/digest, or (for symlinks) the link target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtreeEntry {
    pub relative_path: PathBuf,
    pub entry_type: EntryType,
    pub mode: u32,
    pub size: Option<u64>,
    pub sha256: Option<String>,
    pub link_target: Option<PathBuf>,
}

fn parse_kv(token: &str) -> Option<(&str, &str)> {
    token.split_once('=')
}

fn parse_mode(s: &str) -> Result<u32> {
    u32::from_str_radix(s, 8).with_context(|| format!("invalid mode {s:?}"))
}

/// Parses mtree text, applying `/set` default-attribute lines to subsequent
/// entries the way BSD mtree does, and skipping comments (`#`) and the
/// `/unset` directive.
pub fn parse_mtree(contents: &str) -> Result<Vec<MtreeEntry>> {
    let mut defaults: HashMap<String, String> = HashMap::new();
    let mut entries = Vec::new();

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let first = tokens.next().unwrap();

        if first == "/set" {
            for tok in tokens {
                if let Some((k, v)) = parse_kv(tok) {
                    defaults.insert(k.to_owned(), v.to_owned());
                }
            }
            continue;
        }
        if first == "/unset" {
            for tok in tokens {
                defaults.remove(tok);
            }
            continue;
        }

        let mut attrs = defaults.clone();
        for tok in tokens {
            if let Some((k, v)) = parse_kv(tok) {
                attrs.insert(k.to_owned(), v.to_owned());
            }
        }

        let entry_type = match attrs.get("type").map(String::as_str) {
            Some("file") => EntryType::File,
            Some("dir") => EntryType::Dir,
            Some("link") => EntryType::Link,
            Some(other) => {
                tracing::debug!(ty = other, "skipping unsupported mtree entry type");
                continue;
            }
            None => continue,
        };

        let mode = match attrs.get("mode") {
            Some(m) => parse_mode(m)?,
            None => 0o644,
        };
        let size = attrs.get("size").and_then(|s| s.parse::<u64>().ok());
        let sha256 = attrs
            .get("sha256digest")
            .or_else(|| attrs.get("sha256"))
            .cloned();
        let link_target = attrs.get("link").map(PathBuf::from);

        let relative_path = Path::new(first.strip_prefix("./").unwrap_or(first)).to_path_buf();
        if relative_path.as_os_str().is_empty() || relative_path == Path::new(".") {
            continue;
        }

        entries.push(MtreeEntry {
            relative_path,
            entry_type,
            mode,
            size,
            sha256,
            link_target,
        });
    }

    Ok(entries)
}

/// Reads an mtree manifest file, transparently decompressing it if
/// `gzipped` is set (for `usr-mtree.txt.gz`).
pub fn read_mtree_file(path: &Path, gzipped: bool) -> Result<Vec<MtreeEntry>> {
    let raw = std::fs::read(path)
        .with_context(|| format!("failed to read mtree manifest {}", path.display()))?;
    let text = if gzipped {
        let mut decoder = flate2::read::GzDecoder::new(raw.as_slice());
        let mut text = String::new();
        decoder
            .read_to_string(&mut text)
            .context("failed to decompress gzipped mtree manifest")?;
        text
    } else {
        String::from_utf8(raw).context("mtree manifest is not valid UTF-8")?
    };
    parse_mtree(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_dir_and_link_entries() {
        let text = "\
#mtree
/set type=file mode=0644
./usr dir mode=0755 type=dir
./usr/bin/foo type=file mode=0755 size=1234 sha256digest=deadbeef
./usr/lib/libfoo.so type=link link=libfoo.so.1
";
        let entries = parse_mtree(text).unwrap();
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].relative_path, Path::new("usr"));
        assert_eq!(entries[0].entry_type, EntryType::Dir);
        assert_eq!(entries[0].mode, 0o755);

        assert_eq!(entries[1].relative_path, Path::new("usr/bin/foo"));
        assert_eq!(entries[1].entry_type, EntryType::File);
        assert_eq!(entries[1].size, Some(1234));
        assert_eq!(entries[1].sha256.as_deref(), Some("deadbeef"));

        assert_eq!(entries[2].entry_type, EntryType::Link);
        assert_eq!(entries[2].link_target, Some(PathBuf::from("libfoo.so.1")));
    }

    #[test]
    fn inherits_defaults_from_set_directive() {
        let text = "\
/set type=file mode=0600
./a
./b mode=0755
";
        let entries = parse_mtree(text).unwrap();
        assert_eq!(entries[0].mode, 0o600);
        assert_eq!(entries[1].mode, 0o755);
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let text = "# comment\n\n/set type=dir\n./usr\n";
        let entries = parse_mtree(text).unwrap();
        assert_eq!(entries.len(), 1);
    }
}
