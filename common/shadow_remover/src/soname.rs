// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Reads `DT_SONAME` out of a real (non-symlink) ELF shared object.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use elf::abi::DT_SONAME;
use elf::endian::AnyEndian;
use elf::ElfBytes;

/// Returns `Ok(None)` both when `path` isn't an ELF file at all and when it
/// is one with no `DT_SONAME` entry — neither case is an error here, a
/// shadow decision just treats them the same way (no soname clash to check).
pub fn read_soname(path: &Path) -> Result<Option<String>> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let file = match ElfBytes::<AnyEndian>::minimal_parse(&data) {
        Ok(f) => f,
        Err(_) => return Ok(None),
    };

    let dynamic = match file.dynamic().context("failed to parse dynamic section")? {
        Some(d) => d,
        None => return Ok(None),
    };

    let Some(soname_entry) = dynamic.iter().find(|d| d.d_tag == DT_SONAME) else {
        return Ok(None);
    };

    let Some(dynstr_shdr) = file
        .section_header_by_name(".dynstr")
        .context("failed to look up .dynstr")?
    else {
        return Ok(None);
    };
    let strtab = file
        .section_data_as_strtab(&dynstr_shdr)
        .context("failed to parse .dynstr")?;
    let name = strtab
        .get(soname_entry.d_val() as usize)
        .context("DT_SONAME offset out of range in .dynstr")?;
    Ok(Some(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_elf_file_has_no_soname() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("not_elf.so");
        fs::write(&path, b"this is not an ELF file")?;
        assert_eq!(read_soname(&path)?, None);
        Ok(())
    }
}
