// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The serialized sandbox argument list, handed to the privileged sandbox
//! executor process when no mutable sysroot exists and the overrides tree
//! must instead be described as a sequence of operations.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindMountOp {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub writable: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DirOp {
    pub container_path: PathBuf,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SymlinkOp {
    pub container_path: PathBuf,
    pub target: PathBuf,
}

/// One operation the sandbox executor applies while constructing the
/// container's filesystem view.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind")]
pub enum SandboxOp {
    Bind(BindMountOp),
    Dir(DirOp),
    Symlink(SymlinkOp),
}

/// The full list of operations plus the process launch parameters, modeled
/// on the container-launch config this project's sandbox executor expects.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SandboxArgumentList {
    pub ops: Vec<SandboxOp>,
    pub args: Vec<OsString>,
    #[serde(with = "serde_os_string_map")]
    pub envs: BTreeMap<OsString, OsString>,
    pub chdir: PathBuf,
}

impl SandboxArgumentList {
    pub fn deserialize_from(path: &Path) -> Result<Self> {
        Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
    }

    pub fn serialize_to(&self, path: &Path) -> Result<()> {
        serde_json::to_writer(File::create(path)?, self)?;
        Ok(())
    }
}

/// Implements serialization/deserialization of `BTreeMap<OsString, T>`.
///
/// serde doesn't support maps with non-`String` keys by default; this
/// converts `OsString` keys to `String` lossily, since environment
/// variables and mount paths are not guaranteed UTF-8 on Linux but are
/// overwhelmingly ASCII in practice.
mod serde_os_string_map {
    use std::{collections::BTreeMap, ffi::OsString};

    use serde::{ser::SerializeMap, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S, T>(map: &BTreeMap<OsString, T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        let mut serializer_map = serializer.serialize_map(Some(map.len()))?;
        for (key, value) in map.iter() {
            let key_str = key.to_string_lossy();
            serializer_map.serialize_entry(&key_str, value)?;
        }
        serializer_map.end()
    }

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<BTreeMap<OsString, T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        let map = BTreeMap::<String, T>::deserialize(deserializer)?;
        Ok(map.into_iter().map(|(key, value)| (OsString::from(key), value)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("sandbox.json");

        let mut envs = BTreeMap::new();
        envs.insert(OsString::from("PATH"), OsString::from("/usr/bin"));

        let list = SandboxArgumentList {
            ops: vec![
                SandboxOp::Bind(BindMountOp {
                    host_path: "/usr".into(),
                    container_path: "/run/host/usr".into(),
                    writable: false,
                }),
                SandboxOp::Symlink(SymlinkOp {
                    container_path: "/etc/ld.so.cache".into(),
                    target: "/run/pressure-vessel/ldso/ld.so.cache".into(),
                }),
            ],
            args: vec![OsString::from("/usr/bin/game")],
            envs,
            chdir: "/".into(),
        };

        list.serialize_to(&path)?;
        let loaded = SandboxArgumentList::deserialize_from(&path)?;
        assert_eq!(loaded.ops, list.ops);
        assert_eq!(loaded.args, list.args);
        Ok(())
    }
}
