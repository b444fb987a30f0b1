// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Filesystem helpers shared by the runtime-assembly pipeline: safe temporary
//! directories, chmod-robust recursive removal, and the copy-on-write "cheap
//! tree copy" used to materialize mutable sysroots and cache entries without
//! paying for a full data copy when the cache and source share a filesystem.

mod copy_tree;
mod remove;
mod tempdir;
mod xattr;

pub use copy_tree::*;
pub use remove::*;
pub use tempdir::*;
pub use xattr::*;
