// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Classifies a deployment directory into one of four runtime shapes, and
//! parses the mtree manifest format used by manifest-driven runtimes.

mod classify;
mod mtree;

pub use classify::*;
pub use mtree::*;
