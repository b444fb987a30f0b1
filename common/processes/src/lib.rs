// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Subprocess execution helpers: a signal-aware `run`/`run_and_check` pair for
//! the bounded helper subprocesses this crate spawns (`capture-libs`, `tar`),
//! and a subreaper-based process tree teardown for the case where this
//! process is the top-level parent of the sandboxed game process and must
//! reap its descendants.

mod reap;
mod run;

pub use reap::*;
pub use run::*;
