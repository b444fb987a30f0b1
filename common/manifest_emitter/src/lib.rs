// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod libc_redirect;
mod manifest;

pub use libc_redirect::*;
pub use manifest::*;
