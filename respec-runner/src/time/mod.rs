// Copyright (c) The respec Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Time tracking for runs and attempts.

mod stopwatch;

pub(crate) use stopwatch::*;
