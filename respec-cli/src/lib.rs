// Copyright (c) The respec Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The respec command-line interface.
//!
//! For the core runner logic, see the `respec-runner` crate.

mod dispatch;
mod errors;
mod output;

pub use dispatch::RespecApp;
pub use errors::{ExpectedError, RespecExitCode};
pub use output::{OutputContext, OutputWriter, StderrStyles};
