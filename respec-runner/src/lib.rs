// Copyright (c) The respec Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core functionality for [respec](https://crates.io/crates/respec), a
//! concurrent spec-suite orchestrator with retry-aware scheduling.
//!
//! Spec files run as independent framework subprocesses under a bounded pool
//! of worker slots. Each run of a file produces a structured JSON report;
//! failing files are retried with the run narrowed to the failed cases, up to
//! a retry ceiling. Results are accumulated into a single [`results::SuiteResults`]
//! and rendered live by [`reporter::SpecReporter`].

pub mod errors;
pub mod exec;
mod helpers;
pub mod list;
pub mod report;
pub mod reporter;
pub mod results;
pub mod runner;
pub mod state;
mod time;
