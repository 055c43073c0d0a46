// Copyright (c) The respec Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by respec-runner.

use camino::Utf8PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// An error that occurred while parsing a framework report payload.
///
/// The report is expected to be the last non-empty line the framework writes
/// to stdout. Anything else is a contract violation by the framework, not a
/// test failure.
#[derive(Clone, Debug, Error)]
pub enum ReportParseError {
    /// The framework process produced no non-empty output lines.
    #[error("spec framework produced no output to parse")]
    EmptyOutput,

    /// The final output line failed to deserialize as a report.
    #[error("failed to parse report payload: {line}")]
    Json {
        /// The line that failed to parse.
        line: String,

        /// The underlying deserialization error.
        #[source]
        source: Arc<serde_json::Error>,
    },
}

/// An error that occurred while running a single attempt of a spec file.
///
/// These are hard errors: they mean the framework contract was broken
/// (the process could not be run, or its output could not be understood),
/// and are kept distinct from ordinary test-case failures. A file that hits
/// one of these is never retried.
#[derive(Clone, Debug, Error)]
pub enum AttemptError {
    /// The framework process failed to start.
    #[error("error spawning spec framework process")]
    Spawn(#[source] Arc<std::io::Error>),

    /// Reading the framework's output failed.
    #[error("error reading spec framework output")]
    Read(#[source] Arc<std::io::Error>),

    /// Waiting for the framework process to exit failed.
    #[error("error waiting for spec framework process to exit")]
    Wait(#[source] Arc<std::io::Error>),

    /// The framework's output was not a valid report.
    #[error("invalid report from spec framework")]
    Parse(#[from] ReportParseError),
}

/// An error that occurred while building a [`SpecRunner`](crate::runner::SpecRunner).
#[derive(Debug, Error)]
pub enum SpecRunnerBuildError {
    /// An error occurred while creating the Tokio runtime.
    #[error("error creating Tokio runtime")]
    TokioRuntimeCreate(#[source] std::io::Error),

    /// The list of spec files to run was empty.
    #[error("no spec files to run")]
    NoSpecFiles,
}

/// An error that occurred while writing a report event.
#[derive(Debug, Error)]
pub enum WriteEventError {
    /// An error occurred while writing the event to output.
    #[error("error writing event to output")]
    Io(#[from] std::io::Error),
}

/// A spec file along with the hard error that halted it.
///
/// Produced by [`SuiteResults`](crate::results::SuiteResults) for files that
/// reached the errored terminal state.
#[derive(Clone, Debug)]
pub struct FileError {
    /// The spec file that errored.
    pub spec_file: Utf8PathBuf,

    /// The error that halted it.
    pub error: AttemptError,
}
