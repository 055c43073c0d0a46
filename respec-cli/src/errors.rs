// Copyright (c) The respec Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::output::StderrStyles;
use owo_colors::OwoColorize;
use respec_runner::errors::{FileError, SpecRunnerBuildError, WriteEventError};
use std::error::Error;
use thiserror::Error;
use tracing::error;

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

/// Exit codes returned by respec on expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum RespecExitCode {}

impl RespecExitCode {
    /// No errors occurred and respec exited normally.
    pub const OK: i32 = 0;

    /// One or more spec files failed after exhausting their retries.
    pub const TEST_RUN_FAILED: i32 = 100;

    /// A user or environment issue happened while setting up the invocation,
    /// or the spec framework broke its contract (failed to spawn, or produced
    /// an unparseable report).
    pub const SETUP_ERROR: i32 = 96;

    /// Writing run output produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}

// Note that the #[error()] strings are mostly placeholder messages -- the
// expected way to print out errors is with the display_to_stderr method,
// which colorizes them.

/// An error expected in the normal course of running spec suites.
#[derive(Debug, Error)]
pub enum ExpectedError {
    #[error("error building spec runner")]
    RunnerBuildError {
        #[from]
        err: SpecRunnerBuildError,
    },
    #[error("error writing run output")]
    WriteEventError {
        #[from]
        err: WriteEventError,
    },
    #[error("spec run failed")]
    TestRunFailed,
    #[error("spec framework contract violated")]
    FrameworkError { errors: Vec<FileError> },
}

impl ExpectedError {
    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::RunnerBuildError { .. } | Self::FrameworkError { .. } => {
                RespecExitCode::SETUP_ERROR
            }
            Self::WriteEventError { .. } => RespecExitCode::WRITE_OUTPUT_ERROR,
            Self::TestRunFailed => RespecExitCode::TEST_RUN_FAILED,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error: Option<&dyn Error> = match self {
            Self::RunnerBuildError { err } => {
                error!("failed to build spec runner");
                Some(err)
            }
            Self::WriteEventError { err } => {
                error!("failed to write run output");
                Some(err)
            }
            Self::TestRunFailed => {
                error!("spec run failed");
                None
            }
            Self::FrameworkError { errors } => {
                let files = if errors.len() == 1 { "file" } else { "files" };
                error!(
                    "the spec framework broke its contract for {} {files}",
                    errors.len().style(styles.bold),
                );
                for file_error in errors {
                    error!(
                        target: "respec_cli::no_heading",
                        "  {}: {}",
                        file_error.spec_file.style(styles.failure),
                        file_error.error,
                    );
                    let mut source = file_error.error.source();
                    while let Some(cause) = source {
                        error!(
                            target: "respec_cli::no_heading",
                            "    {} {}",
                            "caused by:".style(styles.bold),
                            cause,
                        );
                        source = cause.source();
                    }
                }
                None
            }
        };

        while let Some(err) = next_error {
            error!(
                target: "respec_cli::no_heading",
                "  {} {}",
                "caused by:".style(styles.bold),
                err,
            );
            next_error = err.source();
        }
    }
}
