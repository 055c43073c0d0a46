// Copyright (c) The respec Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Spawning the spec framework and collecting one attempt's output.

use crate::{
    errors::AttemptError,
    list::SpecFile,
    report::SpecReport,
    state::{AttemptScope, RetryData},
    time::stopwatch,
};
use bytes::BytesMut;
use chrono::{DateTime, Local};
use itertools::Itertools;
use std::{process::Stdio, sync::Arc, time::Duration};
use tokio::{io::AsyncReadExt, process::Command};
use uuid::Uuid;

/// The external command that runs spec files.
///
/// The program and any base arguments come from configuration; the runner
/// appends its own formatting and ordering flags plus the target argument for
/// each attempt.
#[derive(Clone, Debug)]
pub struct SpecFramework {
    program: String,
    args: Vec<String>,
}

impl SpecFramework {
    /// The default framework program.
    pub const DEFAULT_PROGRAM: &'static str = "rspec";

    /// Creates a framework invocation for the given program.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Adds base arguments passed before the runner's own flags.
    pub fn with_args(mut self, args: impl IntoIterator<Item = String>) -> Self {
        self.args.extend(args);
        self
    }

    /// The program that will be spawned.
    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(
        &self,
        spec_file: &SpecFile,
        scope: &AttemptScope,
        run_id: Uuid,
        retry_data: RetryData,
    ) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.args(["--format", "json", "--order", "random"]);
        cmd.arg(target_argument(spec_file, scope));
        // Mark the environment so frameworks and user hooks can detect a
        // non-interactive orchestrated run.
        cmd.env("RESPEC", "1");
        cmd.env("RESPEC_RUN_ID", run_id.to_string());
        cmd.env("__RESPEC_ATTEMPT", retry_data.attempt.to_string());
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

/// Formats the target argument for an attempt: the bare path for a whole-file
/// run, or `path[l1,l2,...]` for a scoped retry.
fn target_argument(spec_file: &SpecFile, scope: &AttemptScope) -> String {
    match scope {
        AttemptScope::WholeFile => spec_file.path().to_string(),
        AttemptScope::Lines(lines) => {
            format!("{}[{}]", spec_file.path(), lines.iter().join(","))
        }
    }
}

/// The result of one completed attempt: the parsed report plus process-level
/// facts about the run.
#[derive(Clone, Debug)]
pub struct AttemptStatus {
    /// Retry data for this attempt.
    pub retry_data: RetryData,

    /// The parsed report.
    pub report: SpecReport,

    /// Whether the process exited successfully. This flag is authoritative
    /// for pass/fail; the report only supplies detail.
    pub process_succeeded: bool,

    /// When the attempt started.
    pub start_time: DateTime<Local>,

    /// How long the attempt took, measured by the orchestrator.
    pub time_taken: Duration,
}

/// Runs attempts of spec files for a single run.
#[derive(Clone, Copy, Debug)]
pub(crate) struct SpecExecutor<'a> {
    framework: &'a SpecFramework,
    run_id: Uuid,
}

impl<'a> SpecExecutor<'a> {
    pub(crate) fn new(framework: &'a SpecFramework, run_id: Uuid) -> Self {
        Self { framework, run_id }
    }

    /// Spawns one attempt, drains its output, waits for exit, and parses the
    /// report payload.
    ///
    /// Spawn failures, I/O failures and malformed payloads all surface as
    /// [`AttemptError`]s, which halt the file rather than count as a test
    /// failure.
    pub(crate) async fn run_attempt(
        &self,
        spec_file: &SpecFile,
        retry_data: RetryData,
        scope: &AttemptScope,
    ) -> Result<AttemptStatus, AttemptError> {
        let mut cmd = self
            .framework
            .command(spec_file, scope, self.run_id, retry_data);

        let attempt_stopwatch = stopwatch();
        let mut child = cmd
            .spawn()
            .map_err(|error| AttemptError::Spawn(Arc::new(error)))?;

        // Both streams were configured as piped above.
        let mut stdout_pipe = child.stdout.take().expect("stdout is piped");
        let mut stderr_pipe = child.stderr.take().expect("stderr is piped");

        let mut stdout = BytesMut::with_capacity(4096);
        let mut stderr = BytesMut::with_capacity(1024);

        // Drain both pipes to EOF concurrently so the child can never block
        // on a full pipe. Only stdout carries the report; stderr is discarded
        // after the read.
        let stdout_fut = async {
            loop {
                let bytes_read = stdout_pipe.read_buf(&mut stdout).await?;
                if bytes_read == 0 {
                    break;
                }
            }
            Ok::<_, std::io::Error>(())
        };
        let stderr_fut = async {
            loop {
                let bytes_read = stderr_pipe.read_buf(&mut stderr).await?;
                if bytes_read == 0 {
                    break;
                }
            }
            Ok::<_, std::io::Error>(())
        };
        futures::future::try_join(stdout_fut, stderr_fut)
            .await
            .map_err(|error| AttemptError::Read(Arc::new(error)))?;

        let exit_status = child
            .wait()
            .await
            .map_err(|error| AttemptError::Wait(Arc::new(error)))?;

        let snapshot = attempt_stopwatch.snapshot();
        let report = SpecReport::from_stdout(&stdout)?;

        Ok(AttemptStatus {
            retry_data,
            report,
            process_succeeded: exit_status.success(),
            start_time: snapshot.start_time,
            time_taken: snapshot.duration,
        })
    }
}
