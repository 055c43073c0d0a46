// Copyright (c) The respec Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    errors::{ExpectedError, RespecExitCode, Result},
    output::{OutputContext, OutputOpts, OutputWriter},
};
use camino::Utf8PathBuf;
use clap::{Args, Parser};
use owo_colors::OwoColorize;
use respec_runner::{
    exec::SpecFramework,
    list::SpecList,
    reporter::SpecReporterBuilder,
    results::Verdict,
    runner::{SpecRunnerBuilder, WorkerCount},
};
use std::io::Write;
use tracing::info;

/// A concurrent spec suite orchestrator with retry-aware scheduling.
#[derive(Debug, Parser)]
#[command(name = "respec", version, about)]
pub struct RespecApp {
    #[command(flatten)]
    output: OutputOpts,

    #[command(flatten)]
    runner_opts: RunnerOpts,

    #[command(flatten)]
    reporter_opts: ReporterOpts,

    /// Spec files to run
    #[arg(required = true, value_name = "SPEC_FILES")]
    spec_files: Vec<Utf8PathBuf>,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Runner options")]
struct RunnerOpts {
    /// Number of spec files to run simultaneously [default: available
    /// parallelism minus one]
    #[arg(
        long = "workers",
        short = 'j',
        visible_alias = "jobs",
        value_name = "N",
        env = "RESPEC_WORKERS"
    )]
    workers: Option<usize>,

    /// Number of retries for failing spec files
    #[arg(long, value_name = "N", env = "RESPEC_RETRIES")]
    retries: Option<usize>,

    /// Spec framework command used to run files
    #[arg(
        long,
        value_name = "PROGRAM",
        default_value = SpecFramework::DEFAULT_PROGRAM,
        env = "RESPEC_COMMAND"
    )]
    command: String,

    /// Extra argument passed to the framework before runner flags (may be
    /// repeated)
    #[arg(long = "framework-arg", value_name = "ARG", allow_hyphen_values = true)]
    framework_args: Vec<String>,
}

#[derive(Debug, Args)]
#[command(next_help_heading = "Reporter options")]
struct ReporterOpts {
    /// Disable the live progress bar
    #[arg(long, env = "RESPEC_NO_PROGRESS")]
    no_progress: bool,
}

impl RespecApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the run, returning the process exit code on success.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let spec_list = SpecList::new(self.spec_files);
        let framework = SpecFramework::new(&self.runner_opts.command)
            .with_args(self.runner_opts.framework_args.clone());

        if output.verbose {
            info!(
                "running {} spec files with `{}`",
                spec_list.run_count(),
                framework.program(),
            );
        }

        let mut builder = SpecRunnerBuilder::default();
        if let Some(workers) = self.runner_opts.workers {
            builder.set_worker_count(WorkerCount::Count(workers));
        }
        if let Some(retries) = self.runner_opts.retries {
            builder.set_retries(retries);
        }
        let mut runner = builder.build(&spec_list, &framework)?;

        let summary = {
            let mut reporter_builder = SpecReporterBuilder::default();
            reporter_builder
                .set_no_progress(self.reporter_opts.no_progress)
                .set_colorize(output.color.should_colorize(supports_color::Stream::Stderr));
            let mut reporter = reporter_builder.build(&spec_list, output_writer.reporter_output());

            runner
                .try_execute(|event| reporter.report_event(event))
                .map_err(|err| ExpectedError::WriteEventError { err })?
        };

        let verdict = Verdict::decide(&summary.results);
        let styles = output.stderr_styles();

        if !verdict.summaries().is_empty() {
            let mut writer = output_writer.stderr_writer();
            writeln!(writer, "failures:")
                .map_err(|err| ExpectedError::WriteEventError { err: err.into() })?;
            for row in verdict.summaries() {
                let location = match row.line_number {
                    Some(line) => format!("{}:{line}", row.spec_file),
                    None => row.spec_file.to_string(),
                };
                writeln!(
                    writer,
                    "  {}: {}",
                    location.style(styles.failure),
                    row.description.as_deref().unwrap_or("(no failing example in final report)"),
                )
                .map_err(|err| ExpectedError::WriteEventError { err: err.into() })?;
                if let (Some(class), Some(message)) =
                    (row.exception_class.as_deref(), row.exception_message.as_deref())
                {
                    writeln!(writer, "    {}: {message}", class.style(styles.bold))
                        .map_err(|err| ExpectedError::WriteEventError { err: err.into() })?;
                }
            }
            writer
                .flush()
                .map_err(|err| ExpectedError::WriteEventError { err: err.into() })?;
        }

        if !summary.results.errored().is_empty() {
            return Err(ExpectedError::FrameworkError {
                errors: summary.results.errored().to_vec(),
            });
        }
        if verdict.exit_failure() {
            return Err(ExpectedError::TestRunFailed);
        }
        Ok(RespecExitCode::OK)
    }
}
