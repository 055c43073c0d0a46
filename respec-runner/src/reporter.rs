// Copyright (c) The respec Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events reported during a run, and the terminal reporter that renders them.
//!
//! The runner delivers [`SpecEvent`]s to a callback; [`SpecReporter`] is the
//! provided implementation, rendering one status line per retry and per
//! terminal state, plus a live progress bar with a spinner row per running
//! file. Events for one file arrive in order; events for different files
//! interleave arbitrarily.

use crate::{
    errors::{AttemptError, WriteEventError},
    helpers::{plural, DisplayBracketedDuration},
    list::{SpecFile, SpecList},
    report::SpecReport,
    results::{FileRunDescription, FileRunStatuses, RunStats},
    state::{AttemptScope, RetryData},
};
use camino::Utf8PathBuf;
use chrono::{DateTime, Local};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use owo_colors::{OwoColorize, Style};
use std::{collections::HashMap, io::Write, time::Duration};
use swrite::{swrite, SWrite};
use uuid::Uuid;

/// A run event.
#[derive(Clone, Debug)]
pub struct SpecEvent<'a> {
    /// The time at which the event was generated.
    pub timestamp: DateTime<Local>,

    /// Time elapsed since the start of the run.
    pub elapsed: Duration,

    /// The kind of event.
    pub kind: SpecEventKind<'a>,
}

/// The kind of a [`SpecEvent`].
#[derive(Clone, Debug)]
pub enum SpecEventKind<'a> {
    /// The run started.
    RunStarted {
        /// The list of files being run.
        spec_list: &'a SpecList,

        /// The unique id for this run.
        run_id: Uuid,
    },

    /// A file's first attempt started.
    FileStarted {
        /// The file.
        spec_file: &'a SpecFile,

        /// Statistics about the run so far.
        current_stats: RunStats,

        /// The number of files currently running, including this one.
        running: usize,
    },

    /// An attempt failed and a retry is starting within the same worker slot.
    FileRetryStarted {
        /// The file.
        spec_file: &'a SpecFile,

        /// Retry data for the attempt that is starting.
        retry_data: RetryData,

        /// The scope the retry runs under.
        scope: AttemptScope,

        /// The attempt that just failed.
        failed_attempt: crate::exec::AttemptStatus,
    },

    /// A file reached the succeeded or failed terminal state.
    FileFinished {
        /// The file.
        spec_file: &'a SpecFile,

        /// Every attempt of the file, in order.
        run_statuses: FileRunStatuses,

        /// Statistics about the run so far, including this file.
        current_stats: RunStats,

        /// The number of files still running.
        running: usize,
    },

    /// A file was halted by a spawn or parse hard error.
    FileErrored {
        /// The file.
        spec_file: &'a SpecFile,

        /// The error that halted it.
        error: AttemptError,

        /// The final report of an earlier attempt, if one parsed.
        last_report: Option<SpecReport>,

        /// Statistics about the run so far, including this file.
        current_stats: RunStats,

        /// The number of files still running.
        running: usize,
    },

    /// The run finished: every file reached a terminal state.
    RunFinished {
        /// The unique id for this run.
        run_id: Uuid,

        /// When the run started.
        start_time: DateTime<Local>,

        /// How long the run took.
        elapsed: Duration,

        /// Final statistics.
        run_stats: RunStats,
    },
}

/// Where the reporter writes its output.
pub enum ReporterStderr<'a> {
    /// The process's standard error.
    Terminal,

    /// An in-memory buffer, used for testing.
    Buffer(&'a mut Vec<u8>),
}

#[derive(Clone, Debug, Default)]
struct Styles {
    count: Style,
    pass: Style,
    retry: Style,
    fail: Style,
    file: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.count = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.retry = Style::new().magenta().bold();
        self.fail = Style::new().red().bold();
        self.file = Style::new().bold();
    }
}

/// Builder for [`SpecReporter`].
#[derive(Debug, Default)]
pub struct SpecReporterBuilder {
    no_progress: bool,
    colorize: bool,
}

impl SpecReporterBuilder {
    /// Disables the live progress bar, leaving only status lines.
    pub fn set_no_progress(&mut self, no_progress: bool) -> &mut Self {
        self.no_progress = no_progress;
        self
    }

    /// Enables colorized output.
    pub fn set_colorize(&mut self, colorize: bool) -> &mut Self {
        self.colorize = colorize;
        self
    }

    /// Creates a reporter for the given spec list.
    pub fn build<'a>(&self, spec_list: &SpecList, output: ReporterStderr<'a>) -> SpecReporter<'a> {
        let mut styles = Styles::default();
        if self.colorize {
            styles.colorize();
        }
        let progress = match &output {
            ReporterStderr::Terminal if !self.no_progress => {
                Some(ProgressBarState::new(spec_list.run_count()))
            }
            _ => None,
        };
        SpecReporter {
            styles: Box::new(styles),
            label_width: spec_list.label_width(),
            progress,
            output,
        }
    }
}

/// Renders [`SpecEvent`]s as status lines and live progress.
pub struct SpecReporter<'a> {
    styles: Box<Styles>,
    label_width: usize,
    progress: Option<ProgressBarState>,
    output: ReporterStderr<'a>,
}

impl<'a> SpecReporter<'a> {
    /// Handles one event.
    pub fn report_event(&mut self, event: SpecEvent<'_>) -> Result<(), WriteEventError> {
        let mut line = String::new();
        match &event.kind {
            SpecEventKind::RunStarted { spec_list, .. } => {
                let count = spec_list.run_count();
                swrite!(
                    line,
                    "{:>12} {} {}",
                    "Starting".style(self.styles.count),
                    count.style(self.styles.count),
                    plural::files_str(count),
                );
                self.write_line(&line)?;
            }
            SpecEventKind::FileStarted {
                current_stats,
                running,
                spec_file,
            } => {
                if let Some(progress) = &mut self.progress {
                    progress.file_started(spec_file, self.label_width);
                    progress.update_overall(current_stats, *running, &self.styles);
                }
            }
            SpecEventKind::FileRetryStarted {
                spec_file,
                retry_data,
                scope,
                failed_attempt,
            } => {
                swrite!(
                    line,
                    "{:>12} {} {}",
                    "RETRY".style(self.styles.retry),
                    DisplayBracketedDuration(failed_attempt.time_taken),
                    spec_file.path().style(self.styles.file),
                );
                match scope {
                    AttemptScope::WholeFile => {
                        swrite!(
                            line,
                            " (attempt {}/{}, whole file)",
                            retry_data.attempt,
                            retry_data.total_attempts,
                        );
                    }
                    AttemptScope::Lines(lines) => {
                        swrite!(
                            line,
                            " (attempt {}/{}, {} failed {})",
                            retry_data.attempt,
                            retry_data.total_attempts,
                            lines.len(),
                            plural::cases_str(lines.len()),
                        );
                    }
                }
                self.write_line(&line)?;
                if let Some(progress) = &mut self.progress {
                    progress.file_retrying(spec_file, *retry_data, self.label_width);
                }
            }
            SpecEventKind::FileFinished {
                spec_file,
                run_statuses,
                current_stats,
                running,
            } => {
                let last_status = run_statuses.last_status();
                match run_statuses.describe() {
                    FileRunDescription::Success { .. } => {
                        swrite!(line, "{:>12} ", "PASS".style(self.styles.pass));
                    }
                    FileRunDescription::Flaky { .. } => {
                        swrite!(
                            line,
                            "{:>12} ",
                            format!("TRY {} PASS", run_statuses.attempt_count())
                                .style(self.styles.retry),
                        );
                    }
                    FileRunDescription::Failure { .. } => {
                        swrite!(line, "{:>12} ", "FAIL".style(self.styles.fail));
                    }
                }
                swrite!(
                    line,
                    "{} {}",
                    DisplayBracketedDuration(last_status.time_taken),
                    spec_file.path().style(self.styles.file),
                );
                self.write_line(&line)?;
                if let Some(progress) = &mut self.progress {
                    progress.file_done(spec_file);
                    progress.update_overall(current_stats, *running, &self.styles);
                }
            }
            SpecEventKind::FileErrored {
                spec_file,
                error,
                current_stats,
                running,
                ..
            } => {
                swrite!(
                    line,
                    "{:>12} {}: {}",
                    "ERROR".style(self.styles.fail),
                    spec_file.path().style(self.styles.file),
                    error,
                );
                let mut source = std::error::Error::source(error);
                while let Some(cause) = source {
                    swrite!(line, "\n{:>12} {}", "caused by:".style(self.styles.count), cause);
                    source = cause.source();
                }
                self.write_line(&line)?;
                if let Some(progress) = &mut self.progress {
                    progress.file_done(spec_file);
                    progress.update_overall(current_stats, *running, &self.styles);
                }
            }
            SpecEventKind::RunFinished {
                elapsed, run_stats, ..
            } => {
                if let Some(progress) = &self.progress {
                    progress.finish_and_clear();
                }
                let summary_style = if run_stats.any_failed() {
                    self.styles.fail
                } else {
                    self.styles.pass
                };
                swrite!(
                    line,
                    "{:>12} {} {} {} run: {} {}",
                    "Summary".style(summary_style),
                    DisplayBracketedDuration(*elapsed),
                    run_stats.initial_run_count.style(self.styles.count),
                    plural::files_str(run_stats.initial_run_count),
                    run_stats.passed.style(self.styles.pass),
                    "passed".style(self.styles.pass),
                );
                if run_stats.flaky > 0 {
                    swrite!(
                        line,
                        " ({} {})",
                        run_stats.flaky.style(self.styles.retry),
                        "flaky".style(self.styles.retry),
                    );
                }
                swrite!(
                    line,
                    ", {} {}",
                    run_stats.failed.style(self.styles.fail),
                    "failed".style(self.styles.fail),
                );
                if run_stats.exec_failed > 0 {
                    swrite!(
                        line,
                        ", {} {}",
                        run_stats.exec_failed.style(self.styles.fail),
                        "errored".style(self.styles.fail),
                    );
                }
                self.write_line(&line)?;
            }
        }
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<(), WriteEventError> {
        match &mut self.output {
            ReporterStderr::Terminal => {
                if let Some(progress) = &self.progress {
                    // ProgressBar::println doesn't print status lines if the
                    // bar is hidden. The suspend method prints in all cases.
                    progress.multi_progress.suspend(|| eprintln!("{line}"));
                } else {
                    eprintln!("{line}");
                }
            }
            ReporterStderr::Buffer(buf) => {
                writeln!(buf, "{line}")?;
            }
        }
        Ok(())
    }
}

struct ProgressBarState {
    multi_progress: MultiProgress,
    overall: ProgressBar,
    file_bars: HashMap<Utf8PathBuf, ProgressBar>,
}

impl ProgressBarState {
    fn new(run_count: usize) -> Self {
        let multi_progress = MultiProgress::new();
        // NOTE: set_draw_target must be called before enable_steady_tick to
        // avoid a spurious extra line as the draw target changes.
        multi_progress.set_draw_target(ProgressDrawTarget::stderr_with_hz(20));

        let overall = multi_progress.add(ProgressBar::new(run_count as u64));
        let count_width = format!("{run_count}").len();
        let template = format!(
            "{{prefix:>12}} [{{elapsed_precise:>9}}] {{wide_bar}} \
            {{pos:>{count_width}}}/{{len:{count_width}}}: {{msg}}     "
        );
        overall.set_style(
            ProgressStyle::default_bar()
                .progress_chars("=> ")
                .template(&template)
                .expect("template is known to be valid"),
        );
        overall.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi_progress,
            overall,
            file_bars: HashMap::new(),
        }
    }

    fn file_started(&mut self, spec_file: &SpecFile, label_width: usize) {
        let bar = self.multi_progress.add(ProgressBar::new_spinner());
        bar.set_style(
            ProgressStyle::default_bar()
                .template("     Running [{elapsed_precise:>9}] {wide_msg}")
                .expect("template is known to be valid"),
        );
        bar.set_message(format!("{:<label_width$}", spec_file.path()));
        bar.enable_steady_tick(Duration::from_millis(100));
        self.file_bars.insert(spec_file.path().to_owned(), bar);
    }

    fn file_retrying(&mut self, spec_file: &SpecFile, retry_data: RetryData, label_width: usize) {
        if let Some(bar) = self.file_bars.get(spec_file.path()) {
            bar.set_message(format!(
                "{:<label_width$} (attempt {}/{})",
                spec_file.path(),
                retry_data.attempt,
                retry_data.total_attempts,
            ));
        }
    }

    fn file_done(&mut self, spec_file: &SpecFile) {
        if let Some(bar) = self.file_bars.remove(spec_file.path()) {
            bar.finish_and_clear();
            self.multi_progress.remove(&bar);
        }
    }

    fn update_overall(&self, current_stats: &RunStats, running: usize, styles: &Styles) {
        let prefix = if current_stats.any_failed() {
            "Running".style(styles.fail).to_string()
        } else {
            "Running".style(styles.count).to_string()
        };
        self.overall.set_prefix(prefix);

        let mut msg = String::new();
        swrite!(
            msg,
            "{} {} running",
            running.style(styles.count),
            plural::files_str(running),
        );
        if current_stats.failed > 0 {
            swrite!(
                msg,
                ", {} {}",
                current_stats.failed.style(styles.fail),
                "failed".style(styles.fail),
            );
        }
        if current_stats.exec_failed > 0 {
            swrite!(
                msg,
                ", {} {}",
                current_stats.exec_failed.style(styles.fail),
                "errored".style(styles.fail),
            );
        }
        self.overall.set_message(msg);
        self.overall.set_position(current_stats.finished_count as u64);
    }

    fn finish_and_clear(&self) {
        for bar in self.file_bars.values() {
            bar.finish_and_clear();
        }
        self.overall.finish_and_clear();
        self.multi_progress.clear().ok();
    }
}
