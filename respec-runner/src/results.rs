// Copyright (c) The respec Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Accumulated results for a whole run, and the final verdict.

use crate::{
    errors::{AttemptError, FileError},
    exec::AttemptStatus,
    list::SpecFile,
    report::SpecReport,
};
use camino::{Utf8Path, Utf8PathBuf};

use std::collections::BTreeMap;

/// All attempts of a single spec file, in execution order. Never empty.
#[derive(Clone, Debug)]
pub struct FileRunStatuses {
    statuses: Vec<AttemptStatus>,
}

impl FileRunStatuses {
    pub(crate) fn new(statuses: Vec<AttemptStatus>) -> Self {
        assert!(
            !statuses.is_empty(),
            "a finished file has at least one attempt"
        );
        Self { statuses }
    }

    /// The last attempt. Its report and exit flag decide the file's fate.
    pub fn last_status(&self) -> &AttemptStatus {
        self.statuses
            .last()
            .expect("statuses is never constructed empty")
    }

    /// The number of attempts that were run.
    pub fn attempt_count(&self) -> usize {
        self.statuses.len()
    }

    /// Iterates over attempts in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &AttemptStatus> + '_ {
        self.statuses.iter()
    }

    /// Describes the run for display purposes.
    pub fn describe(&self) -> FileRunDescription<'_> {
        let last_attempt = self.last_status();
        if last_attempt.process_succeeded {
            if self.statuses.len() > 1 {
                FileRunDescription::Flaky {
                    last_attempt,
                    prior_attempts: &self.statuses[..self.statuses.len() - 1],
                }
            } else {
                FileRunDescription::Success {
                    attempt: last_attempt,
                }
            }
        } else {
            FileRunDescription::Failure {
                last_attempt,
                attempt_count: self.statuses.len(),
            }
        }
    }
}

/// A human-oriented description of how a file's run went.
#[derive(Clone, Copy, Debug)]
pub enum FileRunDescription<'a> {
    /// The file passed on its first attempt.
    Success {
        /// The sole attempt.
        attempt: &'a AttemptStatus,
    },

    /// The file passed, but only after one or more retries.
    Flaky {
        /// The final, passing attempt.
        last_attempt: &'a AttemptStatus,

        /// The failing attempts before it.
        prior_attempts: &'a [AttemptStatus],
    },

    /// The file exhausted its attempts and still failed.
    Failure {
        /// The final, failing attempt.
        last_attempt: &'a AttemptStatus,

        /// How many attempts were made in total.
        attempt_count: usize,
    },
}

/// Counters over a whole run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunStats {
    /// The total number of files that will be run.
    pub initial_run_count: usize,

    /// The number of files that reached a terminal state.
    pub finished_count: usize,

    /// The number of files that passed.
    pub passed: usize,

    /// The number of files that passed but needed retries. Included in
    /// `passed`.
    pub flaky: usize,

    /// The number of files that exhausted their attempts and failed.
    pub failed: usize,

    /// The number of files halted by a spawn or parse hard error.
    pub exec_failed: usize,
}

impl RunStats {
    /// Returns true if every file finished and none failed.
    pub fn is_success(&self) -> bool {
        self.finished_count == self.initial_run_count && !self.any_failed()
    }

    /// Returns true if any file failed or was halted by a hard error.
    pub fn any_failed(&self) -> bool {
        self.failed > 0 || self.exec_failed > 0
    }

    pub(crate) fn on_file_finished(&mut self, statuses: &FileRunStatuses) {
        self.finished_count += 1;
        match statuses.describe() {
            FileRunDescription::Success { .. } => self.passed += 1,
            FileRunDescription::Flaky { .. } => {
                self.passed += 1;
                self.flaky += 1;
            }
            FileRunDescription::Failure { .. } => self.failed += 1,
        }
    }

    pub(crate) fn on_file_errored(&mut self) {
        self.finished_count += 1;
        self.exec_failed += 1;
    }
}

/// The accumulated results of a run: one final report per file, plus ordered
/// lists of the files that failed or errored.
#[derive(Clone, Debug, Default)]
pub struct SuiteResults {
    reports: BTreeMap<Utf8PathBuf, SpecReport>,
    failed: Vec<Utf8PathBuf>,
    errored: Vec<FileError>,
}

impl SuiteResults {
    /// The final report for each file that completed at least one parsed
    /// attempt, keyed by path.
    ///
    /// Successes and failures both record the latest attempt's report, so a
    /// file that failed once and then passed shows its second, passing
    /// report here.
    pub fn reports(&self) -> &BTreeMap<Utf8PathBuf, SpecReport> {
        &self.reports
    }

    /// The final report for a single file, if it recorded one.
    pub fn report_for(&self, path: &Utf8Path) -> Option<&SpecReport> {
        self.reports.get(path)
    }

    /// Files that exhausted their attempts and still failed, in completion
    /// order.
    pub fn failed(&self) -> &[Utf8PathBuf] {
        &self.failed
    }

    /// Files halted by hard errors, in completion order.
    pub fn errored(&self) -> &[FileError] {
        &self.errored
    }

    pub(crate) fn record_finished(&mut self, spec_file: &SpecFile, statuses: &FileRunStatuses) {
        let last_status = statuses.last_status();
        self.reports
            .insert(spec_file.path().to_owned(), last_status.report.clone());
        if !last_status.process_succeeded {
            self.failed.push(spec_file.path().to_owned());
        }
    }

    pub(crate) fn record_errored(
        &mut self,
        spec_file: &SpecFile,
        error: AttemptError,
        last_report: Option<SpecReport>,
    ) {
        if let Some(report) = last_report {
            self.reports.insert(spec_file.path().to_owned(), report);
        }
        self.errored.push(FileError {
            spec_file: spec_file.path().to_owned(),
            error,
        });
    }
}

/// A one-line summary of a failed file, for end-of-run output.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FailureSummary {
    /// The failed file.
    pub spec_file: Utf8PathBuf,

    /// The line number of the first failed example, if the final report
    /// contains one.
    pub line_number: Option<u32>,

    /// The first failed example's description.
    pub description: Option<String>,

    /// The exception class, if reported.
    pub exception_class: Option<String>,

    /// The exception message, if reported.
    pub exception_message: Option<String>,
}

impl FailureSummary {
    fn from_report(spec_file: &Utf8Path, report: Option<&SpecReport>) -> Self {
        let failure = report.and_then(SpecReport::first_failure);
        Self {
            spec_file: spec_file.to_owned(),
            line_number: failure.map(|f| f.line_number),
            description: failure.map(|f| f.full_description.clone()),
            exception_class: failure
                .and_then(|f| f.exception.as_ref())
                .map(|e| e.class.clone()),
            exception_message: failure
                .and_then(|f| f.exception.as_ref())
                .map(|e| e.message.clone()),
        }
    }
}

/// The final verdict for a run.
///
/// Deciding a verdict is a pure function of the accumulated results: the same
/// results always produce the same verdict.
#[derive(Clone, Debug)]
pub struct Verdict {
    exit_failure: bool,
    summaries: Vec<FailureSummary>,
}

impl Verdict {
    /// Computes the verdict from accumulated results.
    pub fn decide(results: &SuiteResults) -> Self {
        let summaries = results
            .failed
            .iter()
            .map(|path| FailureSummary::from_report(path, results.report_for(path)))
            .collect();
        Self {
            exit_failure: !results.failed.is_empty() || !results.errored.is_empty(),
            summaries,
        }
    }

    /// Returns true if the process should exit nonzero.
    pub fn exit_failure(&self) -> bool {
        self.exit_failure
    }

    /// One summary per failed file, in completion order. Errored files are
    /// reported through [`SuiteResults::errored`], not here.
    pub fn summaries(&self) -> &[FailureSummary] {
        &self.summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{list::SpecList, state::RetryData};
    use chrono::Local;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn spec_file(path: &str) -> SpecFile {
        SpecList::new([Utf8PathBuf::from(path)])
            .iter()
            .next()
            .cloned()
            .unwrap()
    }

    fn attempt(attempt: usize, process_succeeded: bool, report_json: &str) -> AttemptStatus {
        AttemptStatus {
            retry_data: RetryData {
                attempt,
                total_attempts: 6,
            },
            report: serde_json::from_str(report_json).unwrap(),
            process_succeeded,
            start_time: Local::now(),
            time_taken: Duration::from_millis(10),
        }
    }

    const PASSING: &str =
        r#"{"duration":0.1,"examples":[{"status":"passed","line_number":4,"full_description":"a"}]}"#;
    const FAILING: &str = r#"{"duration":0.2,"examples":[
        {"status":"failed","line_number":9,"full_description":"widget updates",
         "exception":{"class":"ExpectationNotMet","message":"expected 2, got 3"}}]}"#;
    const EMPTY: &str = r#"{"duration":0.0,"examples":[]}"#;

    #[test]
    fn run_stats_is_success() {
        assert!(RunStats::default().is_success());
        assert!(
            RunStats {
                initial_run_count: 2,
                finished_count: 2,
                passed: 2,
                ..RunStats::default()
            }
            .is_success()
        );
        assert!(
            !RunStats {
                initial_run_count: 2,
                finished_count: 1,
                passed: 1,
                ..RunStats::default()
            }
            .is_success(),
            "unfinished files mean failure"
        );
        assert!(
            !RunStats {
                initial_run_count: 2,
                finished_count: 2,
                passed: 1,
                failed: 1,
                ..RunStats::default()
            }
            .is_success()
        );
        assert!(
            !RunStats {
                initial_run_count: 2,
                finished_count: 2,
                passed: 1,
                exec_failed: 1,
                ..RunStats::default()
            }
            .is_success(),
            "hard errors mean failure"
        );
    }

    #[test]
    fn stats_count_flaky_as_passed() {
        let statuses =
            FileRunStatuses::new(vec![attempt(1, false, FAILING), attempt(2, true, PASSING)]);
        let mut stats = RunStats {
            initial_run_count: 1,
            ..RunStats::default()
        };
        stats.on_file_finished(&statuses);
        assert_eq!(stats.passed, 1);
        assert_eq!(stats.flaky, 1);
        assert_eq!(stats.failed, 0);
        assert!(stats.is_success());
    }

    #[test]
    fn results_keep_latest_report_per_file() {
        let mut results = SuiteResults::default();
        let file = spec_file("spec/a_spec.rb");
        let statuses =
            FileRunStatuses::new(vec![attempt(1, false, FAILING), attempt(2, true, PASSING)]);
        results.record_finished(&file, &statuses);

        assert_eq!(results.reports().len(), 1);
        let report = results.report_for(Utf8Path::new("spec/a_spec.rb")).unwrap();
        assert!(report.all_passed(), "the second attempt's report is kept");
        assert!(results.failed().is_empty());
    }

    #[test]
    fn verdict_summarizes_failed_files() {
        let mut results = SuiteResults::default();
        let file = spec_file("spec/b_spec.rb");
        let statuses = FileRunStatuses::new(vec![attempt(6, false, FAILING)]);
        results.record_finished(&file, &statuses);

        let verdict = Verdict::decide(&results);
        assert!(verdict.exit_failure());
        assert_eq!(verdict.summaries().len(), 1);
        let summary = &verdict.summaries()[0];
        assert_eq!(summary.spec_file, "spec/b_spec.rb");
        assert_eq!(summary.line_number, Some(9));
        assert_eq!(summary.description.as_deref(), Some("widget updates"));
        assert_eq!(summary.exception_class.as_deref(), Some("ExpectationNotMet"));
        assert_eq!(
            summary.exception_message.as_deref(),
            Some("expected 2, got 3")
        );

        // Deciding again produces the same summaries.
        let again = Verdict::decide(&results);
        assert_eq!(verdict.summaries(), again.summaries());
    }

    #[test]
    fn verdict_tolerates_report_without_failures() {
        // A file can fail via exit status while its report lists no failed
        // examples. The summary must degrade gracefully, not panic.
        let mut results = SuiteResults::default();
        let file = spec_file("spec/c_spec.rb");
        let statuses = FileRunStatuses::new(vec![attempt(6, false, EMPTY)]);
        results.record_finished(&file, &statuses);

        let verdict = Verdict::decide(&results);
        assert!(verdict.exit_failure());
        let summary = &verdict.summaries()[0];
        assert_eq!(summary.line_number, None);
        assert_eq!(summary.exception_class, None);
    }

    #[test]
    fn errored_files_fail_the_run_without_summaries() {
        let mut results = SuiteResults::default();
        let file = spec_file("spec/d_spec.rb");
        results.record_errored(
            &file,
            AttemptError::Parse(crate::errors::ReportParseError::EmptyOutput),
            None,
        );

        let verdict = Verdict::decide(&results);
        assert!(verdict.exit_failure());
        assert!(verdict.summaries().is_empty());
        assert_eq!(results.errored().len(), 1);
        assert!(results.reports().is_empty());
    }
}
