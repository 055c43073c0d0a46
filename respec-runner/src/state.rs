// Copyright (c) The respec Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-file run state and retry decisions.
//!
//! Every spec file moves through an explicit state machine:
//!
//! ```text
//! NotStarted -> Running -> (Running)* -> Succeeded | Failed | Errored
//! ```
//!
//! Each pass through `Running` is one attempt. The decision after an attempt
//! is made by [`FileRun::on_attempt_complete`], a pure function of the
//! process exit flag and the parsed report, so the whole machine is testable
//! without spawning anything.

use crate::report::SpecReport;
use std::collections::BTreeSet;

/// How many times a failing file is retried after its initial attempt.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct RetryPolicy {
    retries: usize,
}

impl RetryPolicy {
    /// The default number of retries.
    pub const DEFAULT_RETRIES: usize = 5;

    /// Creates a policy with the given retry count.
    pub fn new(retries: usize) -> Self {
        Self { retries }
    }

    /// The retry count.
    pub fn retries(self) -> usize {
        self.retries
    }

    /// Total attempts a file may take: the initial run plus retries.
    pub fn total_attempts(self) -> usize {
        self.retries + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RETRIES)
    }
}

/// Data related to retries for a single attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryData {
    /// The current attempt, counting from 1.
    pub attempt: usize,

    /// The total number of attempts permitted.
    pub total_attempts: usize,
}

impl RetryData {
    /// Returns true if this is the last attempt the file may take.
    pub fn is_last_attempt(self) -> bool {
        self.attempt >= self.total_attempts
    }
}

/// The retry scope for an attempt.
///
/// The first attempt always runs the whole file. Retries are narrowed to the
/// line numbers that failed in the immediately preceding attempt. If the
/// process failed without reporting any failed example, the whole file is run
/// again, since the failure cannot be attributed to specific examples.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttemptScope {
    /// Run every example in the file.
    WholeFile,

    /// Run only the examples defined at these line numbers.
    Lines(BTreeSet<u32>),
}

impl AttemptScope {
    fn from_report(report: &SpecReport) -> Self {
        let lines = report.failed_line_numbers();
        if lines.is_empty() {
            Self::WholeFile
        } else {
            Self::Lines(lines)
        }
    }
}

/// The state of a single spec file's run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FileRunState {
    /// The file has not been picked up by a worker slot yet.
    NotStarted,

    /// An attempt is in flight.
    Running {
        /// Retry data for the attempt in flight.
        retry_data: RetryData,

        /// The scope the attempt runs under.
        scope: AttemptScope,
    },

    /// The latest attempt exited successfully.
    Succeeded,

    /// The retry ceiling was exhausted with the file still failing.
    Failed,

    /// A spawn or parse hard error halted the file.
    Errored,
}

/// What to do after an attempt finishes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttemptDisposition {
    /// The attempt exited successfully; the file is done.
    Succeeded,

    /// The attempt failed and the retry ceiling is exhausted.
    Failed,

    /// The attempt failed and a retry is permitted.
    Retry {
        /// Retry data for the next attempt.
        retry_data: RetryData,

        /// The scope the next attempt will run under.
        scope: AttemptScope,
    },
}

/// Drives one spec file through its state machine.
#[derive(Clone, Debug)]
pub struct FileRun {
    policy: RetryPolicy,
    state: FileRunState,
}

impl FileRun {
    /// Creates a run in the `NotStarted` state.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: FileRunState::NotStarted,
        }
    }

    /// The current state.
    pub fn state(&self) -> &FileRunState {
        &self.state
    }

    /// Returns true if the run has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            FileRunState::Succeeded | FileRunState::Failed | FileRunState::Errored
        )
    }

    /// Begins the first attempt, transitioning `NotStarted -> Running`.
    pub fn start(&mut self) -> RetryData {
        match self.state {
            FileRunState::NotStarted => {
                let retry_data = RetryData {
                    attempt: 1,
                    total_attempts: self.policy.total_attempts(),
                };
                self.state = FileRunState::Running {
                    retry_data,
                    scope: AttemptScope::WholeFile,
                };
                retry_data
            }
            _ => panic!("illegal state transition: start() called in state {:?}", self.state),
        }
    }

    /// Records a completed attempt and decides what happens next.
    ///
    /// `process_succeeded` is the framework's exit status flag, which is
    /// authoritative: the report's contents never override it. On a retry the
    /// state moves straight back to `Running` for the next attempt.
    pub fn on_attempt_complete(
        &mut self,
        process_succeeded: bool,
        report: &SpecReport,
    ) -> AttemptDisposition {
        let retry_data = match &self.state {
            FileRunState::Running { retry_data, .. } => *retry_data,
            state => panic!("illegal state transition: attempt completed in state {state:?}"),
        };

        if process_succeeded {
            self.state = FileRunState::Succeeded;
            AttemptDisposition::Succeeded
        } else if retry_data.is_last_attempt() {
            self.state = FileRunState::Failed;
            AttemptDisposition::Failed
        } else {
            let scope = AttemptScope::from_report(report);
            let next = RetryData {
                attempt: retry_data.attempt + 1,
                total_attempts: retry_data.total_attempts,
            };
            self.state = FileRunState::Running {
                retry_data: next,
                scope: scope.clone(),
            };
            AttemptDisposition::Retry {
                retry_data: next,
                scope,
            }
        }
    }

    /// Records a hard error, transitioning `Running -> Errored`.
    pub fn on_error(&mut self) {
        match self.state {
            FileRunState::Running { .. } => {
                self.state = FileRunState::Errored;
            }
            ref state => {
                panic!("illegal state transition: error recorded in state {state:?}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::SpecReport;
    use maplit::btreeset;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn report_with_failures(lines: &[u32]) -> SpecReport {
        let examples = lines
            .iter()
            .map(|&line| {
                serde_json::json!({
                    "status": "failed",
                    "line_number": line,
                    "full_description": format!("example at {line}"),
                    "exception": {"class": "AssertionError", "message": "boom"},
                })
            })
            .collect::<Vec<_>>();
        let value = serde_json::json!({"duration": 0.1, "examples": examples});
        serde_json::from_value(value).unwrap()
    }

    fn all_passing_report() -> SpecReport {
        serde_json::from_value(serde_json::json!({
            "duration": 0.1,
            "examples": [
                {"status": "passed", "line_number": 4, "full_description": "a"},
            ],
        }))
        .unwrap()
    }

    #[test]
    fn success_on_first_attempt() {
        let mut run = FileRun::new(RetryPolicy::default());
        let retry_data = run.start();
        assert_eq!(retry_data.attempt, 1);
        assert_eq!(retry_data.total_attempts, 6);

        let disposition = run.on_attempt_complete(true, &all_passing_report());
        assert_eq!(disposition, AttemptDisposition::Succeeded);
        assert_eq!(run.state(), &FileRunState::Succeeded);
        assert!(run.is_terminal());
    }

    #[test]
    fn retry_scope_tracks_latest_report_only() {
        let mut run = FileRun::new(RetryPolicy::default());
        run.start();

        // First attempt fails at lines 5 and 9.
        let disposition = run.on_attempt_complete(false, &report_with_failures(&[9, 5]));
        assert_eq!(
            disposition,
            AttemptDisposition::Retry {
                retry_data: RetryData {
                    attempt: 2,
                    total_attempts: 6
                },
                scope: AttemptScope::Lines(btreeset! {5, 9}),
            }
        );

        // Second attempt fails only at line 9: the next scope must shrink to
        // just that line, not keep 5 around.
        let disposition = run.on_attempt_complete(false, &report_with_failures(&[9]));
        assert_eq!(
            disposition,
            AttemptDisposition::Retry {
                retry_data: RetryData {
                    attempt: 3,
                    total_attempts: 6
                },
                scope: AttemptScope::Lines(btreeset! {9}),
            }
        );
    }

    #[test]
    fn ceiling_exhaustion_takes_six_attempts() {
        let mut run = FileRun::new(RetryPolicy::default());
        run.start();

        let mut attempts = 1;
        loop {
            match run.on_attempt_complete(false, &report_with_failures(&[12])) {
                AttemptDisposition::Retry { retry_data, .. } => {
                    attempts += 1;
                    assert_eq!(retry_data.attempt, attempts);
                }
                AttemptDisposition::Failed => break,
                AttemptDisposition::Succeeded => panic!("attempt cannot succeed here"),
            }
        }
        assert_eq!(attempts, 6);
        assert_eq!(run.state(), &FileRunState::Failed);
    }

    #[test]
    fn exit_flag_is_authoritative_over_report() {
        // The process exited nonzero but the report lists no failed examples.
        // The run is still a failure, and the retry reruns the whole file.
        let mut run = FileRun::new(RetryPolicy::default());
        run.start();
        let disposition = run.on_attempt_complete(false, &all_passing_report());
        match disposition {
            AttemptDisposition::Retry { scope, .. } => {
                assert_eq!(scope, AttemptScope::WholeFile);
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn zero_retries_fails_immediately() {
        let mut run = FileRun::new(RetryPolicy::new(0));
        let retry_data = run.start();
        assert!(retry_data.is_last_attempt());
        let disposition = run.on_attempt_complete(false, &report_with_failures(&[3]));
        assert_eq!(disposition, AttemptDisposition::Failed);
    }

    #[test]
    fn error_is_terminal_and_distinct_from_failed() {
        let mut run = FileRun::new(RetryPolicy::default());
        run.start();
        run.on_error();
        assert_eq!(run.state(), &FileRunState::Errored);
        assert!(run.is_terminal());
        assert_ne!(run.state(), &FileRunState::Failed);
    }

    #[test_case(0, 1; "no retries means one attempt")]
    #[test_case(5, 6; "default ceiling means six attempts")]
    #[test_case(2, 3; "custom ceiling")]
    fn total_attempts(retries: usize, expected: usize) {
        assert_eq!(RetryPolicy::new(retries).total_attempts(), expected);
    }

    #[test]
    #[should_panic(expected = "illegal state transition")]
    fn completing_before_start_panics() {
        let mut run = FileRun::new(RetryPolicy::default());
        run.on_attempt_complete(true, &all_passing_report());
    }
}
