// Copyright (c) The respec Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The typed report a spec framework emits for one run of a file.
//!
//! The framework writes a single JSON document as the last non-empty line of
//! its standard output. Everything before that line is human-oriented noise
//! and is ignored. The document is deserialized into [`SpecReport`] up front;
//! downstream code never touches dynamic JSON values.

use crate::errors::ReportParseError;
use serde::Deserialize;
use std::{collections::BTreeSet, sync::Arc};

/// A parsed report for one attempt of a spec file.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SpecReport {
    /// Total wall-clock duration of the run, in seconds.
    pub duration: f64,

    /// Per-example results, in the order the framework ran them.
    pub examples: Vec<ExampleResult>,
}

impl SpecReport {
    /// Extracts the report payload from captured stdout and parses it.
    ///
    /// The payload is the last non-empty line. Missing or malformed payloads
    /// are hard errors, never treated as a passing or failing run.
    pub fn from_stdout(stdout: &[u8]) -> Result<Self, ReportParseError> {
        let text = String::from_utf8_lossy(stdout);
        let line = text
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .ok_or(ReportParseError::EmptyOutput)?;
        serde_json::from_str(line).map_err(|error| ReportParseError::Json {
            line: line.to_owned(),
            source: Arc::new(error),
        })
    }

    /// Returns the deduplicated, ordered line numbers of failed examples.
    ///
    /// This is the retry scope for the next attempt. It is always recomputed
    /// from the latest report, never accumulated across attempts.
    pub fn failed_line_numbers(&self) -> BTreeSet<u32> {
        self.examples
            .iter()
            .filter(|example| example.status == ExampleStatus::Failed)
            .map(|example| example.line_number)
            .collect()
    }

    /// Returns the first failed example, if any.
    pub fn first_failure(&self) -> Option<&ExampleResult> {
        self.examples
            .iter()
            .find(|example| example.status == ExampleStatus::Failed)
    }

    /// Returns true if no examples failed.
    pub fn all_passed(&self) -> bool {
        self.examples
            .iter()
            .all(|example| example.status != ExampleStatus::Failed)
    }

    /// The number of examples in this report.
    pub fn example_count(&self) -> usize {
        self.examples.len()
    }
}

/// The outcome of a single example within a [`SpecReport`].
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ExampleResult {
    /// The example's status.
    pub status: ExampleStatus,

    /// The source line the example is defined on. Used to scope retries.
    pub line_number: u32,

    /// The full human-readable description of the example.
    pub full_description: String,

    /// The failure's exception, present for failed examples.
    #[serde(default)]
    pub exception: Option<ExceptionDetail>,
}

/// Status of a single example.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ExampleStatus {
    /// The example passed.
    Passed,

    /// The example failed.
    Failed,

    /// The example was skipped as pending. Pending examples never fail a run.
    Pending,
}

/// Details of the exception that failed an example.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ExceptionDetail {
    /// The exception class name.
    pub class: String,

    /// The exception message.
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use maplit::btreeset;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_basic_report() {
        let stdout = indoc! {br#"
            Randomized with seed 61423
            ...F.

            {"duration":1.52,"examples":[{"status":"passed","line_number":4,"full_description":"widget renders"},{"status":"failed","line_number":9,"full_description":"widget updates","exception":{"class":"ExpectationNotMet","message":"expected 2, got 3"}}]}
        "#};
        let report = SpecReport::from_stdout(stdout).unwrap();
        assert_eq!(report.duration, 1.52);
        assert_eq!(report.example_count(), 2);
        assert_eq!(report.examples[0].status, ExampleStatus::Passed);
        assert_eq!(report.examples[0].exception, None);

        let failure = report.first_failure().unwrap();
        assert_eq!(failure.line_number, 9);
        assert_eq!(
            failure.exception.as_ref().unwrap().class,
            "ExpectationNotMet"
        );
        assert!(!report.all_passed());
    }

    #[test]
    fn payload_is_last_nonempty_line() {
        // Trailing blank lines and human noise before the payload are both
        // skipped over.
        let stdout = b"starting up\n{\"not\":\"the payload\"}\n{\"duration\":0.1,\"examples\":[]}\n\n\n";
        let report = SpecReport::from_stdout(stdout).unwrap();
        assert_eq!(report.duration, 0.1);
        assert!(report.examples.is_empty());
        assert!(report.all_passed());
    }

    #[test]
    fn failed_line_numbers_dedupes_and_orders() {
        let stdout = br#"{"duration":0.5,"examples":[
            {"status":"failed","line_number":22,"full_description":"c"},
            {"status":"failed","line_number":7,"full_description":"a"},
            {"status":"passed","line_number":10,"full_description":"b"},
            {"status":"failed","line_number":7,"full_description":"a again"},
            {"status":"pending","line_number":31,"full_description":"d"}]}"#;
        // The report spans multiple lines here, so join it up first.
        let joined: Vec<u8> = stdout.iter().copied().filter(|&b| b != b'\n').collect();
        let report = SpecReport::from_stdout(&joined).unwrap();
        assert_eq!(report.failed_line_numbers(), btreeset! {7, 22});
    }

    #[test]
    fn pending_examples_do_not_fail() {
        let stdout =
            br#"{"duration":0.2,"examples":[{"status":"pending","line_number":3,"full_description":"later"}]}"#;
        let report = SpecReport::from_stdout(stdout).unwrap();
        assert!(report.all_passed());
        assert!(report.failed_line_numbers().is_empty());
    }

    #[test]
    fn empty_output_is_an_error() {
        let error = SpecReport::from_stdout(b"  \n\n ").unwrap_err();
        assert!(matches!(error, ReportParseError::EmptyOutput));
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let error = SpecReport::from_stdout(b"5 examples, 1 failure\n").unwrap_err();
        match error {
            ReportParseError::Json { line, .. } => {
                assert_eq!(line, "5 examples, 1 failure");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
