// Copyright (c) The respec Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The spec runner.
//!
//! The main structure in this module is [`SpecRunner`]. It runs every file in
//! a [`SpecList`] to a terminal state: files are admitted to a pool of worker
//! slots, each slot drives one file through its attempts (the slot is held
//! for retries), and a single dispatcher task owns all shared state,
//! consuming per-slot events over a channel and forwarding [`SpecEvent`]s to
//! the caller's callback.

use crate::{
    errors::{AttemptError, SpecRunnerBuildError},
    exec::{AttemptStatus, SpecExecutor, SpecFramework},
    list::{SpecFile, SpecList},
    report::SpecReport,
    reporter::{SpecEvent, SpecEventKind},
    results::{FileRunStatuses, RunStats, SuiteResults},
    state::{AttemptDisposition, AttemptScope, FileRun, RetryData, RetryPolicy},
    time::{stopwatch, StopwatchStart},
};
use async_scoped::TokioScope;
use chrono::Local;
use futures::prelude::*;
use std::{convert::Infallible, marker::PhantomData};
use tokio::{runtime::Runtime, sync::mpsc::UnboundedSender};
use tracing::debug;
use uuid::Uuid;

/// The number of worker slots to run spec files under.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum WorkerCount {
    /// Derive the count from available parallelism, leaving one CPU free for
    /// the orchestrator itself.
    #[default]
    Auto,

    /// Use this exact count.
    Count(usize),
}

impl WorkerCount {
    /// Computes the actual worker count. Always at least 1.
    pub fn compute(self) -> usize {
        match self {
            Self::Auto => std::thread::available_parallelism()
                .map(|count| count.get().saturating_sub(1))
                .unwrap_or(1)
                .max(1),
            Self::Count(count) => count.max(1),
        }
    }
}

/// Spec runner options.
#[derive(Debug, Default)]
pub struct SpecRunnerBuilder {
    retries: Option<usize>,
    worker_count: Option<WorkerCount>,
}

impl SpecRunnerBuilder {
    /// Sets the number of retries for failing files.
    pub fn set_retries(&mut self, retries: usize) -> &mut Self {
        self.retries = Some(retries);
        self
    }

    /// Sets the number of files to run simultaneously.
    pub fn set_worker_count(&mut self, worker_count: WorkerCount) -> &mut Self {
        self.worker_count = Some(worker_count);
        self
    }

    /// Creates a new spec runner.
    pub fn build<'a>(
        self,
        spec_list: &'a SpecList,
        framework: &'a SpecFramework,
    ) -> Result<SpecRunner<'a>, SpecRunnerBuildError> {
        if spec_list.is_empty() {
            return Err(SpecRunnerBuildError::NoSpecFiles);
        }
        let worker_count = self.worker_count.unwrap_or_default().compute();
        let retry_policy = self
            .retries
            .map_or_else(RetryPolicy::default, RetryPolicy::new);
        let runtime = Runtime::new().map_err(SpecRunnerBuildError::TokioRuntimeCreate)?;

        Ok(SpecRunner {
            inner: SpecRunnerInner {
                worker_count,
                retry_policy,
                spec_list,
                framework,
                runtime,
                run_id: Uuid::new_v4(),
            },
        })
    }
}

/// Context for running spec files.
///
/// Created using [`SpecRunnerBuilder::build`].
#[derive(Debug)]
pub struct SpecRunner<'a> {
    inner: SpecRunnerInner<'a>,
}

impl<'a> SpecRunner<'a> {
    /// Runs every file to a terminal state, calling back with each event.
    pub fn execute<F>(&mut self, mut callback: F) -> RunSummary
    where
        F: FnMut(SpecEvent<'a>) + Send,
    {
        self.try_execute::<Infallible, _>(|event| {
            callback(event);
            Ok(())
        })
        .expect("Err branch is infallible")
    }

    /// Runs every file to a terminal state.
    ///
    /// Accepts a callback that is called with each event. If the callback
    /// returns an error, the run still completes (there is no cancellation
    /// path), and the first error is returned at the end.
    pub fn try_execute<E, F>(&mut self, callback: F) -> Result<RunSummary, E>
    where
        F: FnMut(SpecEvent<'a>) -> Result<(), E> + Send,
        E: Send,
    {
        self.inner.try_execute(callback)
    }
}

/// The outcome of a completed run: final counters plus per-file results.
#[derive(Clone, Debug)]
pub struct RunSummary {
    /// Final counters for the run.
    pub stats: RunStats,

    /// Accumulated per-file results.
    pub results: SuiteResults,
}

#[derive(Debug)]
struct SpecRunnerInner<'a> {
    worker_count: usize,
    retry_policy: RetryPolicy,
    spec_list: &'a SpecList,
    framework: &'a SpecFramework,
    runtime: Runtime,
    run_id: Uuid,
}

impl<'a> SpecRunnerInner<'a> {
    fn try_execute<E, F>(&self, callback: F) -> Result<RunSummary, E>
    where
        F: FnMut(SpecEvent<'a>) -> Result<(), E> + Send,
        E: Send,
    {
        let mut ctx = CallbackContext::new(callback, self.run_id, self.spec_list.run_count());
        ctx.run_started(self.spec_list)?;

        let mut first_error = None;
        {
            let ctx_mut = &mut ctx;
            let first_error_mut = &mut first_error;

            let _guard = self.runtime.enter();

            TokioScope::scope_and_block(move |scope| {
                let (run_sender, mut run_receiver) = tokio::sync::mpsc::unbounded_channel();

                {
                    let run_fut = futures::stream::iter(self.spec_list.iter())
                        .map(move |spec_file| {
                            let this_run_sender = run_sender.clone();
                            async move {
                                self.run_spec(spec_file, &this_run_sender).await;
                            }
                        })
                        // buffer_unordered admits at most worker_count files
                        // at a time; a file's slot is held across all of its
                        // attempts, retries included.
                        .buffer_unordered(self.worker_count)
                        .collect::<()>();

                    // Run the stream to completion. Dropping the stream drops
                    // the last sender, which ends the receiver loop below.
                    scope.spawn_cancellable(run_fut, || ());
                }

                let exec_fut = async move {
                    while let Some(internal_event) = run_receiver.recv().await {
                        if let Err(error) = ctx_mut.handle_event(internal_event) {
                            if first_error_mut.is_none() {
                                *first_error_mut = Some(error);
                            }
                        }
                    }
                };

                // Read events from the receiver to completion.
                scope.spawn_cancellable(exec_fut, || ());
            });
        }

        match ctx.run_finished() {
            Ok(()) => {}
            Err(error) => {
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }

        match first_error {
            None => Ok(ctx.into_summary()),
            Some(error) => Err(error),
        }
    }

    /// Drives one spec file to a terminal state within its worker slot.
    async fn run_spec(
        &self,
        spec_file: &'a SpecFile,
        run_sender: &UnboundedSender<InternalSpecEvent<'a>>,
    ) {
        let executor = SpecExecutor::new(self.framework, self.run_id);
        let mut file_run = FileRun::new(self.retry_policy);
        let mut retry_data = file_run.start();
        let mut scope = AttemptScope::WholeFile;
        let mut statuses = Vec::new();

        let _ = run_sender.send(InternalSpecEvent::Started { spec_file });

        loop {
            match executor.run_attempt(spec_file, retry_data, &scope).await {
                Ok(status) => {
                    match file_run.on_attempt_complete(status.process_succeeded, &status.report) {
                        AttemptDisposition::Retry {
                            retry_data: next_retry_data,
                            scope: next_scope,
                        } => {
                            debug!(
                                spec_file = %spec_file.path(),
                                attempt = next_retry_data.attempt,
                                "retrying failed spec file"
                            );
                            let _ = run_sender.send(InternalSpecEvent::Retrying {
                                spec_file,
                                retry_data: next_retry_data,
                                scope: next_scope.clone(),
                                failed_attempt: status.clone(),
                            });
                            statuses.push(status);
                            retry_data = next_retry_data;
                            scope = next_scope;
                        }
                        AttemptDisposition::Succeeded | AttemptDisposition::Failed => {
                            statuses.push(status);
                            let _ = run_sender.send(InternalSpecEvent::Finished {
                                spec_file,
                                run_statuses: FileRunStatuses::new(statuses),
                            });
                            break;
                        }
                    }
                }
                Err(error) => {
                    // A hard error halts the file: no retry, and a terminal
                    // state distinct from an ordinary failure.
                    debug!(
                        spec_file = %spec_file.path(),
                        %error,
                        "spec file halted by hard error"
                    );
                    file_run.on_error();
                    let last_report = statuses
                        .last()
                        .map(|status: &AttemptStatus| status.report.clone());
                    let _ = run_sender.send(InternalSpecEvent::Errored {
                        spec_file,
                        error,
                        last_report,
                    });
                    break;
                }
            }
        }
    }
}

/// Owns all shared run state. Exactly one of these exists per run, and only
/// the dispatcher task touches it, so no locking is needed.
struct CallbackContext<F, E> {
    callback: F,
    run_id: Uuid,
    stopwatch: StopwatchStart,
    run_stats: RunStats,
    results: SuiteResults,
    running: usize,
    phantom: PhantomData<E>,
}

impl<'a, F, E> CallbackContext<F, E>
where
    F: FnMut(SpecEvent<'a>) -> Result<(), E> + Send,
{
    fn new(callback: F, run_id: Uuid, initial_run_count: usize) -> Self {
        Self {
            callback,
            run_id,
            stopwatch: stopwatch(),
            run_stats: RunStats {
                initial_run_count,
                ..RunStats::default()
            },
            results: SuiteResults::default(),
            running: 0,
            phantom: PhantomData,
        }
    }

    fn run_started(&mut self, spec_list: &'a SpecList) -> Result<(), E> {
        let run_id = self.run_id;
        self.emit(SpecEventKind::RunStarted { spec_list, run_id })
    }

    fn handle_event(&mut self, event: InternalSpecEvent<'a>) -> Result<(), E> {
        match event {
            InternalSpecEvent::Started { spec_file } => {
                self.running += 1;
                let (current_stats, running) = (self.run_stats, self.running);
                self.emit(SpecEventKind::FileStarted {
                    spec_file,
                    current_stats,
                    running,
                })
            }
            InternalSpecEvent::Retrying {
                spec_file,
                retry_data,
                scope,
                failed_attempt,
            } => self.emit(SpecEventKind::FileRetryStarted {
                spec_file,
                retry_data,
                scope,
                failed_attempt,
            }),
            InternalSpecEvent::Finished {
                spec_file,
                run_statuses,
            } => {
                self.running -= 1;
                self.run_stats.on_file_finished(&run_statuses);
                self.results.record_finished(spec_file, &run_statuses);
                let (current_stats, running) = (self.run_stats, self.running);
                self.emit(SpecEventKind::FileFinished {
                    spec_file,
                    run_statuses,
                    current_stats,
                    running,
                })
            }
            InternalSpecEvent::Errored {
                spec_file,
                error,
                last_report,
            } => {
                self.running -= 1;
                self.run_stats.on_file_errored();
                self.results
                    .record_errored(spec_file, error.clone(), last_report.clone());
                let (current_stats, running) = (self.run_stats, self.running);
                self.emit(SpecEventKind::FileErrored {
                    spec_file,
                    error,
                    last_report,
                    current_stats,
                    running,
                })
            }
        }
    }

    fn run_finished(&mut self) -> Result<(), E> {
        let snapshot = self.stopwatch.snapshot();
        let (run_id, run_stats) = (self.run_id, self.run_stats);
        (self.callback)(SpecEvent {
            timestamp: Local::now(),
            elapsed: snapshot.duration,
            kind: SpecEventKind::RunFinished {
                run_id,
                start_time: snapshot.start_time,
                elapsed: snapshot.duration,
                run_stats,
            },
        })
    }

    fn emit(&mut self, kind: SpecEventKind<'a>) -> Result<(), E> {
        let snapshot = self.stopwatch.snapshot();
        (self.callback)(SpecEvent {
            timestamp: Local::now(),
            elapsed: snapshot.duration,
            kind,
        })
    }

    fn into_summary(self) -> RunSummary {
        RunSummary {
            stats: self.run_stats,
            results: self.results,
        }
    }
}

#[derive(Debug)]
enum InternalSpecEvent<'a> {
    Started {
        spec_file: &'a SpecFile,
    },
    Retrying {
        spec_file: &'a SpecFile,
        retry_data: RetryData,
        scope: AttemptScope,
        failed_attempt: AttemptStatus,
    },
    Finished {
        spec_file: &'a SpecFile,
        run_statuses: FileRunStatuses,
    },
    Errored {
        spec_file: &'a SpecFile,
        error: AttemptError,
        last_report: Option<SpecReport>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use pretty_assertions::assert_eq;

    #[test]
    fn worker_count_is_at_least_one() {
        assert_eq!(WorkerCount::Count(0).compute(), 1);
        assert_eq!(WorkerCount::Count(4).compute(), 4);
        assert!(WorkerCount::Auto.compute() >= 1);
    }

    #[test]
    fn empty_list_fails_to_build() {
        let spec_list = SpecList::new(Vec::<Utf8PathBuf>::new());
        let framework = SpecFramework::new(SpecFramework::DEFAULT_PROGRAM);
        let result = SpecRunnerBuilder::default().build(&spec_list, &framework);
        assert!(matches!(result, Err(SpecRunnerBuildError::NoSpecFiles)));
    }
}
