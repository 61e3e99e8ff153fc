// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordered, cancellable execution of a run's tasks.
//!
//! A run is a list of named [`Task`]s executed strictly in order. Each task
//! body races against two cancellation sources, interrupt signals and the
//! global deadline. Once the main pass ends, for any reason, the teardowns
//! of every reached task run in reverse order, bounded by the same deadline.

use crate::reporter::Reporter;
use crate::signal::DebouncedInterrupts;
use crate::time::Deadline;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use suiterun_protocol::{ErrorDetails, RunStatus};
use tracing::debug;

/// One unit of run work.
///
/// `setup` performs the task's work; `teardown` undoes it. Both report
/// through the supplied [`Reporter`] and surface a single fatal error
/// through their return value.
pub trait Task<C>: Send {
    /// Performs the task.
    fn setup<'a>(
        &'a mut self,
        cx: &'a mut C,
        reporter: &'a mut dyn Reporter,
    ) -> BoxFuture<'a, Result<(), ErrorDetails>>;

    /// Undoes the task. Runs in the teardown pass whether or not `setup`
    /// succeeded, as long as the orchestrator reached this task.
    fn teardown<'a>(
        &'a mut self,
        cx: &'a mut C,
        reporter: &'a mut dyn Reporter,
    ) -> BoxFuture<'a, Result<(), ErrorDetails>> {
        let _ = (cx, reporter);
        Box::pin(async { Ok(()) })
    }
}

/// Wraps a closure as a setup-only [`Task`].
pub struct FnTask<F> {
    f: F,
}

/// Creates a setup-only task from a closure.
pub fn fn_task<C, F>(f: F) -> FnTask<F>
where
    F: for<'a> FnMut(&'a mut C) -> BoxFuture<'a, Result<(), ErrorDetails>> + Send,
{
    FnTask { f }
}

impl<C, F> Task<C> for FnTask<F>
where
    F: for<'a> FnMut(&'a mut C) -> BoxFuture<'a, Result<(), ErrorDetails>> + Send,
{
    fn setup<'a>(
        &'a mut self,
        cx: &'a mut C,
        _reporter: &'a mut dyn Reporter,
    ) -> BoxFuture<'a, Result<(), ErrorDetails>> {
        (self.f)(cx)
    }
}

struct NamedTask<C> {
    name: String,
    task: Box<dyn Task<C>>,
}

enum TaskOutcome {
    Interrupted,
    DeadlineExpired,
    Finished(Result<(), ErrorDetails>),
}

/// Runs a list of named tasks in order with cancellation and teardown.
pub struct TaskOrchestrator<C> {
    tasks: Vec<NamedTask<C>>,
    interrupt_flag: Arc<AtomicBool>,
}

impl<C> Default for TaskOrchestrator<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> TaskOrchestrator<C> {
    /// Creates an empty orchestrator.
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            interrupt_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Appends a named task.
    pub fn add_task(&mut self, name: impl Into<String>, task: impl Task<C> + 'static) {
        self.tasks.push(NamedTask {
            name: name.into(),
            task: Box::new(task),
        });
    }

    /// The cooperative interruption flag, set once an interrupt is accepted.
    /// Long-running collaborators poll it to wind down early.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt_flag)
    }

    /// Runs the main pass and then the teardown pass.
    ///
    /// Returns the run status with precedence
    /// interrupted > timedOut > failed > passed: a cancellation source
    /// winning the race against a task body takes priority over whatever
    /// that task would have reported. Teardown failures are reported but
    /// never change the returned status.
    pub async fn run(
        &mut self,
        cx: &mut C,
        deadline: Deadline,
        interrupts: &mut DebouncedInterrupts,
        reporter: &mut dyn Reporter,
    ) -> RunStatus {
        let mut status = RunStatus::Passed;
        let mut started: Vec<usize> = Vec::new();

        if deadline.has_expired() {
            reporter.on_error(&ErrorDetails::from_message(
                "global timeout elapsed before the run started",
            ));
            status = RunStatus::TimedOut;
        } else {
            for index in 0..self.tasks.len() {
                started.push(index);
                let entry = &mut self.tasks[index];
                debug!(task = %entry.name, "starting task");
                let outcome = {
                    let task = entry.task.as_mut();
                    tokio::select! {
                        biased;
                        _ = next_interrupt(interrupts) => TaskOutcome::Interrupted,
                        () = deadline.expired() => TaskOutcome::DeadlineExpired,
                        result = task.setup(cx, reporter) => TaskOutcome::Finished(result),
                    }
                };
                match outcome {
                    TaskOutcome::Interrupted => {
                        self.interrupt_flag.store(true, Ordering::SeqCst);
                        status = RunStatus::Interrupted;
                        break;
                    }
                    TaskOutcome::DeadlineExpired => {
                        let name = self.tasks[index].name.clone();
                        reporter.on_error(&ErrorDetails::from_message(format!(
                            "global timeout elapsed while running task `{name}`"
                        )));
                        status = RunStatus::TimedOut;
                        break;
                    }
                    TaskOutcome::Finished(Ok(())) => {}
                    TaskOutcome::Finished(Err(error)) => {
                        reporter.on_error(&error);
                        status = RunStatus::Failed;
                        break;
                    }
                }
            }
        }

        // Teardown pass: reached tasks unwind in reverse order, bounded by
        // the same deadline as the main pass.
        for &index in started.iter().rev() {
            if deadline.has_expired() {
                let name = self.tasks[index].name.clone();
                reporter.on_error(&ErrorDetails::from_message(format!(
                    "global timeout elapsed before teardown of task `{name}`"
                )));
                break;
            }
            let entry = &mut self.tasks[index];
            debug!(task = %entry.name, "tearing down task");
            let outcome = {
                let task = entry.task.as_mut();
                tokio::select! {
                    biased;
                    () = deadline.expired() => None,
                    result = task.teardown(cx, reporter) => Some(result),
                }
            };
            match outcome {
                None => {
                    let name = self.tasks[index].name.clone();
                    reporter.on_error(&ErrorDetails::from_message(format!(
                        "global timeout elapsed during teardown of task `{name}`"
                    )));
                    break;
                }
                Some(Err(error)) => reporter.on_error(&error),
                Some(Ok(())) => {}
            }
        }

        status
    }
}

async fn next_interrupt(interrupts: &mut DebouncedInterrupts) -> crate::signal::InterruptEvent {
    match interrupts.recv().await {
        Some(event) => event,
        // An exhausted source must not win the race.
        None => std::future::pending().await,
    }
}
