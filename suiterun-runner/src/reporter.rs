// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The reporter seam.
//!
//! Everything that observes a run, live consoles, file writers, the wire
//! emitter, implements [`Reporter`]. Callbacks receive the live
//! [`ReportTree`] plus indices into it, so reporters read current state
//! without holding references across mutations.

use crate::report::{ReportTree, StepIndex, TestIndex};
use suiterun_protocol::{ErrorDetails, FullResult};

/// Observes the lifecycle of a run. All methods default to no-ops.
pub trait Reporter: Send {
    /// The run started; the tree holds the full listed structure.
    fn on_begin(&mut self, tree: &ReportTree) {
        let _ = tree;
    }

    /// A test attempt started. `attempt` indexes the test's results.
    fn on_test_begin(&mut self, tree: &ReportTree, test: TestIndex, attempt: usize) {
        let _ = (tree, test, attempt);
    }

    /// A step started within an attempt.
    fn on_step_begin(&mut self, tree: &ReportTree, test: TestIndex, attempt: usize, step: StepIndex) {
        let _ = (tree, test, attempt, step);
    }

    /// A step finished.
    fn on_step_end(&mut self, tree: &ReportTree, test: TestIndex, attempt: usize, step: StepIndex) {
        let _ = (tree, test, attempt, step);
    }

    /// A test attempt finished.
    fn on_test_end(&mut self, tree: &ReportTree, test: TestIndex, attempt: usize) {
        let _ = (tree, test, attempt);
    }

    /// A chunk of stdout was produced, attributed to an attempt when known.
    fn on_std_out(
        &mut self,
        tree: &ReportTree,
        chunk: &[u8],
        test: Option<TestIndex>,
        attempt: Option<usize>,
    ) {
        let _ = (tree, chunk, test, attempt);
    }

    /// A chunk of stderr was produced, attributed to an attempt when known.
    fn on_std_err(
        &mut self,
        tree: &ReportTree,
        chunk: &[u8],
        test: Option<TestIndex>,
        attempt: Option<usize>,
    ) {
        let _ = (tree, chunk, test, attempt);
    }

    /// A run-level error not attributable to a single test.
    fn on_error(&mut self, error: &ErrorDetails) {
        let _ = error;
    }

    /// The run finished.
    fn on_end(&mut self, tree: &ReportTree, result: &FullResult) {
        let _ = (tree, result);
    }

    /// All reporting is complete; flush and shut down.
    fn on_exit(&mut self) {}
}

/// A reporter that does nothing. Stands in where a run needs no observer.
#[derive(Debug, Default)]
pub struct NoopReporter;

impl Reporter for NoopReporter {}

/// Fans every callback out to a list of reporters, in order.
#[derive(Default)]
pub struct Multiplexer {
    reporters: Vec<Box<dyn Reporter>>,
}

impl Multiplexer {
    /// Creates an empty multiplexer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a reporter to the end of the fan-out list.
    pub fn add(&mut self, reporter: Box<dyn Reporter>) {
        self.reporters.push(reporter);
    }
}

impl Reporter for Multiplexer {
    fn on_begin(&mut self, tree: &ReportTree) {
        for r in &mut self.reporters {
            r.on_begin(tree);
        }
    }

    fn on_test_begin(&mut self, tree: &ReportTree, test: TestIndex, attempt: usize) {
        for r in &mut self.reporters {
            r.on_test_begin(tree, test, attempt);
        }
    }

    fn on_step_begin(&mut self, tree: &ReportTree, test: TestIndex, attempt: usize, step: StepIndex) {
        for r in &mut self.reporters {
            r.on_step_begin(tree, test, attempt, step);
        }
    }

    fn on_step_end(&mut self, tree: &ReportTree, test: TestIndex, attempt: usize, step: StepIndex) {
        for r in &mut self.reporters {
            r.on_step_end(tree, test, attempt, step);
        }
    }

    fn on_test_end(&mut self, tree: &ReportTree, test: TestIndex, attempt: usize) {
        for r in &mut self.reporters {
            r.on_test_end(tree, test, attempt);
        }
    }

    fn on_std_out(
        &mut self,
        tree: &ReportTree,
        chunk: &[u8],
        test: Option<TestIndex>,
        attempt: Option<usize>,
    ) {
        for r in &mut self.reporters {
            r.on_std_out(tree, chunk, test, attempt);
        }
    }

    fn on_std_err(
        &mut self,
        tree: &ReportTree,
        chunk: &[u8],
        test: Option<TestIndex>,
        attempt: Option<usize>,
    ) {
        for r in &mut self.reporters {
            r.on_std_err(tree, chunk, test, attempt);
        }
    }

    fn on_error(&mut self, error: &ErrorDetails) {
        for r in &mut self.reporters {
            r.on_error(error);
        }
    }

    fn on_end(&mut self, tree: &ReportTree, result: &FullResult) {
        for r in &mut self.reporters {
            r.on_end(tree, result);
        }
    }

    fn on_exit(&mut self) {
        for r in &mut self.reporters {
            r.on_exit();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Records a one-line trace of every callback, for assertions.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingReporter {
        pub(crate) trace: Vec<String>,
    }

    impl Reporter for RecordingReporter {
        fn on_begin(&mut self, _tree: &ReportTree) {
            self.trace.push("begin".to_owned());
        }

        fn on_test_begin(&mut self, tree: &ReportTree, test: TestIndex, attempt: usize) {
            self.trace
                .push(format!("test-begin {} #{attempt}", tree.test(test).id));
        }

        fn on_step_begin(
            &mut self,
            tree: &ReportTree,
            test: TestIndex,
            attempt: usize,
            step: StepIndex,
        ) {
            let title = &tree.test(test).results[attempt].steps[step.0].title;
            self.trace.push(format!("step-begin {title}"));
        }

        fn on_step_end(
            &mut self,
            tree: &ReportTree,
            test: TestIndex,
            attempt: usize,
            step: StepIndex,
        ) {
            let title = &tree.test(test).results[attempt].steps[step.0].title;
            self.trace.push(format!("step-end {title}"));
        }

        fn on_test_end(&mut self, tree: &ReportTree, test: TestIndex, attempt: usize) {
            let node = tree.test(test);
            self.trace.push(format!(
                "test-end {} #{attempt} {}",
                node.id, node.results[attempt].status
            ));
        }

        fn on_std_out(
            &mut self,
            _tree: &ReportTree,
            chunk: &[u8],
            _test: Option<TestIndex>,
            _attempt: Option<usize>,
        ) {
            self.trace
                .push(format!("stdout {}", String::from_utf8_lossy(chunk)));
        }

        fn on_std_err(
            &mut self,
            _tree: &ReportTree,
            chunk: &[u8],
            _test: Option<TestIndex>,
            _attempt: Option<usize>,
        ) {
            self.trace
                .push(format!("stderr {}", String::from_utf8_lossy(chunk)));
        }

        fn on_error(&mut self, error: &ErrorDetails) {
            self.trace.push(format!(
                "error {}",
                error.message.as_deref().unwrap_or("<no message>")
            ));
        }

        fn on_end(&mut self, _tree: &ReportTree, result: &FullResult) {
            self.trace.push(format!("end {}", result.status));
        }

        fn on_exit(&mut self) {
            self.trace.push("exit".to_owned());
        }
    }
}
