// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The live report tree: suites, test cases, attempts and steps.
//!
//! Nodes are arena-allocated and addressed by index, so the tree can be
//! mutated incrementally by the event receiver while reporters hold on to
//! indices. Suite and test objects are created on first reference and
//! mutated in place afterwards; they are removed only by an explicit
//! list-mode [`prune`](ReportTree::prune).

use crate::projects::ProjectConfig;
use std::collections::{HashMap, HashSet};
use suiterun_protocol::{
    Annotation, Attachment, ErrorDetails, Location, ParallelMode, ProjectId, ResultId, StepId,
    SuiteId, TestId, TestStatus,
};

/// Index of a suite node within a [`ReportTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SuiteIndex(pub(crate) usize);

/// Index of a test node within a [`ReportTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TestIndex(pub(crate) usize);

/// Index of a step within one test result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StepIndex(pub(crate) usize);

/// The kind of a suite node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuiteNodeKind {
    /// The synthetic root of the tree.
    Root,
    /// A project suite directly under the root.
    Project,
    /// A test file.
    File,
    /// A describe block.
    Describe,
}

/// One entry of a suite, in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuiteEntry {
    /// A child suite.
    Suite(SuiteIndex),
    /// A child test.
    Test(TestIndex),
}

/// Project data attached to a project suite.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectInfo {
    /// The stable wire id of the project.
    pub id: ProjectId,
    /// The resolved project configuration.
    pub config: ProjectConfig,
}

/// A suite node.
#[derive(Clone, Debug, PartialEq)]
pub struct SuiteNode {
    /// Suite title. Empty for the root; the project name for project
    /// suites; the root-relative file path for file suites.
    pub title: String,
    /// The node kind.
    pub kind: SuiteNodeKind,
    /// Stable wire id, when the suite came from the wire.
    pub wire_id: Option<SuiteId>,
    /// Location of the suite declaration.
    pub location: Option<Location>,
    /// Scheduling mode for entries of this suite.
    pub parallel_mode: ParallelMode,
    /// Project data, present on project suites only.
    pub project: Option<ProjectInfo>,
    pub(crate) entries: Vec<SuiteEntry>,
    pub(crate) parent: Option<SuiteIndex>,
}

/// A test case.
#[derive(Clone, Debug, PartialEq)]
pub struct TestNode {
    /// Stable test id; the same across all retries within a run.
    pub id: TestId,
    /// Test title.
    pub title: String,
    /// Location of the test declaration.
    pub location: Location,
    /// Retry budget.
    pub retries: u32,
    /// Which repetition of the test this is.
    pub repeat_each_index: u32,
    /// Annotations on the test.
    pub annotations: Vec<Annotation>,
    /// Tags on the test.
    pub tags: Vec<String>,
    /// The status the test is expected to finish with.
    pub expected_status: TestStatus,
    /// Effective timeout in milliseconds.
    pub timeout: f64,
    /// One result per attempt, in attempt order.
    pub results: Vec<TestResult>,
    pub(crate) parent: SuiteIndex,
}

impl TestNode {
    /// Appends a new result for the next attempt and returns its index
    /// within [`TestNode::results`].
    pub fn create_result(&mut self, id: ResultId) -> usize {
        let retry = self.results.len() as u32;
        self.results.push(TestResult::new(id, retry));
        self.results.len() - 1
    }

    /// Finds a result by its wire id.
    pub fn result_index_by_id(&self, id: &ResultId) -> Option<usize> {
        self.results.iter().position(|r| &r.id == id)
    }
}

/// The transient scheduling state of a result, distinct from its terminal
/// status so progress UIs can show in-flight attempts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransientStatus {
    /// Assigned to a worker but not yet started.
    #[default]
    Scheduled,
    /// Currently executing.
    Running,
    /// Finished; the terminal [`TestStatus`] is now meaningful.
    Finished,
}

/// One attempt of a test case.
#[derive(Clone, Debug, PartialEq)]
pub struct TestResult {
    /// Wire-assigned result id.
    pub id: ResultId,
    /// Zero-based retry index.
    pub retry: u32,
    /// Index of the worker process that ran the attempt.
    pub worker_index: i64,
    /// Index of the parallel slot the attempt occupied.
    pub parallel_index: i64,
    /// Wall-clock start time, epoch milliseconds.
    pub start_time: f64,
    /// Duration in milliseconds, -1 while in flight.
    pub duration: f64,
    /// Terminal status. Meaningful once `transient` is `Finished`.
    pub status: TestStatus,
    /// Transient scheduling state.
    pub transient: TransientStatus,
    /// Errors produced by the attempt.
    pub errors: Vec<ErrorDetails>,
    /// Attachments produced by the attempt.
    pub attachments: Vec<Attachment>,
    /// Captured stdout chunks.
    pub stdout: Vec<Vec<u8>>,
    /// Captured stderr chunks.
    pub stderr: Vec<Vec<u8>>,
    /// Step arena for this attempt.
    pub steps: Vec<TestStep>,
    pub(crate) root_steps: Vec<StepIndex>,
    pub(crate) step_lookup: HashMap<StepId, StepIndex>,
}

impl TestResult {
    fn new(id: ResultId, retry: u32) -> Self {
        Self {
            id,
            retry,
            worker_index: -1,
            parallel_index: -1,
            start_time: 0.0,
            duration: -1.0,
            status: TestStatus::Skipped,
            transient: TransientStatus::Scheduled,
            errors: Vec::new(),
            attachments: Vec::new(),
            stdout: Vec::new(),
            stderr: Vec::new(),
            steps: Vec::new(),
            root_steps: Vec::new(),
            step_lookup: HashMap::new(),
        }
    }

    /// Adds a step, nesting it under `parent` when given. Returns the step's
    /// index.
    pub fn add_step(&mut self, step: TestStep) -> StepIndex {
        let index = StepIndex(self.steps.len());
        self.step_lookup.insert(step.id.clone(), index);
        match step.parent {
            Some(parent) => self.steps[parent.0].children.push(index),
            None => self.root_steps.push(index),
        }
        self.steps.push(step);
        index
    }

    /// Looks up a step by wire id.
    pub fn step_index_by_id(&self, id: &StepId) -> Option<StepIndex> {
        self.step_lookup.get(id).copied()
    }

    /// Top-level steps of this attempt.
    pub fn root_steps(&self) -> &[StepIndex] {
        &self.root_steps
    }
}

/// A step within a test attempt.
#[derive(Clone, Debug, PartialEq)]
pub struct TestStep {
    /// Wire-assigned step id.
    pub id: StepId,
    /// Parent step, for nested steps.
    pub parent: Option<StepIndex>,
    /// Step title.
    pub title: String,
    /// Step category.
    pub category: String,
    /// Location the step originates from.
    pub location: Option<Location>,
    /// Wall-clock start time, epoch milliseconds.
    pub start_time: f64,
    /// Duration in milliseconds, -1 while in flight.
    pub duration: f64,
    /// Error the step finished with, if any.
    pub error: Option<ErrorDetails>,
    pub(crate) children: Vec<StepIndex>,
}

/// The reporting-level classification of a test case, derived from its
/// per-attempt statuses and expected status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Every attempt was skipped or interrupted.
    Skipped,
    /// Every counted attempt matched the expected status.
    Expected,
    /// Some counted attempts matched the expected status, some didn't.
    Flaky,
    /// No counted attempt matched the expected status.
    Unexpected,
}

/// The live report tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReportTree {
    suites: Vec<SuiteNode>,
    tests: Vec<TestNode>,
}

impl ReportTree {
    /// Creates a tree containing just the root suite.
    pub fn new() -> Self {
        let mut tree = Self {
            suites: Vec::new(),
            tests: Vec::new(),
        };
        tree.suites.push(SuiteNode {
            title: String::new(),
            kind: SuiteNodeKind::Root,
            wire_id: None,
            location: None,
            parallel_mode: ParallelMode::None,
            project: None,
            entries: Vec::new(),
            parent: None,
        });
        tree
    }

    /// The root suite.
    pub fn root(&self) -> SuiteIndex {
        SuiteIndex(0)
    }

    /// Borrows a suite node.
    pub fn suite(&self, index: SuiteIndex) -> &SuiteNode {
        &self.suites[index.0]
    }

    /// Mutably borrows a suite node.
    pub fn suite_mut(&mut self, index: SuiteIndex) -> &mut SuiteNode {
        &mut self.suites[index.0]
    }

    /// Borrows a test node.
    pub fn test(&self, index: TestIndex) -> &TestNode {
        &self.tests[index.0]
    }

    /// Mutably borrows a test node.
    pub fn test_mut(&mut self, index: TestIndex) -> &mut TestNode {
        &mut self.tests[index.0]
    }

    /// Appends a new suite under `parent`.
    pub fn add_suite(&mut self, parent: SuiteIndex, mut suite: SuiteNode) -> SuiteIndex {
        let index = SuiteIndex(self.suites.len());
        suite.parent = Some(parent);
        self.suites.push(suite);
        self.suites[parent.0].entries.push(SuiteEntry::Suite(index));
        index
    }

    /// Appends a new test under `parent`.
    pub fn add_test(&mut self, parent: SuiteIndex, mut test: TestNode) -> TestIndex {
        let index = TestIndex(self.tests.len());
        test.parent = parent;
        self.tests.push(test);
        self.suites[parent.0].entries.push(SuiteEntry::Test(index));
        index
    }

    /// Entries of a suite, in declaration order.
    pub fn entries(&self, suite: SuiteIndex) -> &[SuiteEntry] {
        &self.suites[suite.0].entries
    }

    /// Child suites of a suite, in declaration order.
    pub fn child_suites(&self, suite: SuiteIndex) -> impl Iterator<Item = SuiteIndex> + '_ {
        self.suites[suite.0].entries.iter().filter_map(|e| match e {
            SuiteEntry::Suite(s) => Some(*s),
            SuiteEntry::Test(_) => None,
        })
    }

    /// Finds a direct child suite by wire id.
    pub fn child_suite_by_wire_id(&self, parent: SuiteIndex, id: &SuiteId) -> Option<SuiteIndex> {
        self.child_suites(parent)
            .find(|&s| self.suite(s).wire_id.as_ref() == Some(id))
    }

    /// Finds a direct child suite by title. Compatibility fallback for wire
    /// payloads without suite ids; id matching is preferred.
    pub fn child_suite_by_title(&self, parent: SuiteIndex, title: &str) -> Option<SuiteIndex> {
        self.child_suites(parent)
            .find(|&s| self.suite(s).title == title)
    }

    /// Finds a project suite by its stable project id.
    pub fn project_suite_by_id(&self, id: &ProjectId) -> Option<SuiteIndex> {
        self.child_suites(self.root()).find(|&s| {
            self.suite(s)
                .project
                .as_ref()
                .is_some_and(|p| &p.id == id)
        })
    }

    /// All tests under a suite, depth-first in declaration order.
    pub fn all_tests(&self, suite: SuiteIndex) -> Vec<TestIndex> {
        let mut result = Vec::new();
        self.collect_tests(suite, &mut result);
        result
    }

    fn collect_tests(&self, suite: SuiteIndex, into: &mut Vec<TestIndex>) {
        for entry in &self.suites[suite.0].entries {
            match entry {
                SuiteEntry::Test(t) => into.push(*t),
                SuiteEntry::Suite(s) => self.collect_tests(*s, into),
            }
        }
    }

    /// The titles from the root down to (and including) this test.
    pub fn title_path(&self, test: TestIndex) -> Vec<String> {
        let mut titles = vec![self.tests[test.0].title.clone()];
        let mut cursor = Some(self.tests[test.0].parent);
        while let Some(suite) = cursor {
            let node = &self.suites[suite.0];
            // Anonymous describe blocks don't contribute a segment.
            if !node.title.is_empty() || node.kind != SuiteNodeKind::Describe {
                titles.push(node.title.clone());
            }
            cursor = node.parent;
        }
        titles.reverse();
        titles
    }

    /// Computes the outcome of a test case.
    ///
    /// Attempts with status `skipped` or `interrupted` are not counted; if
    /// nothing remains the test is `Skipped`. Otherwise the remaining
    /// attempts are compared against the expected status.
    pub fn outcome(&self, test: TestIndex) -> Outcome {
        let test = &self.tests[test.0];
        let mut expected = 0usize;
        let mut unexpected = 0usize;
        for result in &test.results {
            match result.status {
                TestStatus::Skipped | TestStatus::Interrupted => {}
                status if status == test.expected_status => expected += 1,
                _ => unexpected += 1,
            }
        }
        if expected == 0 && unexpected == 0 {
            Outcome::Skipped
        } else if unexpected == 0 {
            Outcome::Expected
        } else if expected == 0 {
            Outcome::Unexpected
        } else {
            Outcome::Flaky
        }
    }

    /// Whether the test's outcome counts as ok.
    pub fn ok(&self, test: TestIndex) -> bool {
        matches!(
            self.outcome(test),
            Outcome::Expected | Outcome::Flaky | Outcome::Skipped
        )
    }

    /// Removes every test and suite (recursively, starting at the root)
    /// whose wire id is not in the given sets. Suites without a wire id
    /// (root and project suites) are always kept.
    ///
    /// Supports list-mode refresh: after a fresh listing is merged in, stale
    /// entries for deleted files disappear without discarding unrelated
    /// history. Orphaned arena slots are left in place; indices held by
    /// callers for retained nodes stay valid.
    pub fn prune(&mut self, keep_suites: &HashSet<SuiteId>, keep_tests: &HashSet<TestId>) {
        self.prune_suite(self.root(), keep_suites, keep_tests);
    }

    fn prune_suite(
        &mut self,
        suite: SuiteIndex,
        keep_suites: &HashSet<SuiteId>,
        keep_tests: &HashSet<TestId>,
    ) {
        let entries = std::mem::take(&mut self.suites[suite.0].entries);
        let mut retained = Vec::with_capacity(entries.len());
        for entry in entries {
            match entry {
                SuiteEntry::Test(t) => {
                    if keep_tests.contains(&self.tests[t.0].id) {
                        retained.push(entry);
                    }
                }
                SuiteEntry::Suite(s) => {
                    let keep = match &self.suites[s.0].wire_id {
                        Some(id) => keep_suites.contains(id),
                        None => true,
                    };
                    if keep {
                        self.prune_suite(s, keep_suites, keep_tests);
                        retained.push(entry);
                    }
                }
            }
        }
        self.suites[suite.0].entries = retained;
    }
}

/// Builds a plain (non-project) suite node.
pub fn suite_node(title: impl Into<String>, kind: SuiteNodeKind) -> SuiteNode {
    SuiteNode {
        title: title.into(),
        kind,
        wire_id: None,
        location: None,
        parallel_mode: ParallelMode::None,
        project: None,
        entries: Vec::new(),
        parent: None,
    }
}

/// Builds a test node with reasonable defaults.
pub fn test_node(id: TestId, title: impl Into<String>, location: Location) -> TestNode {
    TestNode {
        id,
        title: title.into(),
        location,
        retries: 0,
        repeat_each_index: 0,
        annotations: Vec::new(),
        tags: Vec::new(),
        expected_status: TestStatus::Passed,
        timeout: 0.0,
        results: Vec::new(),
        parent: SuiteIndex(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn loc(file: &str) -> Location {
        Location {
            file: file.to_owned(),
            line: 1,
            column: 1,
        }
    }

    fn tree_with_one_test(statuses: &[TestStatus], expected: TestStatus) -> (ReportTree, TestIndex) {
        let mut tree = ReportTree::new();
        let root = tree.root();
        let file = tree.add_suite(root, suite_node("a.spec.ts", SuiteNodeKind::File));
        let test = tree.add_test(file, test_node(TestId::new("t1"), "works", loc("a.spec.ts")));
        tree.test_mut(test).expected_status = expected;
        for (i, status) in statuses.iter().enumerate() {
            let result = tree
                .test_mut(test)
                .create_result(ResultId::new(format!("r{i}")));
            let node = &mut tree.test_mut(test).results[result];
            node.status = *status;
            node.transient = TransientStatus::Finished;
        }
        (tree, test)
    }

    #[test_case(&[TestStatus::Failed, TestStatus::Passed], TestStatus::Passed, Outcome::Flaky; "fail then pass is flaky")]
    #[test_case(&[TestStatus::Skipped], TestStatus::Passed, Outcome::Skipped; "only skipped")]
    #[test_case(&[TestStatus::Failed], TestStatus::Passed, Outcome::Unexpected; "only failed")]
    #[test_case(&[TestStatus::Passed], TestStatus::Passed, Outcome::Expected; "passed as expected")]
    #[test_case(&[TestStatus::Failed], TestStatus::Failed, Outcome::Expected; "failed as expected")]
    #[test_case(&[TestStatus::Interrupted, TestStatus::Passed], TestStatus::Passed, Outcome::Expected; "interrupted attempts are not counted")]
    fn outcome_classification(statuses: &[TestStatus], expected: TestStatus, outcome: Outcome) {
        let (tree, test) = tree_with_one_test(statuses, expected);
        assert_eq!(tree.outcome(test), outcome);
    }

    #[test]
    fn ok_covers_expected_flaky_and_skipped() {
        for (statuses, ok) in [
            (vec![TestStatus::Passed], true),
            (vec![TestStatus::Failed, TestStatus::Passed], true),
            (vec![TestStatus::Skipped], true),
            (vec![TestStatus::Failed], false),
        ] {
            let (tree, test) = tree_with_one_test(&statuses, TestStatus::Passed);
            assert_eq!(tree.ok(test), ok, "statuses: {statuses:?}");
        }
    }

    #[test]
    fn retry_indices_count_up() {
        let mut tree = ReportTree::new();
        let root = tree.root();
        let test = tree.add_test(root, test_node(TestId::new("t1"), "works", loc("a.rs")));
        let test_node = tree.test_mut(test);
        test_node.create_result(ResultId::new("r0"));
        test_node.create_result(ResultId::new("r1"));
        assert_eq!(test_node.results[0].retry, 0);
        assert_eq!(test_node.results[1].retry, 1);
        assert_eq!(test_node.result_index_by_id(&ResultId::new("r1")), Some(1));
    }

    #[test]
    fn steps_nest_under_parents() {
        let mut tree = ReportTree::new();
        let root = tree.root();
        let test = tree.add_test(root, test_node(TestId::new("t1"), "works", loc("a.rs")));
        let index = tree.test_mut(test).create_result(ResultId::new("r0"));
        let result = &mut tree.test_mut(test).results[index];
        let outer = result.add_step(TestStep {
            id: StepId::new("s1"),
            parent: None,
            title: "outer".to_owned(),
            category: "test.step".to_owned(),
            location: None,
            start_time: 0.0,
            duration: -1.0,
            error: None,
            children: Vec::new(),
        });
        let inner = result.add_step(TestStep {
            id: StepId::new("s2"),
            parent: Some(outer),
            title: "inner".to_owned(),
            category: "test.step".to_owned(),
            location: None,
            start_time: 0.0,
            duration: -1.0,
            error: None,
            children: Vec::new(),
        });
        assert_eq!(result.root_steps(), &[outer]);
        assert_eq!(result.steps[outer.0].children, vec![inner]);
        assert_eq!(result.step_index_by_id(&StepId::new("s2")), Some(inner));
    }

    #[test]
    fn prune_removes_stale_entries_only() {
        let mut tree = ReportTree::new();
        let root = tree.root();
        let mut file_a = suite_node("a.spec.ts", SuiteNodeKind::File);
        file_a.wire_id = Some(SuiteId::new("s-a"));
        let file_a = tree.add_suite(root, file_a);
        let mut file_b = suite_node("b.spec.ts", SuiteNodeKind::File);
        file_b.wire_id = Some(SuiteId::new("s-b"));
        let file_b = tree.add_suite(root, file_b);
        let keep_test = tree.add_test(file_a, test_node(TestId::new("t1"), "one", loc("a")));
        tree.add_test(file_a, test_node(TestId::new("t2"), "two", loc("a")));
        tree.add_test(file_b, test_node(TestId::new("t3"), "three", loc("b")));

        let keep_suites = HashSet::from([SuiteId::new("s-a")]);
        let keep_tests = HashSet::from([TestId::new("t1")]);
        tree.prune(&keep_suites, &keep_tests);

        assert_eq!(tree.entries(root), &[SuiteEntry::Suite(file_a)]);
        assert_eq!(tree.entries(file_a), &[SuiteEntry::Test(keep_test)]);
        // The pruned suite's arena slot is orphaned but untouched.
        assert_eq!(tree.suite(file_b).title, "b.spec.ts");
    }

    #[test]
    fn title_path_skips_anonymous_describes() {
        let mut tree = ReportTree::new();
        let root = tree.root();
        let project = tree.add_suite(root, suite_node("chromium", SuiteNodeKind::Project));
        let file = tree.add_suite(project, suite_node("a.spec.ts", SuiteNodeKind::File));
        let anon = tree.add_suite(file, suite_node("", SuiteNodeKind::Describe));
        let test = tree.add_test(anon, test_node(TestId::new("t1"), "works", loc("a.spec.ts")));
        assert_eq!(
            tree.title_path(test),
            vec!["", "chromium", "a.spec.ts", "works"]
        );
    }
}
