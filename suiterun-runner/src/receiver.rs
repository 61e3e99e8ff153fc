// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconstructing a live report tree from a stream of wire events.
//!
//! [`EventReceiver::dispatch`] consumes one [`Event`] at a time, mutates the
//! arena tree and forwards the observation to the wrapped [`Reporter`].
//! Structure arrives through `onBegin`: suites and tests are found by their
//! stable wire ids and created on first sight, so dispatching the same
//! `onBegin` again (or one per shard, as the merger does) converges instead
//! of duplicating nodes.

use crate::helpers::{resolve_location, resolve_path};
use crate::projects::ProjectConfig;
use crate::report::{
    ProjectInfo, ReportTree, SuiteIndex, SuiteNodeKind, TestIndex, TestStep, TransientStatus,
    suite_node, test_node,
};
use crate::reporter::Reporter;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use camino::Utf8PathBuf;
use std::collections::{HashMap, HashSet};
use suiterun_protocol::{
    Attachment, ConfigSummary, ErrorDetails, Event, ProjectSnapshot, StdIoKind, StepEnd, StepStart,
    SuiteId, SuiteKind, SuiteSnapshot, TestCaseEnd, TestId, TestResultEnd, TestResultStart,
    TestSnapshot,
};
use tracing::warn;

/// Tuning knobs for an [`EventReceiver`].
#[derive(Clone, Debug, Default)]
pub struct ReceiverOptions {
    /// Listing mode: a fresh `onBegin` also prunes entries whose ids it no
    /// longer mentions. Off by default so shard merging stays additive.
    pub list_mode: bool,
    /// Drop earlier attempts when a test begins again. Used by watch-style
    /// re-runs where history would otherwise accumulate forever.
    pub clear_previous_results_on_test_begin: bool,
    /// Resolve wire paths against this directory instead of the one the
    /// emitting side reported.
    pub root_dir_override: Option<Utf8PathBuf>,
}

/// Applies wire events to a report tree and forwards them to a reporter.
#[derive(Debug)]
pub struct EventReceiver<R> {
    tree: ReportTree,
    tests: HashMap<TestId, TestIndex>,
    config: ConfigSummary,
    root_dir: Utf8PathBuf,
    options: ReceiverOptions,
    reporter: R,
}

impl<R: Reporter> EventReceiver<R> {
    /// Creates a receiver delivering into `reporter`.
    pub fn new(options: ReceiverOptions, reporter: R) -> Self {
        Self {
            tree: ReportTree::new(),
            tests: HashMap::new(),
            config: ConfigSummary::default(),
            root_dir: Utf8PathBuf::new(),
            options,
            reporter,
        }
    }

    /// The tree as reconstructed so far.
    pub fn tree(&self) -> &ReportTree {
        &self.tree
    }

    /// The configuration from the last `onBegin`.
    pub fn config(&self) -> &ConfigSummary {
        &self.config
    }

    /// Consumes the receiver, returning the tree and the reporter.
    pub fn into_parts(self) -> (ReportTree, R) {
        (self.tree, self.reporter)
    }

    /// Applies one event.
    pub fn dispatch(&mut self, event: Event) {
        match event {
            Event::OnBegin { config, projects } => self.on_begin(config, projects),
            Event::OnTestBegin { test_id, result } => self.on_test_begin(&test_id, result),
            Event::OnStepBegin {
                test_id,
                result_id,
                step,
            } => self.on_step_begin(&test_id, &result_id, step),
            Event::OnStepEnd {
                test_id,
                result_id,
                step,
            } => self.on_step_end(&test_id, &result_id, step),
            Event::OnTestEnd { test, result } => self.on_test_end(test, result),
            Event::OnStdIO {
                test_id,
                result_id,
                kind,
                data,
                is_base64,
            } => self.on_std_io(test_id.as_ref(), result_id.as_ref(), kind, &data, is_base64),
            Event::OnError { error } => {
                let error = self.resolve_error(error);
                self.reporter.on_error(&error);
            }
            Event::OnEnd { result } => self.reporter.on_end(&self.tree, &result),
            Event::OnExit => self.reporter.on_exit(),
        }
    }

    fn on_begin(&mut self, config: ConfigSummary, projects: Vec<ProjectSnapshot>) {
        self.root_dir = self
            .options
            .root_dir_override
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from(&config.root_dir));
        self.config = config;

        let mut seen_suites = HashSet::new();
        let mut seen_tests = HashSet::new();
        for project in projects {
            let suite = self.upsert_project(&project);
            for child in &project.suites {
                self.upsert_suite(suite, child, &mut seen_suites, &mut seen_tests);
            }
        }
        if self.options.list_mode {
            self.tree.prune(&seen_suites, &seen_tests);
        }
        self.reporter.on_begin(&self.tree);
    }

    fn upsert_project(&mut self, snapshot: &ProjectSnapshot) -> SuiteIndex {
        let config = ProjectConfig::from_snapshot(&self.root_dir, snapshot);
        let existing = self
            .tree
            .project_suite_by_id(&snapshot.id)
            .or_else(|| self.find_project_by_title(&snapshot.name));
        let suite = match existing {
            Some(suite) => suite,
            None => {
                let root = self.tree.root();
                self.tree
                    .add_suite(root, suite_node(&snapshot.name, SuiteNodeKind::Project))
            }
        };
        let node = self.tree.suite_mut(suite);
        node.title = snapshot.name.clone();
        node.project = Some(ProjectInfo {
            id: snapshot.id.clone(),
            config,
        });
        suite
    }

    fn find_project_by_title(&self, title: &str) -> Option<SuiteIndex> {
        self.tree.child_suites(self.tree.root()).find(|&s| {
            let node = self.tree.suite(s);
            node.kind == SuiteNodeKind::Project && node.title == title
        })
    }

    fn upsert_suite(
        &mut self,
        parent: SuiteIndex,
        snapshot: &SuiteSnapshot,
        seen_suites: &mut HashSet<SuiteId>,
        seen_tests: &mut HashSet<TestId>,
    ) {
        seen_suites.insert(snapshot.id.clone());
        let kind = match snapshot.kind {
            SuiteKind::File => SuiteNodeKind::File,
            SuiteKind::Describe => SuiteNodeKind::Describe,
        };
        // Id match first; same-titled suites from another shard share a
        // node only when ids agree, title matching is the legacy fallback.
        let existing = self
            .tree
            .child_suite_by_wire_id(parent, &snapshot.id)
            .or_else(|| self.tree.child_suite_by_title(parent, &snapshot.title));
        let suite = match existing {
            Some(suite) => suite,
            None => self
                .tree
                .add_suite(parent, suite_node(&snapshot.title, kind)),
        };
        let location = snapshot
            .location
            .as_ref()
            .map(|l| resolve_location(&self.root_dir, l));
        let node = self.tree.suite_mut(suite);
        node.wire_id = Some(snapshot.id.clone());
        node.kind = kind;
        node.location = location;
        node.parallel_mode = snapshot.parallel_mode;

        for child in &snapshot.suites {
            self.upsert_suite(suite, child, seen_suites, seen_tests);
        }
        for test in &snapshot.tests {
            self.upsert_test(suite, test, seen_tests);
        }
    }

    fn upsert_test(&mut self, parent: SuiteIndex, snapshot: &TestSnapshot, seen: &mut HashSet<TestId>) {
        seen.insert(snapshot.test_id.clone());
        let location = resolve_location(&self.root_dir, &snapshot.location);
        let index = match self.tests.get(&snapshot.test_id) {
            Some(&index) => index,
            None => {
                let index = self.tree.add_test(
                    parent,
                    test_node(snapshot.test_id.clone(), &snapshot.title, location.clone()),
                );
                self.tests.insert(snapshot.test_id.clone(), index);
                index
            }
        };
        let node = self.tree.test_mut(index);
        node.title = snapshot.title.clone();
        node.location = location;
        node.retries = snapshot.retries;
        node.repeat_each_index = snapshot.repeat_each_index;
        node.annotations = snapshot.annotations.clone();
        node.tags = snapshot.tags.clone();
    }

    fn lookup_test(&self, test_id: &TestId) -> Option<TestIndex> {
        let index = self.tests.get(test_id).copied();
        if index.is_none() {
            warn!(%test_id, "event references unknown test, ignoring");
        }
        index
    }

    fn on_test_begin(&mut self, test_id: &TestId, start: TestResultStart) {
        let Some(index) = self.lookup_test(test_id) else {
            return;
        };
        let node = self.tree.test_mut(index);
        if self.options.clear_previous_results_on_test_begin {
            node.results.clear();
        }
        let attempt = node.create_result(start.id);
        let result = &mut node.results[attempt];
        result.retry = start.retry;
        result.worker_index = start.worker_index;
        result.parallel_index = start.parallel_index;
        result.start_time = start.start_time;
        result.transient = TransientStatus::Running;
        self.reporter.on_test_begin(&self.tree, index, attempt);
    }

    fn on_test_end(&mut self, test: TestCaseEnd, end: TestResultEnd) {
        let Some(index) = self.lookup_test(&test.test_id) else {
            return;
        };
        let errors: Vec<ErrorDetails> = end
            .errors
            .into_iter()
            .map(|e| self.resolve_error(e))
            .collect();
        let attachments: Vec<Attachment> = end
            .attachments
            .into_iter()
            .map(|a| self.resolve_attachment(a))
            .collect();
        let node = self.tree.test_mut(index);
        node.expected_status = test.expected_status;
        node.timeout = test.timeout;
        node.annotations = test.annotations;
        let Some(attempt) = node.result_index_by_id(&end.id) else {
            warn!(test_id = %test.test_id, result_id = %end.id, "onTestEnd for unknown result, ignoring");
            return;
        };
        let result = &mut node.results[attempt];
        result.duration = end.duration;
        result.status = end.status;
        result.errors = errors;
        result.attachments = attachments;
        result.transient = TransientStatus::Finished;
        // The attempt is over; no more steps will refer to this map.
        result.step_lookup.clear();
        self.reporter.on_test_end(&self.tree, index, attempt);
    }

    fn on_step_begin(&mut self, test_id: &TestId, result_id: &suiterun_protocol::ResultId, step: StepStart) {
        let Some(index) = self.lookup_test(test_id) else {
            return;
        };
        let location = step
            .location
            .as_ref()
            .map(|l| resolve_location(&self.root_dir, l));
        let node = self.tree.test_mut(index);
        let Some(attempt) = node.result_index_by_id(result_id) else {
            warn!(%test_id, %result_id, "onStepBegin for unknown result, ignoring");
            return;
        };
        let result = &mut node.results[attempt];
        let parent = step
            .parent_step_id
            .as_ref()
            .and_then(|id| result.step_index_by_id(id));
        let step_index = result.add_step(TestStep {
            id: step.id,
            parent,
            title: step.title,
            category: step.category,
            location,
            start_time: step.start_time,
            duration: -1.0,
            error: None,
            children: Vec::new(),
        });
        self.reporter
            .on_step_begin(&self.tree, index, attempt, step_index);
    }

    fn on_step_end(&mut self, test_id: &TestId, result_id: &suiterun_protocol::ResultId, step: StepEnd) {
        let Some(index) = self.lookup_test(test_id) else {
            return;
        };
        let error = step.error.map(|e| self.resolve_error(e));
        let node = self.tree.test_mut(index);
        let Some(attempt) = node.result_index_by_id(result_id) else {
            warn!(%test_id, %result_id, "onStepEnd for unknown result, ignoring");
            return;
        };
        let result = &mut node.results[attempt];
        let Some(step_index) = result.step_index_by_id(&step.id) else {
            warn!(%test_id, step_id = %step.id, "onStepEnd for unknown step, ignoring");
            return;
        };
        let node_step = &mut result.steps[step_index.0];
        node_step.duration = step.duration;
        node_step.error = error;
        self.reporter
            .on_step_end(&self.tree, index, attempt, step_index);
    }

    fn on_std_io(
        &mut self,
        test_id: Option<&TestId>,
        result_id: Option<&suiterun_protocol::ResultId>,
        kind: StdIoKind,
        data: &str,
        is_base64: bool,
    ) {
        let chunk: Vec<u8> = if is_base64 {
            match STANDARD.decode(data) {
                Ok(bytes) => bytes,
                Err(error) => {
                    warn!(%error, "undecodable base64 stdio chunk, ignoring");
                    return;
                }
            }
        } else {
            data.as_bytes().to_vec()
        };

        let mut owner = None;
        if let Some(test_id) = test_id
            && let Some(index) = self.tests.get(test_id).copied()
        {
            let node = self.tree.test_mut(index);
            let attempt = result_id
                .and_then(|id| node.result_index_by_id(id))
                .or_else(|| node.results.len().checked_sub(1));
            if let Some(attempt) = attempt {
                let result = &mut node.results[attempt];
                match kind {
                    StdIoKind::Stdout => result.stdout.push(chunk.clone()),
                    StdIoKind::Stderr => result.stderr.push(chunk.clone()),
                }
                owner = Some((index, attempt));
            }
        }
        let (test, attempt) = match owner {
            Some((t, a)) => (Some(t), Some(a)),
            None => (None, None),
        };
        match kind {
            StdIoKind::Stdout => self.reporter.on_std_out(&self.tree, &chunk, test, attempt),
            StdIoKind::Stderr => self.reporter.on_std_err(&self.tree, &chunk, test, attempt),
        }
    }

    fn resolve_error(&self, error: ErrorDetails) -> ErrorDetails {
        ErrorDetails {
            location: error
                .location
                .as_ref()
                .map(|l| resolve_location(&self.root_dir, l)),
            ..error
        }
    }

    fn resolve_attachment(&self, attachment: Attachment) -> Attachment {
        Attachment {
            path: attachment
                .path
                .as_deref()
                .map(|p| resolve_path(&self.root_dir, p).into_string()),
            ..attachment
        }
    }
}
