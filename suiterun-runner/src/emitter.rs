// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turning reporter callbacks back into wire events.
//!
//! [`EventEmitter`] is the inverse of the receiver: it implements
//! [`Reporter`] and mirrors everything it observes onto the wire as
//! [`Event`]s, with all paths made root-relative. Paired with an
//! [`EventLogWriter`] it produces one shard's `.jsonl` log.

use crate::errors::EventLogWriteError;
use crate::helpers::{wire_location, wire_path};
use crate::report::{ReportTree, StepIndex, SuiteIndex, SuiteNodeKind, TestIndex};
use crate::reporter::Reporter;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use suiterun_protocol::{
    Attachment, ConfigSummary, ErrorDetails, Event, FullResult, ProjectSnapshot, StdIoKind,
    StepEnd, StepStart, SuiteId, SuiteKind, SuiteSnapshot, TestCaseEnd, TestResultEnd,
    TestResultStart, TestSnapshot,
};

/// Mints opaque, run-unique string ids.
///
/// Ids carry a per-run salt so that logs produced by different shards rarely
/// collide; the merger still treats collisions as possible and patches them.
#[derive(Clone, Debug)]
pub struct IdMinter {
    salt: String,
    next: u64,
}

impl IdMinter {
    /// Creates a minter with the given salt.
    pub fn new(salt: impl Into<String>) -> Self {
        Self {
            salt: salt.into(),
            next: 0,
        }
    }

    /// Mints the next id with a readable prefix.
    pub fn mint(&mut self, prefix: &str) -> String {
        let n = self.next;
        self.next += 1;
        format!("{prefix}-{}-{n}", self.salt)
    }
}

/// Mirrors reporter callbacks onto the wire.
pub struct EventEmitter<S> {
    sink: S,
    config: ConfigSummary,
    root_dir: Utf8PathBuf,
    minter: IdMinter,
    suite_ids: HashMap<SuiteIndex, SuiteId>,
}

impl<S: FnMut(Event) + Send> EventEmitter<S> {
    /// Creates an emitter. `config.root_dir` is the absolute root all wire
    /// paths are made relative to; `salt` distinguishes this shard's minted
    /// ids from other shards'.
    pub fn new(config: ConfigSummary, salt: impl Into<String>, sink: S) -> Self {
        let root_dir = Utf8PathBuf::from(&config.root_dir);
        Self {
            sink,
            config,
            root_dir,
            minter: IdMinter::new(salt),
            suite_ids: HashMap::new(),
        }
    }

    // Suite ids are minted once per suite and reused, so a repeated onBegin
    // carries identical ids.
    fn suite_id(&mut self, tree: &ReportTree, suite: SuiteIndex) -> SuiteId {
        if let Some(id) = &tree.suite(suite).wire_id {
            return id.clone();
        }
        if let Some(id) = self.suite_ids.get(&suite) {
            return id.clone();
        }
        let id = SuiteId::new(self.minter.mint("suite"));
        self.suite_ids.insert(suite, id.clone());
        id
    }

    fn snapshot_suite(&mut self, tree: &ReportTree, suite: SuiteIndex) -> SuiteSnapshot {
        let id = self.suite_id(tree, suite);
        let node = tree.suite(suite);
        SuiteSnapshot {
            id,
            title: node.title.clone(),
            kind: match node.kind {
                SuiteNodeKind::File => SuiteKind::File,
                _ => SuiteKind::Describe,
            },
            location: node
                .location
                .as_ref()
                .map(|l| wire_location(&self.root_dir, l)),
            parallel_mode: node.parallel_mode,
            suites: tree
                .child_suites(suite)
                .collect::<Vec<_>>()
                .into_iter()
                .map(|child| self.snapshot_suite(tree, child))
                .collect(),
            tests: tree
                .entries(suite)
                .iter()
                .filter_map(|entry| match entry {
                    crate::report::SuiteEntry::Test(t) => Some(*t),
                    crate::report::SuiteEntry::Suite(_) => None,
                })
                .map(|test| self.snapshot_test(tree, test))
                .collect(),
        }
    }

    fn snapshot_test(&self, tree: &ReportTree, test: TestIndex) -> TestSnapshot {
        let node = tree.test(test);
        TestSnapshot {
            test_id: node.id.clone(),
            title: node.title.clone(),
            location: wire_location(&self.root_dir, &node.location),
            retries: node.retries,
            repeat_each_index: node.repeat_each_index,
            annotations: node.annotations.clone(),
            tags: node.tags.clone(),
        }
    }

    fn snapshot_project(&mut self, tree: &ReportTree, suite: SuiteIndex) -> Option<ProjectSnapshot> {
        let info = tree.suite(suite).project.clone()?;
        let config = &info.config;
        Some(ProjectSnapshot {
            id: info.id.clone(),
            name: config.name.clone(),
            test_dir: wire_path(&self.root_dir, &config.test_dir),
            output_dir: wire_path(&self.root_dir, &config.output_dir),
            snapshot_dir: wire_path(&self.root_dir, &config.snapshot_dir),
            retries: config.retries,
            repeat_each: config.repeat_each,
            timeout: config.timeout,
            grep: config.grep.clone(),
            grep_invert: config.grep_invert.clone(),
            dependencies: config.dependencies.clone(),
            teardown: config.teardown.clone(),
            suites: tree
                .child_suites(suite)
                .collect::<Vec<_>>()
                .into_iter()
                .map(|child| self.snapshot_suite(tree, child))
                .collect(),
        })
    }

    fn wire_error(&self, error: &ErrorDetails) -> ErrorDetails {
        ErrorDetails {
            location: error
                .location
                .as_ref()
                .map(|l| wire_location(&self.root_dir, l)),
            ..error.clone()
        }
    }

    fn wire_attachment(&self, attachment: &Attachment) -> Attachment {
        Attachment {
            path: attachment
                .path
                .as_ref()
                .map(|p| wire_path(&self.root_dir, Utf8Path::new(p))),
            ..attachment.clone()
        }
    }

    fn emit_stdio(
        &mut self,
        kind: StdIoKind,
        chunk: &[u8],
        tree_ids: Option<(&ReportTree, TestIndex, usize)>,
    ) {
        let (data, is_base64) = match std::str::from_utf8(chunk) {
            Ok(text) => (text.to_owned(), false),
            Err(_) => (STANDARD.encode(chunk), true),
        };
        let (test_id, result_id) = match tree_ids {
            Some((tree, test, attempt)) => {
                let node = tree.test(test);
                (
                    Some(node.id.clone()),
                    Some(node.results[attempt].id.clone()),
                )
            }
            None => (None, None),
        };
        (self.sink)(Event::OnStdIO {
            test_id,
            result_id,
            kind,
            data,
            is_base64,
        });
    }
}

impl<S: FnMut(Event) + Send> Reporter for EventEmitter<S> {
    fn on_begin(&mut self, tree: &ReportTree) {
        let projects = tree
            .child_suites(tree.root())
            .collect::<Vec<_>>()
            .into_iter()
            .filter_map(|suite| self.snapshot_project(tree, suite))
            .collect();
        (self.sink)(Event::OnBegin {
            config: self.config.clone(),
            projects,
        });
    }

    fn on_test_begin(&mut self, tree: &ReportTree, test: TestIndex, attempt: usize) {
        let node = tree.test(test);
        let result = &node.results[attempt];
        (self.sink)(Event::OnTestBegin {
            test_id: node.id.clone(),
            result: TestResultStart {
                id: result.id.clone(),
                retry: result.retry,
                worker_index: result.worker_index,
                parallel_index: result.parallel_index,
                start_time: result.start_time,
            },
        });
    }

    fn on_step_begin(&mut self, tree: &ReportTree, test: TestIndex, attempt: usize, step: StepIndex) {
        let node = tree.test(test);
        let result = &node.results[attempt];
        let step = &result.steps[step.0];
        (self.sink)(Event::OnStepBegin {
            test_id: node.id.clone(),
            result_id: result.id.clone(),
            step: StepStart {
                id: step.id.clone(),
                parent_step_id: step.parent.map(|p| result.steps[p.0].id.clone()),
                title: step.title.clone(),
                category: step.category.clone(),
                start_time: step.start_time,
                location: step
                    .location
                    .as_ref()
                    .map(|l| wire_location(&self.root_dir, l)),
            },
        });
    }

    fn on_step_end(&mut self, tree: &ReportTree, test: TestIndex, attempt: usize, step: StepIndex) {
        let node = tree.test(test);
        let result = &node.results[attempt];
        let step = &result.steps[step.0];
        // Relativized before the sink call, which borrows self mutably.
        let error = step.error.as_ref().map(|e| self.wire_error(e));
        (self.sink)(Event::OnStepEnd {
            test_id: node.id.clone(),
            result_id: result.id.clone(),
            step: StepEnd {
                id: step.id.clone(),
                duration: step.duration,
                error,
            },
        });
    }

    fn on_test_end(&mut self, tree: &ReportTree, test: TestIndex, attempt: usize) {
        let node = tree.test(test);
        let result = &node.results[attempt];
        let errors = result.errors.iter().map(|e| self.wire_error(e)).collect();
        let attachments = result
            .attachments
            .iter()
            .map(|a| self.wire_attachment(a))
            .collect();
        (self.sink)(Event::OnTestEnd {
            test: TestCaseEnd {
                test_id: node.id.clone(),
                expected_status: node.expected_status,
                timeout: node.timeout,
                annotations: node.annotations.clone(),
            },
            result: TestResultEnd {
                id: result.id.clone(),
                duration: result.duration,
                status: result.status,
                errors,
                attachments,
            },
        });
    }

    fn on_std_out(
        &mut self,
        tree: &ReportTree,
        chunk: &[u8],
        test: Option<TestIndex>,
        attempt: Option<usize>,
    ) {
        let ids = test.zip(attempt).map(|(t, a)| (tree, t, a));
        self.emit_stdio(StdIoKind::Stdout, chunk, ids);
    }

    fn on_std_err(
        &mut self,
        tree: &ReportTree,
        chunk: &[u8],
        test: Option<TestIndex>,
        attempt: Option<usize>,
    ) {
        let ids = test.zip(attempt).map(|(t, a)| (tree, t, a));
        self.emit_stdio(StdIoKind::Stderr, chunk, ids);
    }

    fn on_error(&mut self, error: &ErrorDetails) {
        let error = self.wire_error(error);
        (self.sink)(Event::OnError { error });
    }

    fn on_end(&mut self, _tree: &ReportTree, result: &FullResult) {
        (self.sink)(Event::OnEnd { result: *result });
    }

    fn on_exit(&mut self) {
        (self.sink)(Event::OnExit);
    }
}

/// Streams events to a newline-delimited JSON log file.
#[derive(Debug)]
pub struct EventLogWriter {
    path: Utf8PathBuf,
    writer: BufWriter<File>,
}

impl EventLogWriter {
    /// Creates (truncating) the log file.
    pub fn create(path: impl Into<Utf8PathBuf>) -> Result<Self, EventLogWriteError> {
        let path = path.into();
        let file = File::create(&path).map_err(|error| EventLogWriteError {
            path: path.clone(),
            error,
        })?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Appends one event as a single line.
    pub fn write_event(&mut self, event: &Event) -> Result<(), EventLogWriteError> {
        let map_err = |error: std::io::Error| EventLogWriteError {
            path: self.path.clone(),
            error,
        };
        serde_json::to_writer(&mut self.writer, event)
            .map_err(|error| map_err(error.into()))?;
        self.writer.write_all(b"\n").map_err(map_err)
    }

    /// Flushes buffered lines to disk.
    pub fn flush(&mut self) -> Result<(), EventLogWriteError> {
        self.writer.flush().map_err(|error| EventLogWriteError {
            path: self.path.clone(),
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projects::ProjectConfig;
    use crate::report::{ProjectInfo, TestStep, suite_node, test_node};
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;
    use suiterun_protocol::{Location, ProjectId, ResultId, StepId, TestId, TestStatus};

    fn sample_tree() -> ReportTree {
        let mut tree = ReportTree::new();
        let root = tree.root();
        let mut project = suite_node("chromium", SuiteNodeKind::Project);
        project.project = Some(ProjectInfo {
            id: ProjectId::new("p1"),
            config: ProjectConfig::new("chromium", "/repo/tests"),
        });
        let project = tree.add_suite(root, project);
        let file = tree.add_suite(project, suite_node("a.spec.ts", SuiteNodeKind::File));
        tree.add_test(
            file,
            test_node(
                TestId::new("t1"),
                "works",
                Location {
                    file: "/repo/tests/a.spec.ts".to_owned(),
                    line: 3,
                    column: 1,
                },
            ),
        );
        tree
    }

    fn collecting_emitter() -> (EventEmitter<impl FnMut(Event) + Send>, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel();
        let config = ConfigSummary {
            root_dir: "/repo".to_owned(),
            version: "1.0.0".to_owned(),
            workers: 2,
            metadata: serde_json::Map::new(),
        };
        let emitter = EventEmitter::new(config, "shard0", move |event| {
            tx.send(event).unwrap();
        });
        (emitter, rx)
    }

    #[test]
    fn begin_event_carries_relative_paths() {
        let tree = sample_tree();
        let (mut emitter, rx) = collecting_emitter();
        emitter.on_begin(&tree);
        let Event::OnBegin { config, projects } = rx.try_recv().unwrap() else {
            panic!("expected onBegin");
        };
        assert_eq!(config.workers, 2);
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].test_dir, "tests");
        let file = &projects[0].suites[0];
        assert_eq!(file.tests[0].location.file, "tests/a.spec.ts");
    }

    #[test]
    fn repeated_begin_mints_stable_suite_ids() {
        let tree = sample_tree();
        let (mut emitter, rx) = collecting_emitter();
        emitter.on_begin(&tree);
        emitter.on_begin(&tree);
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn end_events_relativize_error_and_attachment_paths() {
        let mut tree = sample_tree();
        let test = tree.all_tests(tree.root())[0];
        let attempt = tree.test_mut(test).create_result(ResultId::new("r1"));
        {
            let result = &mut tree.test_mut(test).results[attempt];
            result.status = TestStatus::Failed;
            result.duration = 5.0;
            result.errors.push(ErrorDetails {
                location: Some(Location {
                    file: "/repo/tests/a.spec.ts".to_owned(),
                    line: 7,
                    column: 2,
                }),
                ..ErrorDetails::from_message("boom")
            });
            result.attachments.push(Attachment {
                name: "trace".to_owned(),
                content_type: "application/zip".to_owned(),
                path: Some("/repo/test-results/trace.zip".to_owned()),
                base64: None,
            });
            result.add_step(TestStep {
                id: StepId::new("s1"),
                parent: None,
                title: "outer".to_owned(),
                category: "test.step".to_owned(),
                location: None,
                start_time: 0.0,
                duration: 2.0,
                error: Some(ErrorDetails {
                    location: Some(Location {
                        file: "/repo/tests/a.spec.ts".to_owned(),
                        line: 9,
                        column: 4,
                    }),
                    ..ErrorDetails::from_message("step boom")
                }),
                children: Vec::new(),
            });
        }

        let (mut emitter, rx) = collecting_emitter();
        emitter.on_step_end(&tree, test, attempt, StepIndex(0));
        emitter.on_test_end(&tree, test, attempt);

        let Event::OnStepEnd { step, .. } = rx.try_recv().unwrap() else {
            panic!("expected onStepEnd");
        };
        assert_eq!(
            step.error.unwrap().location.unwrap().file,
            "tests/a.spec.ts"
        );
        let Event::OnTestEnd { result, .. } = rx.try_recv().unwrap() else {
            panic!("expected onTestEnd");
        };
        assert_eq!(
            result.errors[0].location.as_ref().unwrap().file,
            "tests/a.spec.ts"
        );
        assert_eq!(
            result.attachments[0].path.as_deref(),
            Some("test-results/trace.zip")
        );
    }

    #[test]
    fn binary_stdio_is_base64_encoded() {
        let (mut emitter, rx) = collecting_emitter();
        emitter.on_std_err(&ReportTree::new(), &[0xff, 0xfe, 0x00], None, None);
        let Event::OnStdIO {
            kind,
            data,
            is_base64,
            ..
        } = rx.try_recv().unwrap()
        else {
            panic!("expected onStdIO");
        };
        assert_eq!(kind, StdIoKind::Stderr);
        assert!(is_base64);
        assert_eq!(STANDARD.decode(data).unwrap(), vec![0xff, 0xfe, 0x00]);
    }

    #[test]
    fn log_writer_produces_one_line_per_event() {
        let dir = camino_tempfile::tempdir().unwrap();
        let path = dir.path().join("shard-0.jsonl");
        let mut writer = EventLogWriter::create(path.clone()).unwrap();
        writer.write_event(&Event::OnExit).unwrap();
        writer
            .write_event(&Event::OnError {
                error: ErrorDetails::from_message("boom"),
            })
            .unwrap();
        writer.flush().unwrap();

        let contents = std::fs::read_to_string(path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"method":"onExit"}"#);
        let event: Event = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(
            event,
            Event::OnError {
                error: ErrorDetails::from_message("boom"),
            }
        );
    }
}
