// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle events and the payload types they carry.

use crate::{ProjectId, ResultId, StepId, SuiteId, TestId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The terminal status of a single test attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum TestStatus {
    /// The attempt passed.
    Passed,
    /// The attempt failed.
    Failed,
    /// The attempt hit its timeout.
    TimedOut,
    /// The attempt was skipped and never ran.
    Skipped,
    /// The attempt was interrupted by run cancellation.
    Interrupted,
}

impl TestStatus {
    /// String forms accepted on the wire.
    pub fn variants() -> &'static [&'static str] {
        &["passed", "failed", "timedOut", "skipped", "interrupted"]
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::TimedOut => "timedOut",
            TestStatus::Skipped => "skipped",
            TestStatus::Interrupted => "interrupted",
        };
        write!(f, "{s}")
    }
}

/// The terminal status of a whole run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    /// Every test finished with its expected status.
    Passed,
    /// At least one test or task failed.
    Failed,
    /// The global deadline fired.
    TimedOut,
    /// The run was interrupted by a signal.
    Interrupted,
}

impl RunStatus {
    // Severity used when combining shard statuses. Note this is the *merge*
    // precedence (failed > timedOut > interrupted > passed), not the
    // orchestrator's cancellation precedence.
    fn merge_severity(self) -> u8 {
        match self {
            RunStatus::Passed => 0,
            RunStatus::Interrupted => 1,
            RunStatus::TimedOut => 2,
            RunStatus::Failed => 3,
        }
    }

    /// Combines two shard statuses, keeping the worse one.
    ///
    /// Used when merging independently produced shard logs: the first shard
    /// exhibiting a worse status than currently recorded wins.
    pub fn worst(self, other: RunStatus) -> RunStatus {
        if other.merge_severity() > self.merge_severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::TimedOut => "timedOut",
            RunStatus::Interrupted => "interrupted",
        };
        write!(f, "{s}")
    }
}

/// A source location. `file` is relative to the run's root directory.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Location {
    /// The file path, relative to the root directory.
    pub file: String,
    /// 1-based line number, 0 when unknown.
    pub line: u32,
    /// 1-based column number, 0 when unknown.
    pub column: u32,
}

/// An annotation attached to a test (e.g. `skip`, `fixme`, `slow`).
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Annotation {
    /// The annotation kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A structured error reported on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorDetails {
    /// Human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Stack trace, if captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// Stringified thrown value when no message is available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Location the error points at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl ErrorDetails {
    /// Creates an error with just a message.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// A file or inline attachment produced by a test attempt.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Attachment name.
    pub name: String,
    /// MIME content type.
    pub content_type: String,
    /// Path to the attachment, relative to the root directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Inline body, base64-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64: Option<String>,
}

/// Run-wide configuration reported in `onBegin`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSummary {
    /// The root directory all wire paths are relative to.
    pub root_dir: String,
    /// The emitting tool version.
    pub version: String,
    /// Configured worker count. Summed across shards on merge.
    pub workers: usize,
    /// Free-form metadata. Unioned across shards on merge, later shard wins
    /// on key collision.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// How entries within a suite may be scheduled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ParallelMode {
    /// Inherit from the parent suite.
    #[default]
    None,
    /// The project default.
    Default,
    /// Entries run strictly in order, a failure skips the rest.
    Serial,
    /// Entries may run fully in parallel.
    Parallel,
}

/// The kind of a suite node on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SuiteKind {
    /// A test file.
    File,
    /// A describe block within a file.
    Describe,
}

/// A project reported in `onBegin`.
///
/// Directory fields are relative to the root directory.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    /// Stable project id, unique within the emitting run.
    pub id: ProjectId,
    /// Project name.
    pub name: String,
    /// Directory the project's tests live under.
    pub test_dir: String,
    /// Directory test output is written to.
    pub output_dir: String,
    /// Directory snapshots are read from.
    pub snapshot_dir: String,
    /// Per-test retry count.
    pub retries: u32,
    /// Number of times each test is repeated.
    pub repeat_each: u32,
    /// Per-test timeout in milliseconds.
    pub timeout: f64,
    /// Title filter patterns.
    #[serde(default)]
    pub grep: Vec<String>,
    /// Inverted title filter patterns.
    #[serde(default)]
    pub grep_invert: Vec<String>,
    /// Names of projects this project depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Name of the project that tears this one down, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown: Option<String>,
    /// The project's file suites.
    #[serde(default)]
    pub suites: Vec<SuiteSnapshot>,
}

/// A suite node reported in `onBegin`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteSnapshot {
    /// Stable suite id, unique within the emitting run.
    pub id: SuiteId,
    /// Suite title. For file suites this is the root-relative file path.
    pub title: String,
    /// The suite kind.
    pub kind: SuiteKind,
    /// Location of the suite declaration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    /// Scheduling mode for entries of this suite.
    #[serde(default)]
    pub parallel_mode: ParallelMode,
    /// Child suites, in declaration order.
    #[serde(default)]
    pub suites: Vec<SuiteSnapshot>,
    /// Child tests, in declaration order.
    #[serde(default)]
    pub tests: Vec<TestSnapshot>,
}

/// A test case reported in `onBegin`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSnapshot {
    /// Stable test id. The same id is reused by every retry.
    pub test_id: TestId,
    /// Test title.
    pub title: String,
    /// Location of the test declaration.
    pub location: Location,
    /// Retry budget for this test.
    pub retries: u32,
    /// Which repetition of the test this is.
    #[serde(default)]
    pub repeat_each_index: u32,
    /// Annotations declared on the test.
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    /// Tags declared on the test.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// The start half of a test attempt, carried by `onTestBegin`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResultStart {
    /// Result id, reused by the matching `onTestEnd`.
    pub id: ResultId,
    /// Zero-based retry index.
    pub retry: u32,
    /// Index of the worker process that ran the attempt.
    pub worker_index: i64,
    /// Index of the parallel slot the attempt occupied.
    pub parallel_index: i64,
    /// Wall-clock start time, epoch milliseconds.
    pub start_time: f64,
}

/// Final test-case fields carried by `onTestEnd`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseEnd {
    /// The test the result belongs to.
    pub test_id: TestId,
    /// The status the test is expected to finish with.
    pub expected_status: TestStatus,
    /// Effective timeout in milliseconds.
    pub timeout: f64,
    /// Annotations, possibly amended during execution.
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// The end half of a test attempt, carried by `onTestEnd`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResultEnd {
    /// Result id minted by the matching `onTestBegin`.
    pub id: ResultId,
    /// Attempt duration in milliseconds.
    pub duration: f64,
    /// Terminal status of the attempt.
    pub status: TestStatus,
    /// Errors produced by the attempt.
    #[serde(default)]
    pub errors: Vec<ErrorDetails>,
    /// Attachments produced by the attempt.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// The start half of a step, carried by `onStepBegin`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStart {
    /// Step id, reused by the matching `onStepEnd`.
    pub id: StepId,
    /// Parent step id for nested steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_step_id: Option<StepId>,
    /// Step title.
    pub title: String,
    /// Step category (e.g. `hook`, `expect`, `fixture`).
    pub category: String,
    /// Wall-clock start time, epoch milliseconds.
    pub start_time: f64,
    /// Location the step originates from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// The end half of a step, carried by `onStepEnd`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEnd {
    /// Step id minted by the matching `onStepBegin`.
    pub id: StepId,
    /// Step duration in milliseconds.
    pub duration: f64,
    /// Error the step finished with, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetails>,
}

/// Which standard stream a chunk of output belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StdIoKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// The final run result carried by `onEnd`.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullResult {
    /// Terminal status of the run.
    pub status: RunStatus,
    /// Wall-clock start time of the run, epoch milliseconds.
    pub start_time: f64,
    /// Run duration in milliseconds.
    pub duration: f64,
}

/// One lifecycle event.
///
/// Serializes as a `{method, params}` object; one such object per line in a
/// shard's `.jsonl` log.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(
    tag = "method",
    content = "params",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Event {
    /// The run started. Emitted exactly once per run or shard.
    OnBegin {
        /// Run-wide configuration.
        config: ConfigSummary,
        /// Every project participating in the run, with its suites.
        projects: Vec<ProjectSnapshot>,
    },
    /// A test attempt started.
    OnTestBegin {
        /// The test the attempt belongs to.
        test_id: TestId,
        /// Start-time fields of the attempt.
        result: TestResultStart,
    },
    /// A step started within a test attempt.
    OnStepBegin {
        /// The owning test.
        test_id: TestId,
        /// The owning attempt.
        result_id: ResultId,
        /// Start-time fields of the step.
        step: StepStart,
    },
    /// A step finished.
    OnStepEnd {
        /// The owning test.
        test_id: TestId,
        /// The owning attempt.
        result_id: ResultId,
        /// End-time fields of the step.
        step: StepEnd,
    },
    /// A test attempt finished.
    OnTestEnd {
        /// Final test-case fields.
        test: TestCaseEnd,
        /// End-time fields of the attempt.
        result: TestResultEnd,
    },
    /// A chunk of stdout/stderr was produced.
    OnStdIO {
        /// The owning test, if the chunk is attributable.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        test_id: Option<TestId>,
        /// The owning attempt, if the chunk is attributable.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result_id: Option<ResultId>,
        /// Which stream the chunk belongs to.
        #[serde(rename = "type")]
        kind: StdIoKind,
        /// The chunk payload.
        data: String,
        /// Whether `data` is base64-encoded binary.
        is_base64: bool,
    },
    /// A run-level error not attributable to a single test.
    OnError {
        /// The error.
        error: ErrorDetails,
    },
    /// The run finished. Emitted exactly once per run or shard.
    OnEnd {
        /// The final result.
        result: FullResult,
    },
    /// All reporting is complete; reporters may flush and shut down.
    OnExit,
}

impl Event {
    /// Returns the wire method name of this event.
    pub fn method(&self) -> &'static str {
        match self {
            Event::OnBegin { .. } => "onBegin",
            Event::OnTestBegin { .. } => "onTestBegin",
            Event::OnStepBegin { .. } => "onStepBegin",
            Event::OnStepEnd { .. } => "onStepEnd",
            Event::OnTestEnd { .. } => "onTestEnd",
            Event::OnStdIO { .. } => "onStdIO",
            Event::OnError { .. } => "onError",
            Event::OnEnd { .. } => "onEnd",
            Event::OnExit => "onExit",
        }
    }
}
