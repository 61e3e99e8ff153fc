// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recombining per-shard event logs into one report.
//!
//! Every shard of a sharded run writes its own `.jsonl` event log. The
//! merger reads them back in lexicographic file order, synthesizes a single
//! begin and end event, concatenates everything in between, and replays the
//! whole sequence through one [`EventReceiver`]. The receiver's upsert
//! semantics do the structural work: same-named projects and suites from
//! different shards converge onto shared nodes and their tests concatenate.
//!
//! Test ids are minted per shard and are not globally unique. When a later
//! shard reuses an id an earlier shard already claimed, every occurrence in
//! that shard is remapped to a salted id before replay.

use crate::errors::MergeError;
use crate::receiver::{EventReceiver, ReceiverOptions};
use crate::reporter::Reporter;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{HashMap, HashSet};
use suiterun_protocol::{
    ConfigSummary, Event, FullResult, RunStatus, SuiteSnapshot, TestId,
};
use tracing::debug;

/// Options for a merge.
#[derive(Clone, Debug, Default)]
pub struct MergeOptions {
    /// Resolve wire paths against this directory instead of the root dir
    /// recorded by the shards.
    pub root_dir_override: Option<Utf8PathBuf>,
    /// Resolve relative attachment paths against this directory before
    /// replay. Used when shard artifacts were unpacked next to the logs.
    pub resource_dir: Option<Utf8PathBuf>,
}

struct ShardLog {
    begin: Option<(ConfigSummary, Vec<suiterun_protocol::ProjectSnapshot>)>,
    end: Option<FullResult>,
    middles: Vec<Event>,
}

/// Merges every `*.jsonl` log under `dir` and replays the result through a
/// receiver wrapping `reporter`.
///
/// Returns the receiver so callers can inspect the reconstructed tree and
/// merged configuration. Fails before any replay when the logs are
/// unreadable, unparsable, or contain no begin event at all.
pub fn merge_shard_logs<R: Reporter>(
    dir: &Utf8Path,
    options: MergeOptions,
    reporter: R,
) -> Result<EventReceiver<R>, MergeError> {
    let paths = shard_log_paths(dir)?;
    let mut shards = Vec::with_capacity(paths.len());
    for path in &paths {
        shards.push(read_shard_log(path)?);
    }

    patch_colliding_test_ids(&mut shards);

    let begin = merged_begin(&shards).ok_or_else(|| MergeError::NoBeginEvents {
        dir: dir.to_owned(),
    })?;
    let end = merged_end(&shards);

    if let Some(resource_dir) = &options.resource_dir {
        for shard in &mut shards {
            for event in &mut shard.middles {
                patch_attachment_paths(event, resource_dir);
            }
        }
    }

    let receiver_options = ReceiverOptions {
        root_dir_override: options.root_dir_override.clone(),
        ..ReceiverOptions::default()
    };
    let mut receiver = EventReceiver::new(receiver_options, reporter);
    receiver.dispatch(begin);
    for shard in shards {
        for event in shard.middles {
            receiver.dispatch(event);
        }
    }
    receiver.dispatch(Event::OnEnd { result: end });
    receiver.dispatch(Event::OnExit);
    Ok(receiver)
}

fn shard_log_paths(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>, MergeError> {
    let read_dir = dir.read_dir_utf8().map_err(|error| MergeError::ReadDir {
        dir: dir.to_owned(),
        error,
    })?;
    let mut paths = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|error| MergeError::ReadDir {
            dir: dir.to_owned(),
            error,
        })?;
        let path = entry.path();
        if path.extension() == Some("jsonl") {
            paths.push(path.to_owned());
        }
    }
    // Lexicographic file order defines shard order.
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(paths)
}

fn read_shard_log(path: &Utf8Path) -> Result<ShardLog, MergeError> {
    let contents = std::fs::read_to_string(path).map_err(|error| MergeError::ReadFile {
        path: path.to_owned(),
        error,
    })?;
    let mut shard = ShardLog {
        begin: None,
        end: None,
        middles: Vec::new(),
    };
    let mut count = 0usize;
    for (number, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event: Event =
            serde_json::from_str(line).map_err(|error| MergeError::ParseEvent {
                path: path.to_owned(),
                line: number + 1,
                error,
            })?;
        count += 1;
        match event {
            Event::OnBegin { config, projects } => {
                if shard.begin.is_none() {
                    shard.begin = Some((config, projects));
                }
            }
            Event::OnEnd { result } => shard.end = Some(result),
            Event::OnExit => {}
            middle => shard.middles.push(middle),
        }
    }
    debug!(path = %path, events = count, "read shard log");
    Ok(shard)
}

// A later shard reusing a test id an earlier shard already claimed gets the
// colliding ids remapped to `{id}-{shard_index}`, both in its begin
// snapshot and in every middle event.
fn patch_colliding_test_ids(shards: &mut [ShardLog]) {
    let mut claimed: HashSet<TestId> = HashSet::new();
    for (shard_index, shard) in shards.iter_mut().enumerate() {
        let mut ids = Vec::new();
        if let Some((_, projects)) = &shard.begin {
            for project in projects {
                collect_test_ids(&project.suites, &mut ids);
            }
        }
        let mut renames: HashMap<TestId, TestId> = HashMap::new();
        for id in ids {
            if claimed.contains(&id) {
                let salted = TestId::new(format!("{id}-{shard_index}"));
                claimed.insert(salted.clone());
                renames.insert(id, salted);
            } else {
                claimed.insert(id);
            }
        }
        if renames.is_empty() {
            continue;
        }
        debug!(shard = shard_index, renamed = renames.len(), "salting colliding test ids");
        if let Some((_, projects)) = &mut shard.begin {
            for project in projects {
                for suite in &mut project.suites {
                    patch_suite_test_ids(suite, &renames);
                }
            }
        }
        for event in &mut shard.middles {
            patch_event_test_ids(event, &renames);
        }
    }
}

fn collect_test_ids(suites: &[SuiteSnapshot], into: &mut Vec<TestId>) {
    for suite in suites {
        collect_test_ids(&suite.suites, into);
        for test in &suite.tests {
            into.push(test.test_id.clone());
        }
    }
}

fn patch_suite_test_ids(suite: &mut SuiteSnapshot, renames: &HashMap<TestId, TestId>) {
    for child in &mut suite.suites {
        patch_suite_test_ids(child, renames);
    }
    for test in &mut suite.tests {
        if let Some(salted) = renames.get(&test.test_id) {
            test.test_id = salted.clone();
        }
    }
}

fn patch_event_test_ids(event: &mut Event, renames: &HashMap<TestId, TestId>) {
    let patch = |id: &mut TestId| {
        if let Some(salted) = renames.get(id) {
            *id = salted.clone();
        }
    };
    match event {
        Event::OnTestBegin { test_id, .. }
        | Event::OnStepBegin { test_id, .. }
        | Event::OnStepEnd { test_id, .. } => patch(test_id),
        Event::OnTestEnd { test, .. } => patch(&mut test.test_id),
        Event::OnStdIO { test_id, .. } => {
            if let Some(test_id) = test_id {
                patch(test_id);
            }
        }
        Event::OnBegin { .. } | Event::OnError { .. } | Event::OnEnd { .. } | Event::OnExit => {}
    }
}

// Workers are summed, metadata is unioned with later shards winning on key
// collisions, and the first shard's root dir and version stand for the run.
fn merged_begin(shards: &[ShardLog]) -> Option<Event> {
    let mut config: Option<ConfigSummary> = None;
    let mut projects = Vec::new();
    for shard in shards {
        let Some((shard_config, shard_projects)) = &shard.begin else {
            continue;
        };
        match &mut config {
            None => config = Some(shard_config.clone()),
            Some(merged) => {
                merged.workers += shard_config.workers;
                for (key, value) in &shard_config.metadata {
                    merged.metadata.insert(key.clone(), value.clone());
                }
            }
        }
        projects.extend(shard_projects.iter().cloned());
    }
    config.map(|config| Event::OnBegin { config, projects })
}

fn merged_end(shards: &[ShardLog]) -> FullResult {
    let mut merged = FullResult {
        status: RunStatus::Passed,
        start_time: f64::MAX,
        duration: 0.0,
    };
    let mut any = false;
    for shard in shards {
        let Some(end) = &shard.end else { continue };
        any = true;
        merged.status = merged.status.worst(end.status);
        merged.start_time = merged.start_time.min(end.start_time);
        merged.duration = merged.duration.max(end.duration);
    }
    if !any {
        merged.start_time = 0.0;
    }
    merged
}

fn patch_attachment_paths(event: &mut Event, resource_dir: &Utf8Path) {
    if let Event::OnTestEnd { result, .. } = event {
        for attachment in &mut result.attachments {
            if let Some(path) = &attachment.path
                && !Utf8Path::new(path).is_absolute()
            {
                attachment.path = Some(resource_dir.join(path).into_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::test_support::RecordingReporter;
    use pretty_assertions::assert_eq;
    use suiterun_protocol::{
        Attachment, Location, ProjectId, ProjectSnapshot, ResultId, SuiteId, SuiteKind,
        TestCaseEnd, TestResultEnd, TestResultStart, TestSnapshot, TestStatus,
    };

    fn test_snapshot(id: &str, title: &str) -> TestSnapshot {
        TestSnapshot {
            test_id: TestId::new(id),
            title: title.to_owned(),
            location: Location {
                file: "tests/a.spec.ts".to_owned(),
                line: 1,
                column: 1,
            },
            retries: 0,
            repeat_each_index: 0,
            annotations: Vec::new(),
            tags: Vec::new(),
        }
    }

    fn begin_event(shard: usize, workers: usize, test_ids: &[&str]) -> Event {
        let mut metadata = serde_json::Map::new();
        metadata.insert("shard".to_owned(), serde_json::json!(shard));
        Event::OnBegin {
            config: ConfigSummary {
                root_dir: "/repo".to_owned(),
                version: "1.0.0".to_owned(),
                workers,
                metadata,
            },
            projects: vec![ProjectSnapshot {
                id: ProjectId::new(format!("p-{shard}")),
                name: "chromium".to_owned(),
                test_dir: "tests".to_owned(),
                output_dir: "test-results".to_owned(),
                snapshot_dir: "tests".to_owned(),
                retries: 0,
                repeat_each: 1,
                timeout: 30000.0,
                grep: Vec::new(),
                grep_invert: Vec::new(),
                dependencies: Vec::new(),
                teardown: None,
                suites: vec![SuiteSnapshot {
                    id: SuiteId::new(format!("s-{shard}")),
                    title: "a.spec.ts".to_owned(),
                    kind: SuiteKind::File,
                    location: None,
                    parallel_mode: Default::default(),
                    suites: Vec::new(),
                    tests: test_ids
                        .iter()
                        .map(|id| test_snapshot(id, &format!("test {id}")))
                        .collect(),
                }],
            }],
        }
    }

    fn lifecycle_events(test_id: &str, status: TestStatus) -> Vec<Event> {
        let result_id = format!("{test_id}-r0");
        vec![
            Event::OnTestBegin {
                test_id: TestId::new(test_id),
                result: TestResultStart {
                    id: ResultId::new(result_id.clone()),
                    retry: 0,
                    worker_index: 0,
                    parallel_index: 0,
                    start_time: 1000.0,
                },
            },
            Event::OnTestEnd {
                test: TestCaseEnd {
                    test_id: TestId::new(test_id),
                    expected_status: TestStatus::Passed,
                    timeout: 30000.0,
                    annotations: Vec::new(),
                },
                result: TestResultEnd {
                    id: ResultId::new(result_id),
                    duration: 10.0,
                    status,
                    errors: Vec::new(),
                    attachments: Vec::new(),
                },
            },
        ]
    }

    fn end_event(status: RunStatus, start_time: f64, duration: f64) -> Event {
        Event::OnEnd {
            result: FullResult {
                status,
                start_time,
                duration,
            },
        }
    }

    fn write_shard(dir: &Utf8Path, name: &str, events: &[Event]) {
        let mut out = String::new();
        for event in events {
            out.push_str(&serde_json::to_string(event).unwrap());
            out.push('\n');
        }
        std::fs::write(dir.join(name), out).unwrap();
    }

    #[test]
    fn three_shards_merge_into_one_run() {
        let dir = camino_tempfile::tempdir().unwrap();
        let specs: &[(usize, usize, &[&str])] = &[
            (0, 2, &["t1", "t2"]),
            (1, 3, &["t3", "t4"]),
            (2, 1, &["t5", "t6"]),
        ];
        for &(shard, workers, ids) in specs {
            let mut events = vec![begin_event(shard, workers, ids)];
            for id in ids {
                events.extend(lifecycle_events(id, TestStatus::Passed));
            }
            events.push(end_event(RunStatus::Passed, 1000.0 + shard as f64, 50.0));
            events.push(Event::OnExit);
            write_shard(dir.path(), &format!("shard-{shard}.jsonl"), &events);
        }

        let receiver = merge_shard_logs(
            dir.path(),
            MergeOptions::default(),
            RecordingReporter::default(),
        )
        .unwrap();
        assert_eq!(receiver.config().workers, 6);

        let (tree, reporter) = receiver.into_parts();
        // One project suite, all six tests under it.
        let projects: Vec<_> = tree.child_suites(tree.root()).collect();
        assert_eq!(projects.len(), 1);
        assert_eq!(tree.suite(projects[0]).title, "chromium");
        assert_eq!(tree.all_tests(projects[0]).len(), 6);

        assert_eq!(reporter.trace.last().unwrap(), "exit");
        assert!(reporter.trace.contains(&"end passed".to_owned()));
    }

    #[test]
    fn end_status_takes_the_worst_shard() {
        let dir = camino_tempfile::tempdir().unwrap();
        write_shard(
            dir.path(),
            "a.jsonl",
            &[
                begin_event(0, 1, &["t1"]),
                end_event(RunStatus::Interrupted, 1000.0, 20.0),
            ],
        );
        write_shard(
            dir.path(),
            "b.jsonl",
            &[
                begin_event(1, 1, &["t2"]),
                end_event(RunStatus::Failed, 900.0, 50.0),
            ],
        );

        let receiver = merge_shard_logs(
            dir.path(),
            MergeOptions::default(),
            RecordingReporter::default(),
        )
        .unwrap();
        let (_, reporter) = receiver.into_parts();
        assert!(reporter.trace.contains(&"end failed".to_owned()));
    }

    #[test]
    fn colliding_test_ids_are_salted() {
        let dir = camino_tempfile::tempdir().unwrap();
        for (name, shard) in [("a.jsonl", 0usize), ("b.jsonl", 1)] {
            let mut events = vec![begin_event(shard, 1, &["t1"])];
            events.extend(lifecycle_events("t1", TestStatus::Passed));
            events.push(end_event(RunStatus::Passed, 0.0, 1.0));
            write_shard(dir.path(), name, &events);
        }

        let receiver = merge_shard_logs(
            dir.path(),
            MergeOptions::default(),
            RecordingReporter::default(),
        )
        .unwrap();
        let (tree, _) = receiver.into_parts();
        let tests = tree.all_tests(tree.root());
        let ids: Vec<String> = tests.iter().map(|&t| tree.test(t).id.to_string()).collect();
        assert_eq!(ids, vec!["t1", "t1-1"]);
        // Both lifecycles applied to their own test.
        for &test in &tests {
            assert_eq!(tree.test(test).results.len(), 1);
        }
    }

    #[test]
    fn metadata_union_is_later_wins() {
        let dir = camino_tempfile::tempdir().unwrap();
        write_shard(
            dir.path(),
            "a.jsonl",
            &[begin_event(0, 1, &["t1"]), end_event(RunStatus::Passed, 0.0, 1.0)],
        );
        write_shard(
            dir.path(),
            "b.jsonl",
            &[begin_event(1, 1, &["t2"]), end_event(RunStatus::Passed, 0.0, 1.0)],
        );

        let receiver = merge_shard_logs(
            dir.path(),
            MergeOptions::default(),
            RecordingReporter::default(),
        )
        .unwrap();
        assert_eq!(receiver.config().metadata["shard"], serde_json::json!(1));
    }

    #[test]
    fn no_begin_events_is_fatal() {
        let dir = camino_tempfile::tempdir().unwrap();
        write_shard(
            dir.path(),
            "a.jsonl",
            &[end_event(RunStatus::Passed, 0.0, 1.0), Event::OnExit],
        );

        let error = merge_shard_logs(
            dir.path(),
            MergeOptions::default(),
            RecordingReporter::default(),
        )
        .unwrap_err();
        assert!(matches!(error, MergeError::NoBeginEvents { .. }));
    }

    #[test]
    fn malformed_line_names_file_and_line() {
        let dir = camino_tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jsonl");
        std::fs::write(
            &path,
            format!(
                "{}\nnot json\n",
                serde_json::to_string(&begin_event(0, 1, &["t1"])).unwrap()
            ),
        )
        .unwrap();

        let error = merge_shard_logs(
            dir.path(),
            MergeOptions::default(),
            RecordingReporter::default(),
        )
        .unwrap_err();
        let MergeError::ParseEvent { path: got, line, .. } = error else {
            panic!("expected parse error");
        };
        assert_eq!(got, path);
        assert_eq!(line, 2);
    }

    #[test]
    fn relative_attachment_paths_resolve_against_resource_dir() {
        let dir = camino_tempfile::tempdir().unwrap();
        let mut events = vec![begin_event(0, 1, &["t1"])];
        let mut lifecycle = lifecycle_events("t1", TestStatus::Passed);
        if let Event::OnTestEnd { result, .. } = &mut lifecycle[1] {
            result.attachments.push(Attachment {
                name: "trace".to_owned(),
                content_type: "application/zip".to_owned(),
                path: Some("traces/t1.zip".to_owned()),
                base64: None,
            });
        }
        events.extend(lifecycle);
        events.push(end_event(RunStatus::Passed, 0.0, 1.0));
        write_shard(dir.path(), "a.jsonl", &events);

        let options = MergeOptions {
            resource_dir: Some(Utf8PathBuf::from("/resources")),
            ..MergeOptions::default()
        };
        let receiver =
            merge_shard_logs(dir.path(), options, RecordingReporter::default()).unwrap();
        let (tree, _) = receiver.into_parts();
        let test = tree.all_tests(tree.root())[0];
        let attachment = &tree.test(test).results[0].attachments[0];
        assert_eq!(attachment.path.as_deref(), Some("/resources/traces/t1.zip"));
    }
}
