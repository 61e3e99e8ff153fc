// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Partitioning projects into sequential phases.
//!
//! Projects within one phase run concurrently; phases run strictly in
//! sequence. A project is placed into the earliest phase in which every one
//! of its prerequisites has already been placed in a previous phase.

use crate::dispatch::TestGroup;
use crate::errors::PhaseCycleError;
use crate::projects::{ProjectConfig, ProjectGraph, ProjectIndex};
use crate::report::{ReportTree, SuiteNodeKind, TestIndex};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Why one project must wait for another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    /// An explicitly declared dependency.
    Declared,
    /// A teardown project waits for every setup project that names it and
    /// for every project depending on those setups, without any of them
    /// declaring anything.
    TeardownFollowsSetups,
}

/// A prerequisite edge of a project.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Prerequisite {
    /// The project that must be placed first.
    pub project: ProjectIndex,
    /// Why the edge exists.
    pub kind: EdgeKind,
}

/// One project within a phase, with its precomputed test groups.
#[derive(Clone, Debug)]
pub struct PhaseProject {
    /// The project.
    pub project: ProjectIndex,
    /// Test groups to dispatch for this project.
    pub groups: Vec<TestGroup>,
}

/// One phase of the run.
#[derive(Clone, Debug, Default)]
pub struct Phase {
    /// Projects of the phase, in closure order.
    pub projects: Vec<PhaseProject>,
}

impl Phase {
    /// Total number of test groups across the phase's projects.
    pub fn group_count(&self) -> usize {
        self.projects.iter().map(|p| p.groups.len()).sum()
    }
}

/// The complete phase plan for a run.
#[derive(Clone, Debug)]
pub struct PhasePlan {
    /// Phases in execution order.
    pub phases: Vec<Phase>,
    /// Workers actually worth spawning: the configured count capped by the
    /// maximum number of groups any single phase can run concurrently.
    pub actual_workers: usize,
}

/// Splits a project's tests into dispatchable groups.
pub trait TestGrouper {
    /// Produces the groups for one project. Group and test order must be
    /// deterministic for identical input.
    fn groups(
        &self,
        tree: &ReportTree,
        project: ProjectIndex,
        config: &ProjectConfig,
    ) -> Vec<TestGroup>;
}

/// Groups every test of a file suite together, one group per file.
#[derive(Clone, Copy, Debug, Default)]
pub struct ByFileGrouper;

impl TestGrouper for ByFileGrouper {
    fn groups(
        &self,
        tree: &ReportTree,
        project: ProjectIndex,
        config: &ProjectConfig,
    ) -> Vec<TestGroup> {
        let Some(project_suite) = tree
            .child_suites(tree.root())
            .find(|&s| tree.suite(s).title == config.name)
        else {
            return Vec::new();
        };
        tree.child_suites(project_suite)
            .filter(|&s| tree.suite(s).kind == SuiteNodeKind::File)
            .filter_map(|file| {
                let tests: Vec<TestIndex> = tree.all_tests(file);
                (!tests.is_empty()).then_some(TestGroup { project, tests })
            })
            .collect()
    }
}

// The setups and every project transitively depending on one of them, in
// deterministic order: the setups first, then dependents as discovered in
// graph order.
fn setups_and_dependents(graph: &ProjectGraph, setups: &[ProjectIndex]) -> Vec<ProjectIndex> {
    let mut members: Vec<ProjectIndex> = setups.to_vec();
    let mut seen: HashSet<ProjectIndex> = members.iter().copied().collect();
    let mut changed = true;
    while changed {
        changed = false;
        for (index, node) in graph.iter() {
            if !seen.contains(&index) && node.deps.iter().any(|dep| seen.contains(dep)) {
                seen.insert(index);
                members.push(index);
                changed = true;
            }
        }
    }
    members
}

/// Computes a project's prerequisites: declared dependencies plus, for
/// teardown projects, every setup project that names them and every project
/// depending on those setups. The wider edge set keeps a teardown out of any
/// phase where its setups' state is still in use.
pub fn prerequisites(
    graph: &ProjectGraph,
    teardown_to_setups: &HashMap<ProjectIndex, Vec<ProjectIndex>>,
    project: ProjectIndex,
) -> Vec<Prerequisite> {
    let mut edges: Vec<Prerequisite> = graph
        .node(project)
        .deps
        .iter()
        .map(|&dep| Prerequisite {
            project: dep,
            kind: EdgeKind::Declared,
        })
        .collect();
    if let Some(setups) = teardown_to_setups.get(&project) {
        for consumer in setups_and_dependents(graph, setups) {
            if consumer != project && !edges.iter().any(|e| e.project == consumer) {
                edges.push(Prerequisite {
                    project: consumer,
                    kind: EdgeKind::TeardownFollowsSetups,
                });
            }
        }
    }
    edges
}

/// Partitions the closure into phases and precomputes each project's test
/// groups.
///
/// Placement is round-based: each round admits every unplaced project whose
/// prerequisites were all placed in earlier rounds. A round that admits
/// nothing while projects remain means the prerequisite edges form a cycle.
/// The result is deterministic for identical graph and closure order.
pub fn plan_phases(
    graph: &ProjectGraph,
    closure: &[ProjectIndex],
    tree: &ReportTree,
    grouper: &dyn TestGrouper,
    configured_workers: usize,
) -> Result<PhasePlan, PhaseCycleError> {
    let teardown_to_setups = graph.teardown_to_setups();
    let mut placed: HashSet<ProjectIndex> = HashSet::new();
    let mut phases: Vec<Phase> = Vec::new();

    while placed.len() < closure.len() {
        let mut phase = Phase::default();
        for &project in closure {
            if placed.contains(&project) {
                continue;
            }
            let ready = prerequisites(graph, &teardown_to_setups, project)
                .iter()
                .all(|edge| placed.contains(&edge.project));
            if ready {
                let groups = grouper.groups(tree, project, &graph.node(project).config);
                phase.projects.push(PhaseProject { project, groups });
            }
        }
        if phase.projects.is_empty() {
            let stuck = closure
                .iter()
                .filter(|p| !placed.contains(p))
                .map(|&p| graph.node(p).config.name.clone())
                .collect();
            return Err(PhaseCycleError { stuck });
        }
        // Same-round members must not satisfy each other's prerequisites,
        // so placement is recorded only after the round completes.
        for entry in &phase.projects {
            placed.insert(entry.project);
        }
        debug!(
            phase = phases.len(),
            projects = phase.projects.len(),
            groups = phase.group_count(),
            "created phase"
        );
        phases.push(phase);
    }

    let max_concurrent = phases.iter().map(Phase::group_count).max().unwrap_or(0);
    let actual_workers = configured_workers.min(max_concurrent.max(1));
    Ok(PhasePlan {
        phases,
        actual_workers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{suite_node, test_node};
    use pretty_assertions::assert_eq;
    use suiterun_protocol::{Location, TestId};

    struct OneGroupPerProject;

    impl TestGrouper for OneGroupPerProject {
        fn groups(
            &self,
            _tree: &ReportTree,
            project: ProjectIndex,
            _config: &ProjectConfig,
        ) -> Vec<TestGroup> {
            vec![TestGroup {
                project,
                tests: Vec::new(),
            }]
        }
    }

    fn graph_from(specs: &[(&str, &[&str], Option<&str>)]) -> ProjectGraph {
        let configs = specs
            .iter()
            .map(|(name, deps, teardown)| {
                let mut c = ProjectConfig::new(*name, format!("/repo/{name}"));
                c.dependencies = deps.iter().map(|d| (*d).to_owned()).collect();
                c.teardown = teardown.map(str::to_owned);
                c
            })
            .collect();
        ProjectGraph::resolve(configs).unwrap()
    }

    fn phase_names(graph: &ProjectGraph, plan: &PhasePlan) -> Vec<Vec<String>> {
        plan.phases
            .iter()
            .map(|phase| {
                phase
                    .projects
                    .iter()
                    .map(|p| graph.node(p.project).config.name.clone())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn independent_projects_share_one_phase() {
        let graph = graph_from(&[("a", &[], None), ("b", &[], None)]);
        let closure: Vec<_> = graph.iter().map(|(i, _)| i).collect();
        let plan =
            plan_phases(&graph, &closure, &ReportTree::new(), &OneGroupPerProject, 4).unwrap();
        assert_eq!(phase_names(&graph, &plan), vec![vec!["a", "b"]]);
    }

    #[test]
    fn dependencies_push_projects_into_later_phases() {
        let graph = graph_from(&[
            ("setup", &[], None),
            ("chromium", &["setup"], None),
            ("firefox", &["setup"], None),
        ]);
        let closure: Vec<_> = graph.iter().map(|(i, _)| i).collect();
        let plan =
            plan_phases(&graph, &closure, &ReportTree::new(), &OneGroupPerProject, 4).unwrap();
        assert_eq!(
            phase_names(&graph, &plan),
            vec![vec!["setup"], vec!["chromium", "firefox"]]
        );
    }

    #[test]
    fn teardown_waits_for_all_its_setups() {
        let graph = graph_from(&[
            ("setup-db", &[], Some("cleanup")),
            ("setup-auth", &[], Some("cleanup")),
            ("cleanup", &[], None),
        ]);
        let closure: Vec<_> = graph.iter().map(|(i, _)| i).collect();
        let plan =
            plan_phases(&graph, &closure, &ReportTree::new(), &OneGroupPerProject, 4).unwrap();
        assert_eq!(
            phase_names(&graph, &plan),
            vec![vec!["setup-db", "setup-auth"], vec!["cleanup"]]
        );

        let edges = prerequisites(&graph, &graph.teardown_to_setups(), ProjectIndex(2));
        assert!(edges
            .iter()
            .all(|e| e.kind == EdgeKind::TeardownFollowsSetups));
        assert_eq!(edges.len(), 2);
    }

    #[test]
    fn teardown_waits_for_its_setups_dependents() {
        let graph = graph_from(&[
            ("setup", &[], Some("cleanup")),
            ("e2e", &["setup"], None),
            ("cleanup", &[], None),
        ]);
        let closure: Vec<_> = graph.iter().map(|(i, _)| i).collect();
        let plan =
            plan_phases(&graph, &closure, &ReportTree::new(), &OneGroupPerProject, 4).unwrap();
        // cleanup must not be co-scheduled with e2e, which is still using
        // setup's state.
        assert_eq!(
            phase_names(&graph, &plan),
            vec![vec!["setup"], vec!["e2e"], vec!["cleanup"]]
        );

        let edges = prerequisites(&graph, &graph.teardown_to_setups(), ProjectIndex(2));
        assert_eq!(edges.len(), 2);
        assert!(edges
            .iter()
            .all(|e| e.kind == EdgeKind::TeardownFollowsSetups));
    }

    #[test]
    fn planning_is_deterministic() {
        let graph = graph_from(&[
            ("a", &[], None),
            ("b", &["a"], None),
            ("c", &["a"], None),
            ("d", &["b", "c"], None),
        ]);
        let closure: Vec<_> = graph.iter().map(|(i, _)| i).collect();
        let tree = ReportTree::new();
        let first = plan_phases(&graph, &closure, &tree, &OneGroupPerProject, 8).unwrap();
        let second = plan_phases(&graph, &closure, &tree, &OneGroupPerProject, 8).unwrap();
        assert_eq!(phase_names(&graph, &first), phase_names(&graph, &second));
        assert_eq!(
            phase_names(&graph, &first),
            vec![vec!["a"], vec!["b", "c"], vec!["d"]]
        );
    }

    #[test]
    fn cycle_errors_out_instead_of_hanging() {
        let graph = graph_from(&[("a", &["b"], None), ("b", &["a"], None)]);
        let closure: Vec<_> = graph.iter().map(|(i, _)| i).collect();
        let error = plan_phases(&graph, &closure, &ReportTree::new(), &OneGroupPerProject, 4)
            .unwrap_err();
        assert_eq!(
            error,
            PhaseCycleError {
                stuck: vec!["a".to_owned(), "b".to_owned()],
            }
        );
    }

    #[test]
    fn actual_workers_capped_by_max_concurrent_groups() {
        let graph = graph_from(&[("a", &[], None), ("b", &[], None)]);
        let closure: Vec<_> = graph.iter().map(|(i, _)| i).collect();
        let plan =
            plan_phases(&graph, &closure, &ReportTree::new(), &OneGroupPerProject, 16).unwrap();
        // Two projects, one group each, in a single phase.
        assert_eq!(plan.actual_workers, 2);

        let plan =
            plan_phases(&graph, &closure, &ReportTree::new(), &OneGroupPerProject, 1).unwrap();
        assert_eq!(plan.actual_workers, 1);
    }

    #[test]
    fn by_file_grouper_groups_per_file() {
        let mut tree = ReportTree::new();
        let root = tree.root();
        let project_suite = tree.add_suite(root, suite_node("chromium", SuiteNodeKind::Project));
        let file_a = tree.add_suite(project_suite, suite_node("a.spec.ts", SuiteNodeKind::File));
        let file_b = tree.add_suite(project_suite, suite_node("b.spec.ts", SuiteNodeKind::File));
        let loc = Location {
            file: "a.spec.ts".to_owned(),
            line: 1,
            column: 1,
        };
        let t1 = tree.add_test(file_a, test_node(TestId::new("t1"), "one", loc.clone()));
        let t2 = tree.add_test(file_a, test_node(TestId::new("t2"), "two", loc.clone()));
        let t3 = tree.add_test(file_b, test_node(TestId::new("t3"), "three", loc));

        let config = ProjectConfig::new("chromium", "/repo/tests");
        let groups = ByFileGrouper.groups(&tree, ProjectIndex(0), &config);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].tests, vec![t1, t2]);
        assert_eq!(groups[1].tests, vec![t3]);
    }
}
