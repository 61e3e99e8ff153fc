// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Project configuration, name filtering and dependency resolution.

use crate::errors::{ProjectFilterError, ProjectResolveError};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{HashMap, HashSet};
use suiterun_protocol::ProjectSnapshot;

/// The resolved configuration of one project.
#[derive(Clone, Debug, PartialEq)]
pub struct ProjectConfig {
    /// Project name. Unique within a configuration; may be empty in legacy
    /// single-project setups.
    pub name: String,
    /// Directory the project's tests live under.
    pub test_dir: Utf8PathBuf,
    /// Directory test output is written to.
    pub output_dir: Utf8PathBuf,
    /// Directory snapshots are read from.
    pub snapshot_dir: Utf8PathBuf,
    /// Names of projects this project depends on.
    pub dependencies: Vec<String>,
    /// Name of the project that tears this one down, if any.
    pub teardown: Option<String>,
    /// Per-test retry count.
    pub retries: u32,
    /// Number of times each test is repeated.
    pub repeat_each: u32,
    /// Per-test timeout in milliseconds.
    pub timeout: f64,
    /// Title filter patterns.
    pub grep: Vec<String>,
    /// Inverted title filter patterns.
    pub grep_invert: Vec<String>,
}

impl ProjectConfig {
    /// Creates a configuration with defaults for everything but the name and
    /// test directory.
    pub fn new(name: impl Into<String>, test_dir: impl Into<Utf8PathBuf>) -> Self {
        let test_dir = test_dir.into();
        Self {
            name: name.into(),
            output_dir: test_dir.join("test-results"),
            snapshot_dir: test_dir.clone(),
            test_dir,
            dependencies: Vec::new(),
            teardown: None,
            retries: 0,
            repeat_each: 1,
            timeout: 30_000.0,
            grep: Vec::new(),
            grep_invert: Vec::new(),
        }
    }

    /// Rebuilds a configuration from a wire snapshot, re-absolutizing the
    /// directory fields against `root_dir`.
    pub(crate) fn from_snapshot(root_dir: &Utf8Path, snapshot: &ProjectSnapshot) -> Self {
        Self {
            name: snapshot.name.clone(),
            test_dir: crate::helpers::resolve_path(root_dir, &snapshot.test_dir),
            output_dir: crate::helpers::resolve_path(root_dir, &snapshot.output_dir),
            snapshot_dir: crate::helpers::resolve_path(root_dir, &snapshot.snapshot_dir),
            dependencies: snapshot.dependencies.clone(),
            teardown: snapshot.teardown.clone(),
            retries: snapshot.retries,
            repeat_each: snapshot.repeat_each,
            timeout: snapshot.timeout,
            grep: snapshot.grep.clone(),
            grep_invert: snapshot.grep_invert.clone(),
        }
    }
}

/// Dense index of a project within a [`ProjectGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectIndex(pub(crate) usize);

/// Whether a project was requested directly or pulled in as a dependency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProjectRole {
    /// Requested directly (or part of the default selection).
    #[default]
    TopLevel,
    /// Pulled into the run only because a top-level project depends on it.
    Dependency,
}

/// A project with its dependency edges resolved to indices.
#[derive(Clone, Debug)]
pub struct ProjectNode {
    /// The project's configuration.
    pub config: ProjectConfig,
    /// Resolved dependency edges.
    pub deps: Vec<ProjectIndex>,
    /// Resolved teardown edge.
    pub teardown: Option<ProjectIndex>,
    /// The project's role in the current run.
    pub role: ProjectRole,
}

/// All projects of a configuration, with resolved edges.
#[derive(Clone, Debug, Default)]
pub struct ProjectGraph {
    nodes: Vec<ProjectNode>,
}

impl ProjectGraph {
    /// Resolves dependency and teardown names to indices.
    ///
    /// Unknown names and duplicated dependency entries are configuration
    /// errors, reported before anything runs.
    pub fn resolve(configs: Vec<ProjectConfig>) -> Result<Self, ProjectResolveError> {
        let by_name: HashMap<&str, ProjectIndex> = configs
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.as_str(), ProjectIndex(i)))
            .collect();
        let available: Vec<String> = configs.iter().map(|c| c.name.clone()).collect();

        let mut nodes = Vec::with_capacity(configs.len());
        for config in &configs {
            let mut deps = Vec::with_capacity(config.dependencies.len());
            let mut seen = HashSet::new();
            for dep in &config.dependencies {
                if !seen.insert(dep.as_str()) {
                    return Err(ProjectResolveError::DuplicateDependency {
                        project: config.name.clone(),
                        dependency: dep.clone(),
                    });
                }
                let index = by_name.get(dep.as_str()).copied().ok_or_else(|| {
                    ProjectResolveError::UnknownDependency {
                        project: config.name.clone(),
                        dependency: dep.clone(),
                        available: available.clone(),
                    }
                })?;
                deps.push(index);
            }
            let teardown = match &config.teardown {
                Some(name) => Some(by_name.get(name.as_str()).copied().ok_or_else(|| {
                    ProjectResolveError::UnknownTeardown {
                        project: config.name.clone(),
                        teardown: name.clone(),
                    }
                })?),
                None => None,
            };
            nodes.push(ProjectNode {
                config: config.clone(),
                deps,
                teardown,
                role: ProjectRole::TopLevel,
            });
        }
        Ok(Self { nodes })
    }

    /// Borrows a project node.
    pub fn node(&self, index: ProjectIndex) -> &ProjectNode {
        &self.nodes[index.0]
    }

    /// Number of projects.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over all projects.
    pub fn iter(&self) -> impl Iterator<Item = (ProjectIndex, &ProjectNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (ProjectIndex(i), n))
    }

    /// Selects projects by name.
    ///
    /// Matching is case-insensitive and exact. With no filters, every
    /// project is selected; an empty selection because no project carries a
    /// name is an error, as is any filter that matches nothing.
    pub fn filter_projects(
        &self,
        filters: &[String],
    ) -> Result<Vec<ProjectIndex>, ProjectFilterError> {
        if filters.is_empty() {
            if self.nodes.iter().all(|n| n.config.name.is_empty()) {
                return Err(ProjectFilterError::NoNamedProjects);
            }
            return Ok((0..self.nodes.len()).map(ProjectIndex).collect());
        }

        let mut selected = Vec::new();
        let mut missing = Vec::new();
        for filter in filters {
            let wanted = filter.to_lowercase();
            let matches: Vec<ProjectIndex> = self
                .iter()
                .filter(|(_, n)| n.config.name.to_lowercase() == wanted)
                .map(|(i, _)| i)
                .collect();
            if matches.is_empty() {
                missing.push(filter.clone());
            } else {
                for index in matches {
                    if !selected.contains(&index) {
                        selected.push(index);
                    }
                }
            }
        }
        if !missing.is_empty() {
            return Err(ProjectFilterError::UnknownNames {
                missing,
                available: self
                    .nodes
                    .iter()
                    .map(|n| n.config.name.clone())
                    .filter(|n| !n.is_empty())
                    .collect(),
            });
        }
        Ok(selected)
    }

    /// Computes the transitive closure of the given top-level projects,
    /// following both dependency and teardown edges, and marks roles.
    ///
    /// Traversal depth is bounded; exceeding the bound means the declared
    /// edges form a cycle, which is a configuration error. Returns projects
    /// in visit order, top-level selections first.
    pub fn build_closure(
        &mut self,
        top_level: &[ProjectIndex],
    ) -> Result<Vec<ProjectIndex>, ProjectResolveError> {
        const MAX_DEPTH: usize = 100;

        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = Vec::new();
        for &start in top_level {
            self.visit(start, MAX_DEPTH, &mut order, &mut seen, &mut stack)?;
        }

        let top: HashSet<ProjectIndex> = top_level.iter().copied().collect();
        for &index in &order {
            self.nodes[index.0].role = if top.contains(&index) {
                ProjectRole::TopLevel
            } else {
                ProjectRole::Dependency
            };
        }
        Ok(order)
    }

    fn visit(
        &self,
        index: ProjectIndex,
        max_depth: usize,
        order: &mut Vec<ProjectIndex>,
        seen: &mut HashSet<ProjectIndex>,
        stack: &mut Vec<ProjectIndex>,
    ) -> Result<(), ProjectResolveError> {
        // A back edge to a project on the current path is a cycle. The depth
        // bound guards against pathological (non-cyclic) configurations.
        if stack.contains(&index) || stack.len() > max_depth {
            return Err(ProjectResolveError::CircularDependency {
                project: self.nodes[index.0].config.name.clone(),
            });
        }
        if !seen.insert(index) {
            return Ok(());
        }
        order.push(index);
        stack.push(index);
        let node = &self.nodes[index.0];
        for &dep in &node.deps {
            self.visit(dep, max_depth, order, seen, stack)?;
        }
        if let Some(teardown) = node.teardown {
            self.visit(teardown, max_depth, order, seen, stack)?;
        }
        stack.pop();
        Ok(())
    }

    /// Groups setup projects by their declared teardown project.
    ///
    /// The planner uses this to make each teardown project wait for all of
    /// its setups, and the run-tests task uses it to thread environment
    /// produced by setups into their teardown.
    pub fn teardown_to_setups(&self) -> HashMap<ProjectIndex, Vec<ProjectIndex>> {
        let mut map: HashMap<ProjectIndex, Vec<ProjectIndex>> = HashMap::new();
        for (index, node) in self.iter() {
            if let Some(teardown) = node.teardown {
                map.entry(teardown).or_default().push(index);
            }
        }
        map
    }
}
