// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by suiterun.

use camino::Utf8PathBuf;
use thiserror::Error;

/// An error that occurred while selecting projects by name.
///
/// Raised synchronously during planning, before any phase runs.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProjectFilterError {
    /// One or more requested project names did not match any project.
    #[error(
        "project(s) {} not found (available projects: {})",
        .missing.join(", "),
        .available.join(", "),
    )]
    UnknownNames {
        /// The requested names with no match.
        missing: Vec<String>,
        /// Every project name that exists in the configuration.
        available: Vec<String>,
    },

    /// No project in the configuration has a non-empty name.
    #[error("no named projects are defined in the configuration")]
    NoNamedProjects,
}

/// A configuration error found while resolving project dependencies.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProjectResolveError {
    /// A project depends on a name that doesn't exist.
    #[error(
        "project `{project}` depends on unknown project `{dependency}` (available projects: {})",
        .available.join(", "),
    )]
    UnknownDependency {
        /// The project declaring the dependency.
        project: String,
        /// The unmatched dependency name.
        dependency: String,
        /// Every project name that exists in the configuration.
        available: Vec<String>,
    },

    /// A project lists the same dependency twice.
    #[error("project `{project}` depends on `{dependency}` more than once")]
    DuplicateDependency {
        /// The project declaring the dependency.
        project: String,
        /// The duplicated dependency name.
        dependency: String,
    },

    /// A project names an unknown teardown project.
    #[error("project `{project}` declares unknown teardown project `{teardown}`")]
    UnknownTeardown {
        /// The project declaring the teardown.
        project: String,
        /// The unmatched teardown name.
        teardown: String,
    },

    /// Dependency traversal exceeded its depth bound, which indicates a
    /// dependency cycle.
    #[error("circular dependency detected while traversing project `{project}`")]
    CircularDependency {
        /// The project at which the depth bound was exceeded.
        project: String,
    },
}

/// An error preparing a test run, before any task starts.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RunSetupError {
    /// Project selection failed.
    #[error(transparent)]
    Filter(#[from] ProjectFilterError),

    /// Dependency resolution failed.
    #[error(transparent)]
    Resolve(#[from] ProjectResolveError),
}

/// A dependency cycle detected while partitioning projects into phases.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(
    "circular dependency between projects prevents scheduling: {}",
    .stuck.join(", "),
)]
pub struct PhaseCycleError {
    /// Projects that could not be placed into any phase.
    pub stuck: Vec<String>,
}

/// An error that occurred while merging per-shard event logs.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The shard directory could not be read.
    #[error("failed to read shard directory `{dir}`")]
    ReadDir {
        /// The directory being scanned.
        dir: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A shard log file could not be read.
    #[error("failed to read shard log `{path}`")]
    ReadFile {
        /// The file being read.
        path: Utf8PathBuf,
        /// The underlying error.
        #[source]
        error: std::io::Error,
    },

    /// A line in a shard log was not a valid event.
    #[error("invalid event at {path}:{line}")]
    ParseEvent {
        /// The file being parsed.
        path: Utf8PathBuf,
        /// 1-based line number.
        line: usize,
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },

    /// No shard file contained a begin event, so there is nothing to merge.
    #[error("no begin events found in any shard log under `{dir}`")]
    NoBeginEvents {
        /// The directory that was scanned.
        dir: Utf8PathBuf,
    },
}

/// An error that occurred while writing a shard event log.
#[derive(Debug, Error)]
#[error("failed to write event log `{path}`")]
pub struct EventLogWriteError {
    pub(crate) path: Utf8PathBuf,
    #[source]
    pub(crate) error: std::io::Error,
}

/// An error that occurred while installing OS signal handlers.
#[derive(Debug, Error)]
#[error("error setting up signal handler")]
pub struct SignalHandlerSetupError(#[from] pub(crate) std::io::Error);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_error_enumerates_available_names() {
        let error = ProjectFilterError::UnknownNames {
            missing: vec!["Chrome".to_owned()],
            available: vec!["chromium".to_owned(), "firefox".to_owned()],
        };
        insta::assert_snapshot!(
            error.to_string(),
            @"project(s) Chrome not found (available projects: chromium, firefox)"
        );
    }

    #[test]
    fn cycle_error_names_stuck_projects() {
        let error = PhaseCycleError {
            stuck: vec!["a".to_owned(), "b".to_owned()],
        };
        insta::assert_snapshot!(
            error.to_string(),
            @"circular dependency between projects prevents scheduling: a, b"
        );
    }
}
