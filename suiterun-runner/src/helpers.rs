// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use camino::{Utf8Path, Utf8PathBuf};
use suiterun_protocol::Location;

/// Makes `path` relative to `root_dir` for the wire.
///
/// Paths outside the root are passed through unchanged rather than being
/// emitted with `..` segments; the receiver treats already-relative paths as
/// root-relative and absolute paths as final.
pub(crate) fn wire_path(root_dir: &Utf8Path, path: &Utf8Path) -> String {
    match path.strip_prefix(root_dir) {
        Ok(relative) => relative.to_string(),
        Err(_) => path.to_string(),
    }
}

/// Resolves a wire path against `root_dir`.
pub(crate) fn resolve_path(root_dir: &Utf8Path, wire: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(wire);
    if path.is_absolute() {
        path.to_owned()
    } else {
        root_dir.join(path)
    }
}

/// Makes a location's file path wire-relative.
pub(crate) fn wire_location(root_dir: &Utf8Path, location: &Location) -> Location {
    Location {
        file: wire_path(root_dir, Utf8Path::new(&location.file)),
        line: location.line,
        column: location.column,
    }
}

/// Re-absolutizes a location received from the wire.
pub(crate) fn resolve_location(root_dir: &Utf8Path, location: &Location) -> Location {
    Location {
        file: resolve_path(root_dir, &location.file).into_string(),
        line: location.line,
        column: location.column,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_paths_are_root_relative() {
        let root = Utf8Path::new("/work/repo");
        assert_eq!(wire_path(root, Utf8Path::new("/work/repo/tests/a.rs")), "tests/a.rs");
        // Outside the root: passed through.
        assert_eq!(wire_path(root, Utf8Path::new("/other/b.rs")), "/other/b.rs");
    }

    #[test]
    fn resolve_round_trips() {
        let root = Utf8Path::new("/work/repo");
        let original = Utf8Path::new("/work/repo/tests/a.rs");
        let wire = wire_path(root, original);
        assert_eq!(resolve_path(root, &wire), original);
    }
}
