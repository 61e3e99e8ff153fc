// Copyright (c) The suiterun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Opaque wire identifiers.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::fmt;

/// Defines a newtype wrapper around `SmolStr` for an opaque wire id.
macro_rules! define_wire_id {
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident;
    ) => {
        $(#[$attr])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
        #[serde(transparent)]
        $vis struct $name(SmolStr);

        impl $name {
            #[doc = concat!("Creates a new `", stringify!($name), "` from a string.")]
            pub fn new(id: impl Into<SmolStr>) -> Self {
                Self(id.into())
            }

            /// Returns the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self::new(id)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self::new(id)
            }
        }
    };
}

define_wire_id! {
    /// The stable id of a test case.
    ///
    /// Stays the same across every retry of the test within a run.
    pub struct TestId;
}

define_wire_id! {
    /// The id of one attempt (result) of a test case.
    pub struct ResultId;
}

define_wire_id! {
    /// The id of a step within a test result.
    pub struct StepId;
}

define_wire_id! {
    /// The stable id of a project, as reported on the wire.
    pub struct ProjectId;
}

define_wire_id! {
    /// The stable id of a suite node, as reported on the wire.
    pub struct SuiteId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_ids_are_transparent_strings() {
        let id = TestId::new("t-12");
        let json = serde_json::to_string(&id).expect("id serializes");
        assert_eq!(json, r#""t-12""#);
        let back: TestId = serde_json::from_str(&json).expect("id deserializes");
        assert_eq!(back, id);
        assert_eq!(back.as_str(), "t-12");
    }
}
