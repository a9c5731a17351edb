//! Newtype wrappers for string identifiers, providing compile-time type safety.
//!
//! All newtypes serialize/deserialize as plain strings, so definitions and
//! events keep their plain JSON/TOML shape.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string.
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Return the inner string as a slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<String> for $name {
            fn eq(&self, other: &String) -> bool {
                self.0 == *other
            }
        }

        impl PartialEq<$name> for String {
            fn eq(&self, other: &$name) -> bool {
                *self == other.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Caller-chosen key identifying a workspace; the registry never generates one.
    WorkspaceId
);

string_newtype!(
    /// Identifier assigned to a provisioned machine by its environment engine.
    MachineId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_id_display_and_as_ref() {
        let id = WorkspaceId::new("workspace-1");
        assert_eq!(id.to_string(), "workspace-1");
        assert_eq!(id.as_str(), "workspace-1");
        assert_eq!(AsRef::<str>::as_ref(&id), "workspace-1");
    }

    #[test]
    fn workspace_id_serializes_as_plain_string() {
        let id = WorkspaceId::new("workspace-abc");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"workspace-abc\"");
        let back: WorkspaceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn machine_id_from_str_and_into_inner() {
        let mid = MachineId::from("machine-42");
        assert_eq!(mid.as_str(), "machine-42");
        assert_eq!(mid.into_inner(), "machine-42");
    }

    #[test]
    fn string_comparisons() {
        let id = WorkspaceId::new("same");
        assert!(id == *"same");
        assert_eq!(id, String::from("same"));
        assert_eq!(String::from("same"), id);
        assert_ne!(id, WorkspaceId::new("other"));
    }
}
