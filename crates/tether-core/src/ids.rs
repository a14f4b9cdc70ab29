//! Branded identifier newtypes.
//!
//! Every identifier in Tether is a prefixed UUID v7 string (`sess_…`,
//! `be_…`, `conn_…`). The newtypes keep session ids, backend ids, and
//! connection ids from being swapped at call sites; serde sees them as
//! plain strings for wire compatibility.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh id with the type prefix.
            #[must_use]
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()))
            }

            /// Wrap an existing id string (e.g. read back from the index).
            #[must_use]
            pub fn from_string(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            /// The raw string form.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }
    };
}

branded_id!(
    /// Stable id of a logical session. Assigned once at creation, never
    /// changes for the life of the session.
    SessionId,
    "sess"
);

branded_id!(
    /// Id of the process/connection actually doing the work. May be
    /// replaced during a session's life (respawn, new conversation id)
    /// without changing the [`SessionId`].
    BackendId,
    "be"
);

branded_id!(
    /// Id of a transport connection (one WebSocket).
    ConnectionId,
    "conn"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix() {
        assert!(SessionId::generate().as_str().starts_with("sess_"));
        assert!(BackendId::generate().as_str().starts_with("be_"));
        assert!(ConnectionId::generate().as_str().starts_with("conn_"));
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn serde_is_transparent() {
        let id = SessionId::from_string("sess_fixed");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"sess_fixed\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn round_trips_raw_strings() {
        let id = BackendId::from_string("be_external_7");
        assert_eq!(id.as_str(), "be_external_7");
        assert_eq!(id.to_string(), "be_external_7");
    }
}
