//! Authentication gate.
//!
//! Credential validation lives outside this crate; the transport only needs
//! a yes/no answer per presented token. Input and resize are refused until
//! the connection is authenticated and attached.

/// Boolean authentication decision over an optional presented token.
pub trait AuthGate: Send + Sync {
    /// Whether the presented credential is acceptable.
    fn authenticate(&self, token: Option<&str>) -> bool;
}

/// Gate that accepts everyone. Used when authentication is disabled.
pub struct AllowAll;

impl AuthGate for AllowAll {
    fn authenticate(&self, _token: Option<&str>) -> bool {
        true
    }
}

/// Gate that requires one pre-shared token.
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    /// Gate accepting exactly `token`.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl AuthGate for StaticToken {
    fn authenticate(&self, token: Option<&str>) -> bool {
        token == Some(self.token.as_str())
    }
}
