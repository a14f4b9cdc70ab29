//! Workspace existence gate.
//!
//! External collaborator boundary: validates that a working directory is
//! acceptable before a session may be created there.

use std::path::{Path, PathBuf};

use tether_core::errors::SessionError;

/// Validates a working directory before session creation.
pub trait WorkspaceGate: Send + Sync {
    /// Returns `Ok` when a session may be created under `path`.
    fn validate(&self, path: &Path) -> Result<(), SessionError>;
}

/// Gate that requires the path to be an existing directory inside a
/// configured root.
pub struct AllowedRootGate {
    root: PathBuf,
}

impl AllowedRootGate {
    /// Gate rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl WorkspaceGate for AllowedRootGate {
    fn validate(&self, path: &Path) -> Result<(), SessionError> {
        if !path.is_dir() {
            return Err(SessionError::WorkspaceRejected(format!(
                "not a directory: {}",
                path.display()
            )));
        }
        // Canonicalize both sides so `..` segments and symlinks cannot
        // escape the root.
        let canonical = path
            .canonicalize()
            .map_err(|e| SessionError::WorkspaceRejected(format!("{}: {e}", path.display())))?;
        let root = self
            .root
            .canonicalize()
            .map_err(|e| SessionError::WorkspaceRejected(format!("{}: {e}", self.root.display())))?;
        if !canonical.starts_with(&root) {
            return Err(SessionError::WorkspaceRejected(format!(
                "outside allowed root: {}",
                path.display()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn accepts_directory_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let child = dir.path().join("project");
        std::fs::create_dir(&child).unwrap();

        let gate = AllowedRootGate::new(dir.path());
        assert!(gate.validate(&child).is_ok());
    }

    #[test]
    fn rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let gate = AllowedRootGate::new(dir.path());
        assert_matches!(
            gate.validate(&dir.path().join("missing")),
            Err(SessionError::WorkspaceRejected(_))
        );
    }

    #[test]
    fn rejects_path_outside_root() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();

        let gate = AllowedRootGate::new(root.path());
        assert_matches!(
            gate.validate(other.path()),
            Err(SessionError::WorkspaceRejected(_))
        );
    }

    #[test]
    fn rejects_parent_traversal() {
        let root = tempfile::tempdir().unwrap();
        let child = root.path().join("project");
        std::fs::create_dir(&child).unwrap();

        let gate = AllowedRootGate::new(&child);
        let sneaky = child.join("..");
        assert_matches!(
            gate.validate(&sneaky),
            Err(SessionError::WorkspaceRejected(_))
        );
    }
}
