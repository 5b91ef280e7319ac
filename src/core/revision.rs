//! Revision markers recorded in the source tree on every deploy.
//!
//! The current marker holds the revision being deployed and the previous
//! marker holds whatever the current marker said before.

use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// The revision that was live before this deploy and the one being pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionPair {
    pub old: String,
    pub new: String,
}

impl RevisionPair {
    pub fn new(old: impl Into<String>, new: impl Into<String>) -> Self {
        Self {
            old: old.into(),
            new: new.into(),
        }
    }

    /// Exact match: nothing new is being pushed.
    pub fn is_same(&self) -> bool {
        self.old == self.new
    }

    /// Range argument for `git log` covering the pushed commits.
    pub fn log_range(&self) -> String {
        format!("{}..{}", self.old, self.new)
    }
}

/// Read a marker file, trimmed. An empty marker is an error.
pub fn read_marker(path: &Path) -> Result<String> {
    let create_hint = format!(
        "Create {} containing the currently deployed revision",
        path.display()
    );

    let revision = fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
                .with_hint(create_hint.clone())
        })?;

    if revision.is_empty() {
        return Err(Error::config_invalid_value(
            path.display().to_string(),
            None,
            "revision marker is empty",
        )
        .with_hint(create_hint));
    }

    Ok(revision)
}

/// Record `new_revision` as current and move the old marker to `previous`.
///
/// Returns the revision the current marker held before.
pub fn rotate_markers(current: &Path, previous: &Path, new_revision: &str) -> Result<String> {
    let old_revision = read_marker(current)?;

    fs::rename(current, previous).map_err(|e| {
        Error::internal_io(
            e.to_string(),
            Some(format!(
                "move {} to {}",
                current.display(),
                previous.display()
            )),
        )
    })?;

    fs::write(current, format!("{}\n", new_revision)).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("write {}", current.display())))
    })?;

    Ok(old_revision)
}
