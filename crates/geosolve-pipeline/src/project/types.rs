//! Project metadata and audit log entries.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Metadata about a project document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
    /// Version of the document layout that wrote this project.
    pub schema_version: u32,

    /// Unix timestamp when the project was created (seconds since epoch).
    pub created_at: u64,

    /// Unix timestamp when the project was last modified (seconds since epoch).
    pub last_modified: u64,

    /// Optional user-provided description.
    #[serde(default)]
    pub description: Option<String>,
}

impl ProjectMetadata {
    pub fn new(schema_version: u32) -> Self {
        let now = current_timestamp();
        Self {
            schema_version,
            created_at: now,
            last_modified: now,
            description: None,
        }
    }

    pub fn with_description(schema_version: u32, description: impl Into<String>) -> Self {
        let mut meta = Self::new(schema_version);
        meta.description = Some(description.into());
        meta
    }

    /// Update the last_modified timestamp to now.
    pub fn touch(&mut self) {
        self.last_modified = current_timestamp();
    }
}

/// Lightweight operation log entry.
///
/// An audit trail of what was done to the project, not a replay log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: u64,

    /// Operation name (e.g. "compute_features", "solve model 0").
    pub operation: String,

    pub success: bool,

    /// Optional notes or error message.
    #[serde(default)]
    pub notes: Option<String>,
}

impl LogEntry {
    pub fn success(operation: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success: true,
            notes: None,
        }
    }

    pub fn success_with_notes(operation: impl Into<String>, notes: impl Into<String>) -> Self {
        Self {
            notes: Some(notes.into()),
            ..Self::success(operation)
        }
    }

    pub fn failure(operation: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success: false,
            notes: Some(error.into()),
        }
    }
}

/// Current Unix timestamp in seconds; zero if the clock is before the epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
