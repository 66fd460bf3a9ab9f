pub mod extract;
pub mod fingerprint;
pub mod signature;
pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where the full logs for an occurrence can be found again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pointer {
    pub log_group: String,
    pub log_stream: String,
    pub timestamp: DateTime<Utc>,
}

/// A single detected error, ready to be merged into an [`Issue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub error: String,
    pub message: String,
    pub stack: Vec<String>,
    pub pointer: Pointer,
}

impl Occurrence {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.pointer.timestamp
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: Uuid,
    pub workspace: String,
    pub group: String,
    pub error: String,
    pub message: String,
    pub stack: Vec<String>,
    pub pointer: Pointer,
    pub time_seen: DateTime<Utc>,
    pub time_created: DateTime<Utc>,
    pub time_updated: DateTime<Utc>,
    pub time_ignored: Option<DateTime<Utc>>,
    pub time_resolved: Option<DateTime<Utc>>,
}

impl Issue {
    pub fn create(workspace: &str, group: &str, occurrence: &Occurrence) -> Self {
        let ts = occurrence.timestamp();
        Self {
            id: fingerprint::issue_id(workspace, group),
            workspace: workspace.to_string(),
            group: group.to_string(),
            error: occurrence.error.clone(),
            message: occurrence.message.clone(),
            stack: occurrence.stack.clone(),
            pointer: occurrence.pointer.clone(),
            time_seen: ts,
            time_created: ts,
            time_updated: ts,
            time_ignored: None,
            time_resolved: None,
        }
    }

    /// Folds a later-processed occurrence into this issue.
    ///
    /// `time_seen` only ever moves forward, so occurrences may arrive in any
    /// order. Details are replaced only when the new occurrence carries a stack
    /// and the stored one does not. Triage timestamps are left untouched.
    pub fn merge(&mut self, occurrence: &Occurrence, now: DateTime<Utc>) {
        self.time_seen = self.time_seen.max(occurrence.timestamp());
        if self.stack.is_empty() && !occurrence.stack.is_empty() {
            self.message = occurrence.message.clone();
            self.stack = occurrence.stack.clone();
            self.pointer = occurrence.pointer.clone();
        }
        self.time_updated = self.time_updated.max(now);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCount {
    pub workspace: String,
    pub group: String,
    pub hour: DateTime<Utc>,
    pub count: i64,
}
