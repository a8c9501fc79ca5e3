//! Build status ledger entries.
//!
//! Entries are immutable once written. Storage and queries live in
//! [`crate::store::PipelineDb`]; this module only describes the records.

use crate::types::PipelineEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildStatus {
    pub id: u64,
    pub build_id: u64,
    pub region: String,
    pub message: String,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub created_at: DateTime<Utc>,
}

/// Free-form detail attached to an event by the agent that reported it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Overrides the region recorded in the ledger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl StatusPayload {
    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.stdout = Some(log.into());
        self
    }

    /// Ledger entry (minus id and timestamp) for `event` applied in `region`.
    pub(crate) fn into_entry(self, event: PipelineEvent, region: &str) -> NewStatus {
        NewStatus {
            region: self.region.unwrap_or_else(|| region.to_string()),
            message: self
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| event.default_message().to_string()),
            stdout: self.stdout.unwrap_or_default(),
            stderr: self.stderr.unwrap_or_default(),
        }
    }
}

/// A ledger entry that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStatus {
    pub region: String,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
}
