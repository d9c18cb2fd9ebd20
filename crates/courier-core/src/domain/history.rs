//! Execution history: append-only audit trail of delivery attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{HistoryId, MessageId};
use super::status::MessageStatus;

/// Success/failure classifier of a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Success,
    Failed,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Success => "SUCCESS",
            LogLevel::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status transition of one message. Never edited once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHistoryEntry {
    pub id: HistoryId,
    pub message_id: MessageId,
    pub status: MessageStatus,
    pub log_level: LogLevel,

    /// Free-form detail, e.g. the transport error that caused NOT_ENQUEUED.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    pub logged_at: DateTime<Utc>,
}

impl ExecutionHistoryEntry {
    /// The log level is derived from the status, so the two never disagree.
    pub fn new(
        id: HistoryId,
        message_id: MessageId,
        status: MessageStatus,
        result: Option<String>,
        logged_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            message_id,
            status,
            log_level: status.log_level(),
            result,
            logged_at,
        }
    }
}
