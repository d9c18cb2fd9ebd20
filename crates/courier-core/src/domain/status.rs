//! Message status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::history::LogLevel;

/// Delivery status of a notification message.
///
/// State transitions:
/// - Pending -> Enqueued -> Delivered
/// - Pending -> NotEnqueued
/// - Enqueued -> DeliveredFailed
///
/// Serialized as SCREAMING_SNAKE_CASE (`NOT_ENQUEUED`, `DELIVERED_FAILED`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    /// Created by a producer, not yet claimed by the publisher.
    Pending,

    /// Handed to the broker.
    Enqueued,

    /// The broker refused the message or was unreachable.
    NotEnqueued,

    /// The broker reported successful delivery.
    Delivered,

    /// The broker reported a delivery failure.
    DeliveredFailed,
}

impl MessageStatus {
    /// No further transition is legal from a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::NotEnqueued | MessageStatus::Delivered | MessageStatus::DeliveredFailed
        )
    }

    /// Is `next` a legal move from `self`?
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Pending, Enqueued)
                | (Pending, NotEnqueued)
                | (Enqueued, Delivered)
                | (Enqueued, DeliveredFailed)
        )
    }

    /// History classifier recorded when a message reaches this status.
    pub fn log_level(self) -> LogLevel {
        match self {
            MessageStatus::Pending | MessageStatus::Enqueued | MessageStatus::Delivered => {
                LogLevel::Success
            }
            MessageStatus::NotEnqueued | MessageStatus::DeliveredFailed => LogLevel::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Pending => "PENDING",
            MessageStatus::Enqueued => "ENQUEUED",
            MessageStatus::NotEnqueued => "NOT_ENQUEUED",
            MessageStatus::Delivered => "DELIVERED",
            MessageStatus::DeliveredFailed => "DELIVERED_FAILED",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message counts per status (delivery funnel).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub enqueued: usize,
    pub not_enqueued: usize,
    pub delivered: usize,
    pub delivered_failed: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: MessageStatus) {
        match status {
            MessageStatus::Pending => self.pending += 1,
            MessageStatus::Enqueued => self.enqueued += 1,
            MessageStatus::NotEnqueued => self.not_enqueued += 1,
            MessageStatus::Delivered => self.delivered += 1,
            MessageStatus::DeliveredFailed => self.delivered_failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.enqueued + self.not_enqueued + self.delivered + self.delivered_failed
    }

    /// Messages that will not move any further.
    pub fn terminal(&self) -> usize {
        self.not_enqueued + self.delivered + self.delivered_failed
    }
}
