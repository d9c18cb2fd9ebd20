//! Broker delivery results.

use serde::{Deserialize, Serialize};

use super::ids::MessageId;
use super::status::MessageStatus;

/// An acknowledgement coming back from the broker side.
///
/// Delivery is at-least-once: the same result may arrive more than once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub message_id: MessageId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DeliveryResult {
    pub fn delivered(message_id: MessageId) -> Self {
        Self {
            message_id,
            success: true,
            detail: None,
        }
    }

    pub fn failed(message_id: MessageId, detail: impl Into<String>) -> Self {
        Self {
            message_id,
            success: false,
            detail: Some(detail.into()),
        }
    }

    /// Status this result moves an ENQUEUED message to.
    pub fn target_status(&self) -> MessageStatus {
        if self.success {
            MessageStatus::Delivered
        } else {
            MessageStatus::DeliveredFailed
        }
    }
}
