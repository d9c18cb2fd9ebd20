//! Message - 通知の単位
//!
//! Message は Message Store が唯一の所有者です。
//! Publisher / Consumer は 1 件の処理の間だけ clone を持ち、
//! ループをまたいでキャッシュしません。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::MessageId;
use super::status::MessageStatus;

/// Message は配送対象の通知
///
/// # フィールド
/// - destination: 配送先（webhook URL など、broker の向こう側が解釈する）
/// - content: 本文（JSON）
/// - metadata: subscription_id, event_type などの付帯情報
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub destination: String,
    pub content: serde_json::Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// NewMessage から PENDING の Message を作成
    pub fn from_new(id: MessageId, new: NewMessage, now: DateTime<Utc>) -> Self {
        Self {
            id,
            destination: new.destination,
            content: new.content,
            metadata: new.metadata,
            status: MessageStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// NewMessage は producer 側の入力
///
/// # 使用例
/// ```ignore
/// let new = NewMessage::new("https://hooks.example.com/a", json!({"event": "deploy"}))
///     .with_metadata("event_type", "DEPLOY");
/// let message = store.insert(new).await?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub destination: String,
    pub content: serde_json::Value,
    pub metadata: BTreeMap<String, String>,
}

impl NewMessage {
    pub fn new(destination: impl Into<String>, content: serde_json::Value) -> Self {
        Self {
            destination: destination.into(),
            content,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// StatusChange は成功した状態更新の記録（ログの prior/new に使う）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub id: MessageId,
    pub from: MessageStatus,
    pub to: MessageStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ulid::Ulid;

    #[test]
    fn new_messages_start_pending() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let new = NewMessage::new("https://hooks.example.com/a", serde_json::json!({"k": 1}))
            .with_metadata("event_type", "DEPLOY");

        let message = Message::from_new(MessageId::from_ulid(Ulid::new()), new, now);

        assert_eq!(message.status, MessageStatus::Pending);
        assert_eq!(message.created_at, now);
        assert_eq!(message.updated_at, now);
        assert_eq!(message.metadata.get("event_type").map(String::as_str), Some("DEPLOY"));
    }
}
