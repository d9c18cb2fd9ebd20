//! InMemoryHistoryLog - 開発用の実行履歴

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{ExecutionHistoryEntry, MessageId, StoreError};
use crate::ports::ExecutionHistoryLog;

/// InMemoryHistoryLog は追記順の Vec を持つだけの ExecutionHistoryLog
#[derive(Default)]
pub struct InMemoryHistoryLog {
    entries: Mutex<Vec<ExecutionHistoryEntry>>,
}

impl InMemoryHistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// 全エントリのスナップショット（追記順）
    pub async fn all(&self) -> Vec<ExecutionHistoryEntry> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl ExecutionHistoryLog for InMemoryHistoryLog {
    async fn append(&self, entry: ExecutionHistoryEntry) -> Result<(), StoreError> {
        self.entries.lock().await.push(entry);
        Ok(())
    }

    async fn entries_for(
        &self,
        message_id: MessageId,
    ) -> Result<Vec<ExecutionHistoryEntry>, StoreError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|entry| entry.message_id == message_id)
            .cloned()
            .collect())
    }
}
