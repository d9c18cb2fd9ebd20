//! ExecutionHistoryLog port - 配送試行の監査ログ（append-only）

use async_trait::async_trait;

use crate::domain::{ExecutionHistoryEntry, MessageId, StoreError};

/// ExecutionHistoryLog は状態遷移ごとに 1 件のエントリを保持
///
/// 追記のみ。編集・削除の操作は持たない。
#[async_trait]
pub trait ExecutionHistoryLog: Send + Sync {
    async fn append(&self, entry: ExecutionHistoryEntry) -> Result<(), StoreError>;

    /// 指定メッセージのエントリを追記順に返す
    async fn entries_for(
        &self,
        message_id: MessageId,
    ) -> Result<Vec<ExecutionHistoryEntry>, StoreError>;
}
