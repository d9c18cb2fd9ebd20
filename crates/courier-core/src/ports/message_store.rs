//! MessageStore port - Message の正本（source of truth）
//!
//! # 並行性の契約
//! - fetch_pending は claim セマンティクス: 同じ PENDING メッセージを
//!   2 つの並行 fetch が返すことはない
//! - update_status は現在の状態を確認してから遷移する（不正な遷移は Conflict）
//! - 正しさがストレージの分離レベルに依存しないよう、この 2 点を実装側が保証する

use async_trait::async_trait;

use crate::domain::{Message, MessageId, MessageStatus, StatusChange, StatusCounts, StoreError};

/// MessageStore は Message の所有者
///
/// Publisher は PENDING -> ENQUEUED | NOT_ENQUEUED を、
/// Consumer は ENQUEUED -> DELIVERED | DELIVERED_FAILED を書き込みます。
/// この core は Message を削除しません。
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// PENDING のメッセージを古い順に最大 `limit` 件 claim して返す
    ///
    /// 何もなければ空の Vec（エラーではない）。
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// 状態を更新する
    ///
    /// - 未知の ID: `StoreError::NotFound`
    /// - 単調でない遷移: `StoreError::Conflict`（current に現在の状態が入る）
    async fn update_status(
        &self,
        id: MessageId,
        status: MessageStatus,
    ) -> Result<StatusChange, StoreError>;

    /// claim したが処理しなかったメッセージを PENDING プールに戻す
    async fn release(&self, ids: &[MessageId]) -> Result<(), StoreError>;

    async fn get(&self, id: MessageId) -> Result<Option<Message>, StoreError>;

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError>;
}
