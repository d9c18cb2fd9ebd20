//! StatusRecorder - 状態更新・履歴追記・遷移ログをまとめて行う
//!
//! Publisher と Consumer はどちらも「状態を変えて、履歴を 1 件足して、
//! 構造化ログを 1 行出す」を行うので、ここに集約します。
//!
//! # フロー
//! 1. MessageStore::update_status()（Infrastructure エラーは backoff して再試行）
//! 2. 成功したら ExecutionHistoryEntry を ExecutionHistoryLog::append()
//! 3. tracing で message_id / from / to / log_level を出力
//!
//! NotFound と Conflict はエラーではなく `RecordOutcome` として返します。
//! 呼び出し側がそれを「想定内のノイズ」か「データ不整合」かを判断します。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    ErrorKind, ExecutionHistoryEntry, LogLevel, MessageId, MessageStatus, StatusChange,
    StoreError,
};
use crate::ports::{Clock, ExecutionHistoryLog, IdGenerator, MessageStore};

/// 1 回の record の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// 状態が変わり、履歴が 1 件追記された
    Recorded(StatusChange),

    /// メッセージが存在しない
    NotFound,

    /// 現在の状態からは遷移できない（current は store 上の状態）
    Conflict { current: MessageStatus },
}

pub struct StatusRecorder {
    store: Arc<dyn MessageStore>,
    history: Arc<dyn ExecutionHistoryLog>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl StatusRecorder {
    pub fn new(
        store: Arc<dyn MessageStore>,
        history: Arc<dyn ExecutionHistoryLog>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        retry_attempts: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            store,
            history,
            clock,
            ids,
            retry_attempts,
            retry_backoff,
        }
    }

    /// `id` を `to` に遷移させ、履歴を追記する
    ///
    /// `result` は履歴エントリの詳細（transport のエラー文言など）。
    /// Err は再試行しても store に届かなかった場合だけ返る。
    pub async fn record(
        &self,
        id: MessageId,
        to: MessageStatus,
        result: Option<String>,
    ) -> Result<RecordOutcome, StoreError> {
        let change = match self
            .with_retry("update_status", || self.store.update_status(id, to))
            .await
        {
            Ok(change) => change,
            Err(StoreError::NotFound(_)) => return Ok(RecordOutcome::NotFound),
            Err(StoreError::Conflict { current, .. }) => {
                return Ok(RecordOutcome::Conflict { current });
            }
            Err(e) => return Err(e),
        };

        let entry = ExecutionHistoryEntry::new(
            self.ids.generate_history_id(),
            id,
            change.to,
            result,
            self.clock.now(),
        );
        let detail = entry.result.clone();
        if let Err(e) = self
            .with_retry("append_history", || self.history.append(entry.clone()))
            .await
        {
            // 状態は変わったが履歴が欠けている
            tracing::error!(
                message_id = %id,
                from = %change.from,
                to = %change.to,
                error = %e,
                "status changed but history entry was not written"
            );
            return Err(e);
        }

        log_transition(&change, detail.as_deref());
        Ok(RecordOutcome::Recorded(change))
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Err(e) if e.kind() == ErrorKind::Infrastructure && attempt < self.retry_attempts => {
                    attempt += 1;
                    tracing::warn!(
                        op,
                        attempt,
                        max_attempts = self.retry_attempts,
                        error = %e,
                        "store write failed, retrying"
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
                other => return other,
            }
        }
    }
}

/// 1 遷移 = 1 行の構造化ログ（外部ダッシュボードが配送ファネルを再構成できる）
fn log_transition(change: &StatusChange, detail: Option<&str>) {
    let level = change.to.log_level();
    match level {
        LogLevel::Success => tracing::info!(
            message_id = %change.id,
            from = %change.from,
            to = %change.to,
            log_level = %level,
            "message status changed"
        ),
        LogLevel::Failed => tracing::warn!(
            message_id = %change.id,
            from = %change.from,
            to = %change.to,
            log_level = %level,
            detail = detail.unwrap_or(""),
            "message status changed"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewMessage;
    use crate::impls::{InMemoryHistoryLog, InMemoryMessageStore};
    use crate::ports::{SystemClock, UlidGenerator};

    struct Fixture {
        store: Arc<InMemoryMessageStore>,
        history: Arc<InMemoryHistoryLog>,
        recorder: StatusRecorder,
    }

    fn fixture(retry_attempts: u32) -> Fixture {
        let store = Arc::new(InMemoryMessageStore::new());
        let history = Arc::new(InMemoryHistoryLog::new());
        let recorder = StatusRecorder::new(
            store.clone(),
            history.clone(),
            Arc::new(SystemClock),
            Arc::new(UlidGenerator::new(SystemClock)),
            retry_attempts,
            Duration::from_millis(5),
        );
        Fixture {
            store,
            history,
            recorder,
        }
    }

    async fn pending(store: &InMemoryMessageStore) -> MessageId {
        store
            .insert(NewMessage::new("https://hooks.example.com", serde_json::json!({})))
            .await
            .id
    }

    #[tokio::test]
    async fn recorded_transition_appends_one_entry() {
        let f = fixture(0);
        let id = pending(&f.store).await;

        let outcome = f
            .recorder
            .record(id, MessageStatus::NotEnqueued, Some("broker down".into()))
            .await
            .unwrap();

        assert!(matches!(outcome, RecordOutcome::Recorded(change) if change.from == MessageStatus::Pending));
        let entries = f.history.entries_for(id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, MessageStatus::NotEnqueued);
        assert_eq!(entries[0].log_level, LogLevel::Failed);
        assert_eq!(entries[0].result.as_deref(), Some("broker down"));
    }

    #[tokio::test]
    async fn conflict_writes_no_history() {
        let f = fixture(0);
        let id = pending(&f.store).await;

        let outcome = f.recorder.record(id, MessageStatus::Delivered, None).await.unwrap();

        assert_eq!(
            outcome,
            RecordOutcome::Conflict {
                current: MessageStatus::Pending
            }
        );
        assert!(f.history.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_message_is_not_found() {
        let f = fixture(0);
        let other = InMemoryMessageStore::new();
        let id = pending(&other).await;

        let outcome = f.recorder.record(id, MessageStatus::Enqueued, None).await.unwrap();
        assert_eq!(outcome, RecordOutcome::NotFound);
    }

    #[tokio::test]
    async fn infrastructure_failures_are_retried() {
        let f = fixture(3);
        let id = pending(&f.store).await;
        f.store.fail_next_operations(2).await;

        let outcome = f.recorder.record(id, MessageStatus::Enqueued, None).await.unwrap();

        assert!(matches!(outcome, RecordOutcome::Recorded(_)));
        assert_eq!(f.history.len().await, 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let f = fixture(1);
        let id = pending(&f.store).await;
        f.store.fail_next_operations(5).await;

        let err = f.recorder.record(id, MessageStatus::Enqueued, None).await.unwrap_err();

        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(f.history.is_empty().await);
    }
}
