//! ConsumerLoop - broker の配送結果を状態と履歴に反映する
//!
//! # フロー
//! 1. DeliveryStream::next_result() で結果を待つ（shutdown と select）
//! 2. 成功なら DELIVERED、失敗なら DELIVERED_FAILED に record
//! 3. 未知の ID や終端状態のメッセージへの結果はログを出して捨てる
//!    （at-least-once 配送なので重複 ack は想定内）
//! 4. store に書けなければ error_backoff して同じ結果を書き直す（次の結果には進まない）
//! 5. ストリームが閉じられたら正常終了、接続断なら backoff して consume し直す
//!
//! publish 直後の ack が Publisher の ENQUEUED 書き込みより先に届くことがある。
//! その場合（まだ PENDING）は少し待って再確認する。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::lifecycle::{shutdown_requested, sleep_or_shutdown};
use super::recorder::{RecordOutcome, StatusRecorder};
use crate::domain::{DeliveryResult, MessageStatus};
use crate::ports::{DeliveryStream, QueueTransport};

/// 1 件の結果をどう扱ったか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultDisposition {
    /// 状態を更新し履歴を追記した
    Applied(MessageStatus),

    /// すでに終端状態だった（duplicate-ignored）
    Duplicate(MessageStatus),

    /// 該当するメッセージがない
    UnknownMessage,

    /// 遷移できない状態だったので捨てた
    Dropped(MessageStatus),

    /// store に書けなかった
    StoreFailed,
}

pub struct ConsumerLoop {
    transport: Arc<dyn QueueTransport>,
    recorder: Arc<StatusRecorder>,
    queue: String,
    error_backoff: Duration,
    ack_recheck_attempts: u32,
    ack_recheck_delay: Duration,
}

impl ConsumerLoop {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        recorder: Arc<StatusRecorder>,
        queue: impl Into<String>,
        error_backoff: Duration,
        ack_recheck_attempts: u32,
        ack_recheck_delay: Duration,
    ) -> Self {
        Self {
            transport,
            recorder,
            queue: queue.into(),
            error_backoff,
            ack_recheck_attempts,
            ack_recheck_delay,
        }
    }

    /// 結果ストリームを読み続ける
    ///
    /// 停止シグナル、またはストリームが閉じられたら返る。
    pub async fn run(
        &self,
        mut stream: Box<dyn DeliveryStream>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(queue = %self.queue, "consumer started");
        loop {
            if shutdown_requested(&shutdown) {
                break;
            }

            // select するのは受信待ちだけ。1 件の処理は中断しない
            let next = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                next = stream.next_result() => next,
            };

            match next {
                Ok(Some(result)) => {
                    if self.apply_until_written(&result, &mut shutdown).await {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!(queue = %self.queue, "result stream closed by transport");
                    break;
                }
                Err(e) => {
                    tracing::warn!(queue = %self.queue, error = %e, "result stream failed, resubscribing");
                    match self.resubscribe(&mut shutdown).await {
                        Some(fresh) => stream = fresh,
                        None => break,
                    }
                }
            }
        }
        tracing::info!("consumer stopped");
    }

    /// 1 件の配送結果を反映する
    pub async fn handle_result(&self, result: &DeliveryResult) -> ResultDisposition {
        let id = result.message_id;
        let to = result.target_status();
        let mut rechecks = 0;

        loop {
            match self.recorder.record(id, to, result.detail.clone()).await {
                Ok(RecordOutcome::Recorded(change)) => return ResultDisposition::Applied(change.to),
                Ok(RecordOutcome::NotFound) => {
                    tracing::info!(message_id = %id, "result for unknown message discarded");
                    return ResultDisposition::UnknownMessage;
                }
                Ok(RecordOutcome::Conflict { current }) if current.is_terminal() => {
                    tracing::debug!(
                        message_id = %id,
                        current = %current,
                        requested = %to,
                        "duplicate-ignored"
                    );
                    return ResultDisposition::Duplicate(current);
                }
                Ok(RecordOutcome::Conflict { current })
                    if current == MessageStatus::Pending && rechecks < self.ack_recheck_attempts =>
                {
                    rechecks += 1;
                    tracing::debug!(message_id = %id, recheck = rechecks, "result arrived before ENQUEUED, rechecking");
                    tokio::time::sleep(self.ack_recheck_delay).await;
                }
                Ok(RecordOutcome::Conflict { current }) => {
                    tracing::warn!(
                        message_id = %id,
                        current = %current,
                        requested = %to,
                        "illegal status transition, result dropped"
                    );
                    return ResultDisposition::Dropped(current);
                }
                Err(e) => {
                    tracing::error!(message_id = %id, to = %to, error = %e, "failed to record delivery result");
                    return ResultDisposition::StoreFailed;
                }
            }
        }
    }

    /// store に書けるまで error_backoff 間隔で handle_result を繰り返す
    ///
    /// 書けないまま停止が来たら true（その結果は記録されない）。
    async fn apply_until_written(
        &self,
        result: &DeliveryResult,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        while self.handle_result(result).await == ResultDisposition::StoreFailed {
            if sleep_or_shutdown(shutdown, self.error_backoff).await {
                tracing::warn!(
                    message_id = %result.message_id,
                    success = result.success,
                    "stopping with an unrecorded delivery result"
                );
                return true;
            }
        }
        false
    }

    /// 接続を張り直す。停止が来たら None
    async fn resubscribe(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Box<dyn DeliveryStream>> {
        loop {
            if sleep_or_shutdown(shutdown, self.error_backoff).await {
                return None;
            }
            match self.transport.consume(&self.queue).await {
                Ok(stream) => {
                    tracing::info!(queue = %self.queue, "resubscribed to result queue");
                    return Some(stream);
                }
                Err(e) => {
                    tracing::warn!(queue = %self.queue, error = %e, "resubscribe failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LogLevel, MessageId, NewMessage};
    use crate::impls::{InMemoryHistoryLog, InMemoryMessageStore, InMemoryTransport};
    use crate::ports::{ExecutionHistoryLog, MessageStore, SystemClock, UlidGenerator};
    use rstest::rstest;
    use ulid::Ulid;

    const QUEUE: &str = "notification-results";

    struct Fixture {
        store: Arc<InMemoryMessageStore>,
        history: Arc<InMemoryHistoryLog>,
        transport: Arc<InMemoryTransport>,
        consumer: Arc<ConsumerLoop>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryMessageStore::new());
        let history = Arc::new(InMemoryHistoryLog::new());
        let transport = Arc::new(InMemoryTransport::new());
        let recorder = Arc::new(StatusRecorder::new(
            store.clone(),
            history.clone(),
            Arc::new(SystemClock),
            Arc::new(UlidGenerator::new(SystemClock)),
            0,
            Duration::from_millis(5),
        ));
        let consumer = Arc::new(ConsumerLoop::new(
            transport.clone(),
            recorder,
            QUEUE,
            Duration::from_millis(10),
            3,
            Duration::from_millis(30),
        ));
        Fixture {
            store,
            history,
            transport,
            consumer,
        }
    }

    impl Fixture {
        async fn with_status(&self, status: MessageStatus) -> MessageId {
            let id = self
                .store
                .insert(NewMessage::new("https://hooks.example.com", serde_json::json!({})))
                .await
                .id;
            let path: &[MessageStatus] = match status {
                MessageStatus::Pending => &[],
                MessageStatus::Enqueued => &[MessageStatus::Enqueued],
                MessageStatus::NotEnqueued => &[MessageStatus::NotEnqueued],
                MessageStatus::Delivered => &[MessageStatus::Enqueued, MessageStatus::Delivered],
                MessageStatus::DeliveredFailed => {
                    &[MessageStatus::Enqueued, MessageStatus::DeliveredFailed]
                }
            };
            for step in path {
                self.store.update_status(id, *step).await.unwrap();
            }
            id
        }

        async fn status(&self, id: MessageId) -> MessageStatus {
            self.store.get(id).await.unwrap().unwrap().status
        }
    }

    #[tokio::test]
    async fn success_result_marks_delivered() {
        let f = fixture();
        let id = f.with_status(MessageStatus::Enqueued).await;

        let disposition = f.consumer.handle_result(&DeliveryResult::delivered(id)).await;

        assert_eq!(disposition, ResultDisposition::Applied(MessageStatus::Delivered));
        assert_eq!(f.status(id).await, MessageStatus::Delivered);
        let entries = f.history.entries_for(id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].log_level, LogLevel::Success);
    }

    #[tokio::test]
    async fn failure_result_marks_delivered_failed() {
        let f = fixture();
        let id = f.with_status(MessageStatus::Enqueued).await;

        let disposition = f
            .consumer
            .handle_result(&DeliveryResult::failed(id, "webhook returned 500"))
            .await;

        assert_eq!(disposition, ResultDisposition::Applied(MessageStatus::DeliveredFailed));
        assert_eq!(f.status(id).await, MessageStatus::DeliveredFailed);
        let entries = f.history.entries_for(id).await.unwrap();
        assert_eq!(entries[0].log_level, LogLevel::Failed);
        assert_eq!(entries[0].result.as_deref(), Some("webhook returned 500"));
    }

    #[tokio::test]
    async fn duplicate_result_is_a_no_op() {
        let f = fixture();
        let id = f.with_status(MessageStatus::Enqueued).await;
        let result = DeliveryResult::delivered(id);

        f.consumer.handle_result(&result).await;
        let writes = f.store.write_count().await;
        let second = f.consumer.handle_result(&result).await;

        assert_eq!(second, ResultDisposition::Duplicate(MessageStatus::Delivered));
        assert_eq!(f.store.write_count().await, writes);
        assert_eq!(f.history.entries_for(id).await.unwrap().len(), 1);
    }

    #[rstest]
    #[case(MessageStatus::Delivered, true)]
    #[case(MessageStatus::Delivered, false)]
    #[case(MessageStatus::DeliveredFailed, true)]
    #[case(MessageStatus::NotEnqueued, true)]
    #[tokio::test]
    async fn results_for_terminal_messages_are_ignored(
        #[case] status: MessageStatus,
        #[case] success: bool,
    ) {
        let f = fixture();
        let id = f.with_status(status).await;
        let result = if success {
            DeliveryResult::delivered(id)
        } else {
            DeliveryResult::failed(id, "late failure")
        };

        let disposition = f.consumer.handle_result(&result).await;

        assert_eq!(disposition, ResultDisposition::Duplicate(status));
        assert_eq!(f.status(id).await, status);
        assert!(f.history.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_message_is_discarded() {
        let f = fixture();
        let id = MessageId::from_ulid(Ulid::new());

        let disposition = f.consumer.handle_result(&DeliveryResult::delivered(id)).await;

        assert_eq!(disposition, ResultDisposition::UnknownMessage);
        assert!(f.history.is_empty().await);
    }

    #[tokio::test]
    async fn result_racing_ahead_of_enqueued_is_applied_after_recheck() {
        let f = fixture();
        let id = f.with_status(MessageStatus::Pending).await;

        let store = f.store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            store.update_status(id, MessageStatus::Enqueued).await.unwrap();
        });

        let disposition = f.consumer.handle_result(&DeliveryResult::delivered(id)).await;

        assert_eq!(disposition, ResultDisposition::Applied(MessageStatus::Delivered));
    }

    #[tokio::test]
    async fn result_for_message_stuck_pending_is_dropped() {
        let f = fixture();
        let id = f.with_status(MessageStatus::Pending).await;

        let disposition = f.consumer.handle_result(&DeliveryResult::delivered(id)).await;

        assert_eq!(disposition, ResultDisposition::Dropped(MessageStatus::Pending));
        assert_eq!(f.status(id).await, MessageStatus::Pending);
    }

    #[tokio::test]
    async fn run_rewrites_a_result_after_a_store_outage_before_moving_on() {
        let f = fixture();
        let first = f.with_status(MessageStatus::Enqueued).await;
        let second = f.with_status(MessageStatus::Enqueued).await;
        let stream = f.transport.consume(QUEUE).await.unwrap();
        let (tx, rx) = watch::channel(false);
        f.store.fail_next_updates(3).await;

        let join = tokio::spawn({
            let consumer = f.consumer.clone();
            async move { consumer.run(stream, rx).await }
        });
        f.transport.deliver_result(QUEUE, DeliveryResult::delivered(first)).await;
        f.transport
            .deliver_result(QUEUE, DeliveryResult::failed(second, "webhook returned 500"))
            .await;

        for _ in 0..200 {
            if f.history.len().await == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tx.send(true).unwrap();
        join.await.unwrap();

        assert_eq!(f.status(first).await, MessageStatus::Delivered);
        assert_eq!(f.status(second).await, MessageStatus::DeliveredFailed);
        let order: Vec<MessageId> = f.history.all().await.iter().map(|e| e.message_id).collect();
        assert_eq!(order, vec![first, second]);
    }

    #[tokio::test]
    async fn stop_interrupts_an_unwritable_result() {
        let f = fixture();
        let id = f.with_status(MessageStatus::Enqueued).await;
        let stream = f.transport.consume(QUEUE).await.unwrap();
        let (tx, rx) = watch::channel(false);
        f.store.fail_next_updates(u32::MAX).await;

        let join = tokio::spawn({
            let consumer = f.consumer.clone();
            async move { consumer.run(stream, rx).await }
        });
        f.transport.deliver_result(QUEUE, DeliveryResult::delivered(id)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), join)
            .await
            .unwrap()
            .unwrap();
        assert!(f.history.is_empty().await);
        f.store.fail_next_updates(0).await;
        assert_eq!(f.status(id).await, MessageStatus::Enqueued);
    }

    #[tokio::test]
    async fn run_exits_when_stream_closes() {
        let f = fixture();
        let id = f.with_status(MessageStatus::Enqueued).await;
        let stream = f.transport.consume(QUEUE).await.unwrap();
        let (_tx, rx) = watch::channel(false);

        let join = tokio::spawn({
            let consumer = f.consumer.clone();
            async move { consumer.run(stream, rx).await }
        });

        f.transport.deliver_result(QUEUE, DeliveryResult::delivered(id)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        f.transport.close_results(QUEUE).await;

        tokio::time::timeout(Duration::from_secs(2), join)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(f.status(id).await, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn run_resubscribes_after_connection_loss() {
        let f = fixture();
        let id = f.with_status(MessageStatus::Enqueued).await;
        let stream = f.transport.consume(QUEUE).await.unwrap();
        let (tx, rx) = watch::channel(false);

        let join = tokio::spawn({
            let consumer = f.consumer.clone();
            async move { consumer.run(stream, rx).await }
        });

        f.transport.drop_subscribers(QUEUE, "socket reset").await;
        f.transport.deliver_result(QUEUE, DeliveryResult::delivered(id)).await;

        for _ in 0..100 {
            if f.status(id).await == MessageStatus::Delivered {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.status(id).await, MessageStatus::Delivered);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), join)
            .await
            .unwrap()
            .unwrap();
    }
}
