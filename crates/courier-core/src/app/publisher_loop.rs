//! PublisherLoop - PENDING メッセージを broker に渡す
//!
//! # フロー
//! 1. 前回書けなかった publish 結果があれば先に書き直す
//! 2. MessageStore::fetch_pending() でバッチを claim
//! 3. 空なら idle_backoff だけ待つ（固定値、指数ではない）
//! 4. fetch 順に QueueTransport::publish()
//!    - 成功: ENQUEUED + SUCCESS 履歴
//!    - TransportError: NOT_ENQUEUED + FAILED 履歴（このループでは再送しない）
//! 5. 停止シグナルはメッセージの境界でだけ確認する
//!
//! store の障害はログを出して error_backoff 後に再試行する（プロセスは落とさない）。
//! publish 済みなのに状態を書けなかったメッセージは claim したまま保持し、
//! 書けるまで次の fetch より先に再試行する。書けないまま停止したら claim を返す。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};

use super::lifecycle::{shutdown_requested, sleep_or_shutdown};
use super::recorder::{RecordOutcome, StatusRecorder};
use crate::domain::{Message, MessageId, MessageStatus, StoreError};
use crate::ports::{MessageStore, QueueTransport};

/// 1 バッチの集計
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub fetched: usize,
    pub enqueued: usize,
    pub not_enqueued: usize,
    /// Conflict / NotFound で捨てた更新
    pub dropped: usize,
    /// store に書けず、次回に持ち越した更新
    pub store_failures: usize,
    /// 停止または store 障害のため claim を返したメッセージ
    pub released: usize,
    /// 持ち越しから書けた更新
    pub recovered: usize,
}

/// publish は済んだが store に書けていない結果
#[derive(Debug, Clone)]
struct UnwrittenOutcome {
    id: MessageId,
    to: MessageStatus,
    detail: Option<String>,
}

pub struct PublisherLoop {
    store: Arc<dyn MessageStore>,
    transport: Arc<dyn QueueTransport>,
    recorder: Arc<StatusRecorder>,
    exchange: String,
    batch_size: usize,
    idle_backoff: Duration,
    error_backoff: Duration,
    unwritten: Mutex<Vec<UnwrittenOutcome>>,
}

impl PublisherLoop {
    pub fn new(
        store: Arc<dyn MessageStore>,
        transport: Arc<dyn QueueTransport>,
        recorder: Arc<StatusRecorder>,
        exchange: impl Into<String>,
        batch_size: usize,
        idle_backoff: Duration,
        error_backoff: Duration,
    ) -> Self {
        Self {
            store,
            transport,
            recorder,
            exchange: exchange.into(),
            batch_size,
            idle_backoff,
            error_backoff,
            unwritten: Mutex::new(Vec::new()),
        }
    }

    /// 停止シグナルが来るまでバッチを回す
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(exchange = %self.exchange, batch_size = self.batch_size, "publisher started");
        loop {
            if shutdown_requested(&shutdown) {
                break;
            }

            let wait = match self.publish_batch(&shutdown).await {
                Ok(report) if report.store_failures > 0 => Some(self.error_backoff),
                Ok(report) if report.fetched == 0 => Some(self.idle_backoff),
                Ok(report) => {
                    tracing::debug!(
                        fetched = report.fetched,
                        enqueued = report.enqueued,
                        not_enqueued = report.not_enqueued,
                        dropped = report.dropped,
                        released = report.released,
                        recovered = report.recovered,
                        "publisher batch done"
                    );
                    None
                }
                Err(e) => {
                    tracing::error!(error = %e, "publisher batch failed");
                    Some(self.error_backoff)
                }
            };

            if let Some(delay) = wait
                && sleep_or_shutdown(&mut shutdown, delay).await
            {
                break;
            }
        }
        self.abandon_unwritten().await;
        tracing::info!("publisher stopped");
    }

    /// 1 バッチを処理する
    ///
    /// 持ち越しの結果を書き終えるまでは fetch しない。
    /// 2 件目以降の前に停止シグナルを確認し、来ていれば残りを release して返る。
    /// 途中で store に書けなくなった場合も、残りを release してバッチを打ち切る。
    /// Err は fetch の失敗か、持ち越しがまだ書けないとき。
    pub async fn publish_batch(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<BatchReport, StoreError> {
        let mut report = BatchReport::default();
        self.flush_unwritten(&mut report).await?;

        let batch = self.store.fetch_pending(self.batch_size).await?;
        report.fetched = batch.len();

        for (index, message) in batch.iter().enumerate() {
            if index > 0 && shutdown_requested(shutdown) {
                report.released += self.release_rest(&batch[index..]).await;
                break;
            }
            if !self.publish_one(message, &mut report).await {
                report.released += self.release_rest(&batch[index + 1..]).await;
                break;
            }
        }

        Ok(report)
    }

    /// false は store に書けなかったとき
    async fn publish_one(&self, message: &Message, report: &mut BatchReport) -> bool {
        let (to, detail) = match self.transport.publish(&self.exchange, message).await {
            Ok(()) => (MessageStatus::Enqueued, None),
            Err(e) => {
                tracing::warn!(message_id = %message.id, error = %e, "publish failed");
                (MessageStatus::NotEnqueued, Some(e.to_string()))
            }
        };

        match self.recorder.record(message.id, to, detail.clone()).await {
            Ok(outcome) => {
                self.tally(message.id, to, outcome, report);
                true
            }
            Err(e) => {
                tracing::error!(
                    message_id = %message.id,
                    to = %to,
                    error = %e,
                    "failed to record publish outcome, will retry"
                );
                report.store_failures += 1;
                self.unwritten.lock().await.push(UnwrittenOutcome {
                    id: message.id,
                    to,
                    detail,
                });
                false
            }
        }
    }

    fn tally(&self, id: MessageId, to: MessageStatus, outcome: RecordOutcome, report: &mut BatchReport) {
        match outcome {
            RecordOutcome::Recorded(_) if to == MessageStatus::Enqueued => report.enqueued += 1,
            RecordOutcome::Recorded(_) => report.not_enqueued += 1,
            RecordOutcome::NotFound => {
                tracing::warn!(message_id = %id, to = %to, "claimed message disappeared, update dropped");
                report.dropped += 1;
            }
            RecordOutcome::Conflict { current } => {
                tracing::warn!(
                    message_id = %id,
                    current = %current,
                    requested = %to,
                    "illegal status transition, update dropped"
                );
                report.dropped += 1;
            }
        }
    }

    /// 持ち越しを古い順に書く。失敗したらそこで止めて Err（残りは保持）
    async fn flush_unwritten(&self, report: &mut BatchReport) -> Result<(), StoreError> {
        let mut unwritten = self.unwritten.lock().await;
        while let Some(pending) = unwritten.first().cloned() {
            let outcome = self
                .recorder
                .record(pending.id, pending.to, pending.detail.clone())
                .await?;
            unwritten.remove(0);
            if !matches!(outcome, RecordOutcome::Recorded(_)) {
                self.release(&[pending.id]).await;
            }
            self.tally(pending.id, pending.to, outcome, report);
            report.recovered += 1;
        }
        Ok(())
    }

    /// 停止時: 書けなかった結果の claim を返す（次の起動で再 publish される）
    async fn abandon_unwritten(&self) {
        let abandoned: Vec<MessageId> = self
            .unwritten
            .lock()
            .await
            .drain(..)
            .map(|outcome| outcome.id)
            .collect();
        if abandoned.is_empty() {
            return;
        }
        tracing::warn!(
            count = abandoned.len(),
            "stopping with unrecorded publish outcomes, releasing claims"
        );
        self.release(&abandoned).await;
    }

    async fn release_rest(&self, rest: &[Message]) -> usize {
        if rest.is_empty() {
            return 0;
        }
        let ids: Vec<MessageId> = rest.iter().map(|m| m.id).collect();
        self.release(&ids).await;
        ids.len()
    }

    async fn release(&self, ids: &[MessageId]) {
        if let Err(e) = self.store.release(ids).await {
            tracing::error!(count = ids.len(), error = %e, "failed to release claimed messages");
        }
    }
}
