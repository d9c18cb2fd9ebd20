//! InMemoryTransport - 開発用の broker
//!
//! # 学習ポイント
//! - tokio::sync::Mutex + Notify による blocking pop
//! - mpsc チャネルで配送結果を購読者に流す
//! - exchange / queue 名による複数キューの管理
//!
//! publish 側は exchange ごとのキューに JSON を積み、broker 役のタスク
//! （デモやテスト）が `pop_published` で取り出して `deliver_result` で結果を返します。

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, mpsc};

use crate::domain::{DeliveryResult, Message, MessageId, TransportError};
use crate::ports::{DeliveryStream, QueueTransport};

type ResultSender = mpsc::UnboundedSender<Result<DeliveryResult, TransportError>>;

/// broker に渡ったメッセージ（wire 形式は JSON）
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub exchange: String,
    pub message_id: MessageId,
    pub body: Vec<u8>,
}

impl PublishedMessage {
    pub fn decode(&self) -> Result<Message, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

struct TransportState {
    online: bool,
    rejected: HashSet<MessageId>,
    publish_failures_remaining: u32,

    /// exchange ごとの未取得メッセージ
    published: HashMap<String, VecDeque<PublishedMessage>>,
    publish_count: usize,

    /// queue ごとの購読者
    subscribers: HashMap<String, Vec<ResultSender>>,

    /// 購読者がいない間に届いた結果
    backlog: HashMap<String, VecDeque<DeliveryResult>>,
}

/// InMemoryTransport は QueueTransport の参照実装
///
/// # 使用例
/// ```ignore
/// let transport = InMemoryTransport::new();
/// transport.publish("notifications", &message).await?;
/// let published = transport.pop_published("notifications", Duration::from_secs(1)).await;
/// transport.deliver_result("notification-results", DeliveryResult::delivered(id)).await;
/// ```
pub struct InMemoryTransport {
    state: Mutex<TransportState>,
    /// publish 時の通知用
    notify: Notify,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TransportState {
                online: true,
                rejected: HashSet::new(),
                publish_failures_remaining: 0,
                published: HashMap::new(),
                publish_count: 0,
                subscribers: HashMap::new(),
                backlog: HashMap::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// broker の到達可否を切り替える
    pub async fn set_online(&self, online: bool) {
        self.state.lock().await.online = online;
    }

    /// このメッセージの publish を Rejected にする
    pub async fn reject(&self, id: MessageId) {
        self.state.lock().await.rejected.insert(id);
    }

    /// 次の `n` 回の publish を Unavailable で失敗させる
    pub async fn fail_next_publishes(&self, n: u32) {
        self.state.lock().await.publish_failures_remaining = n;
    }

    /// 成功した publish の累計
    pub async fn publish_count(&self) -> usize {
        self.state.lock().await.publish_count
    }

    /// `exchange` に publish されたメッセージを 1 件取り出す（timeout 付き）
    pub async fn pop_published(
        &self,
        exchange: &str,
        timeout: Duration,
    ) -> Option<PublishedMessage> {
        let wait = async {
            loop {
                {
                    let mut state = self.state.lock().await;
                    if let Some(queue) = state.published.get_mut(exchange)
                        && let Some(published) = queue.pop_front()
                    {
                        return published;
                    }
                }
                self.notify.notified().await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }

    /// `queue` に配送結果を流す
    ///
    /// 購読者がいなければ backlog に積み、次の consume で渡す。
    pub async fn deliver_result(&self, queue: &str, result: DeliveryResult) {
        let mut state = self.state.lock().await;
        let mut pending = Some(result);
        if let Some(subscribers) = state.subscribers.get_mut(queue) {
            // 受信側が drop された sender は捨てる
            subscribers.retain(|tx| !tx.is_closed());
            for tx in subscribers.iter() {
                let Some(result) = pending.take() else {
                    break;
                };
                if let Err(mpsc::error::SendError(Ok(result))) = tx.send(Ok(result)) {
                    pending = Some(result);
                }
            }
        }
        if let Some(result) = pending {
            state
                .backlog
                .entry(queue.to_string())
                .or_default()
                .push_back(result);
        }
    }

    /// `queue` の購読ストリームを正常に閉じる（next_result が None を返す）
    pub async fn close_results(&self, queue: &str) {
        self.state.lock().await.subscribers.remove(queue);
    }

    /// 接続断を再現する（購読者は ConnectionLost を受け取る）
    pub async fn drop_subscribers(&self, queue: &str, reason: &str) {
        let mut state = self.state.lock().await;
        if let Some(subscribers) = state.subscribers.remove(queue) {
            for tx in subscribers {
                let _ = tx.send(Err(TransportError::ConnectionLost(reason.to_string())));
            }
        }
    }

    pub async fn subscriber_count(&self, queue: &str) -> usize {
        let state = self.state.lock().await;
        state
            .subscribers
            .get(queue)
            .map(|subscribers| subscribers.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueTransport for InMemoryTransport {
    async fn ensure_ready(&self) -> Result<(), TransportError> {
        if self.state.lock().await.online {
            Ok(())
        } else {
            Err(TransportError::Unavailable("in-memory broker offline".to_string()))
        }
    }

    async fn publish(&self, exchange: &str, message: &Message) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock().await;
            if !state.online {
                return Err(TransportError::Unavailable(
                    "in-memory broker offline".to_string(),
                ));
            }
            if state.publish_failures_remaining > 0 {
                state.publish_failures_remaining -= 1;
                return Err(TransportError::Unavailable(
                    "injected publish failure".to_string(),
                ));
            }
            if state.rejected.contains(&message.id) {
                return Err(TransportError::Rejected(format!(
                    "{} refused by {exchange}",
                    message.id
                )));
            }

            let body =
                serde_json::to_vec(message).map_err(|e| TransportError::Encode(e.to_string()))?;
            state
                .published
                .entry(exchange.to_string())
                .or_default()
                .push_back(PublishedMessage {
                    exchange: exchange.to_string(),
                    message_id: message.id,
                    body,
                });
            state.publish_count += 1;
        }

        // ロックの外で通知
        self.notify.notify_one();
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn DeliveryStream>, TransportError> {
        let mut state = self.state.lock().await;
        if !state.online {
            return Err(TransportError::Unavailable(
                "in-memory broker offline".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(backlog) = state.backlog.remove(queue) {
            for result in backlog {
                // rx はまだ手元にあるので失敗しない
                let _ = tx.send(Ok(result));
            }
        }
        state
            .subscribers
            .entry(queue.to_string())
            .or_default()
            .push(tx);

        Ok(Box::new(InMemoryDeliveryStream { rx }))
    }
}

/// InMemoryTransport::consume が返すストリーム
struct InMemoryDeliveryStream {
    rx: mpsc::UnboundedReceiver<Result<DeliveryResult, TransportError>>,
}

#[async_trait]
impl DeliveryStream for InMemoryDeliveryStream {
    async fn next_result(&mut self) -> Result<Option<DeliveryResult>, TransportError> {
        // mpsc::UnboundedReceiver::recv は cancel-safe
        match self.rx.recv().await {
            Some(Ok(result)) => Ok(Some(result)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NewMessage;
    use chrono::Utc;
    use tokio::time::Instant;
    use ulid::Ulid;

    fn message() -> Message {
        Message::from_new(
            MessageId::from_ulid(Ulid::new()),
            NewMessage::new("https://hooks.example.com", serde_json::json!({"k": "v"})),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn published_message_is_json_on_the_wire() {
        let transport = InMemoryTransport::new();
        let message = message();
        transport.publish("notifications", &message).await.unwrap();

        let published = transport
            .pop_published("notifications", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(published.message_id, message.id);
        assert_eq!(published.exchange, "notifications");
        assert_eq!(published.decode().unwrap(), message);
        assert_eq!(transport.publish_count().await, 1);
    }

    #[tokio::test]
    async fn pop_published_times_out_when_empty() {
        let transport = InMemoryTransport::new();
        let start = Instant::now();
        let popped = transport
            .pop_published("notifications", Duration::from_millis(200))
            .await;
        assert!(popped.is_none());
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn publish_wakes_pop() {
        let transport = std::sync::Arc::new(InMemoryTransport::new());
        let message = message();

        let pop = tokio::spawn({
            let transport = transport.clone();
            async move {
                transport
                    .pop_published("notifications", Duration::from_secs(5))
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        transport.publish("notifications", &message).await.unwrap();

        let popped = pop.await.unwrap().unwrap();
        assert_eq!(popped.message_id, message.id);
    }

    #[tokio::test]
    async fn rejected_and_offline_publishes_fail() {
        let transport = InMemoryTransport::new();
        let message = message();

        transport.reject(message.id).await;
        let err = transport.publish("notifications", &message).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected(_)));

        transport.set_online(false).await;
        let err = transport.publish("notifications", &message).await.unwrap_err();
        assert!(matches!(err, TransportError::Unavailable(_)));
        assert!(transport.ensure_ready().await.is_err());
        assert!(transport.consume("results").await.is_err());
        assert_eq!(transport.publish_count().await, 0);
    }

    #[tokio::test]
    async fn results_reach_the_subscriber_and_backlog_is_flushed() {
        let transport = InMemoryTransport::new();
        let early = MessageId::from_ulid(Ulid::new());
        let late = MessageId::from_ulid(Ulid::new());

        // 購読前の結果は backlog に残る
        transport
            .deliver_result("results", DeliveryResult::delivered(early))
            .await;

        let mut stream = transport.consume("results").await.unwrap();
        transport
            .deliver_result("results", DeliveryResult::failed(late, "timeout"))
            .await;

        let first = stream.next_result().await.unwrap().unwrap();
        let second = stream.next_result().await.unwrap().unwrap();
        assert_eq!(first.message_id, early);
        assert_eq!(second.message_id, late);
        assert!(!second.success);
    }

    #[tokio::test]
    async fn closing_and_dropping_end_the_stream() {
        let transport = InMemoryTransport::new();

        let mut closed = transport.consume("results").await.unwrap();
        transport.close_results("results").await;
        assert_eq!(closed.next_result().await.unwrap(), None);

        let mut lost = transport.consume("results").await.unwrap();
        transport.drop_subscribers("results", "socket reset").await;
        let err = lost.next_result().await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectionLost(_)));
        assert_eq!(transport.subscriber_count("results").await, 0);
    }
}
