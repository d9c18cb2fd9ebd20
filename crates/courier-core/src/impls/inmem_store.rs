//! InMemoryMessageStore - 開発用・テスト用の Message Store
//!
//! # 学習ポイント
//! - tokio::sync::Mutex で fetch と claim を 1 つのクリティカルセクションにする
//! - 挿入順の Vec で「古い順」を保証
//! - fault injection で Infrastructure エラーを再現

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{
    Message, MessageId, MessageStatus, NewMessage, StatusChange, StatusCounts, StoreError,
};
use crate::ports::{Clock, IdGenerator, MessageStore, SystemClock, UlidGenerator};

struct StoreState {
    messages: HashMap<MessageId, Message>,

    /// 挿入順（= 古い順）
    order: Vec<MessageId>,

    /// fetch_pending で返したがまだ状態が変わっていない ID
    claimed: HashSet<MessageId>,

    /// 成功した状態更新の回数
    writes: u64,

    /// 残りこの回数だけ操作を Unavailable で失敗させる
    failures_remaining: u32,

    /// update_status だけを失敗させる回数
    update_failures_remaining: u32,
}

impl StoreState {
    fn new() -> Self {
        Self {
            messages: HashMap::new(),
            order: Vec::new(),
            claimed: HashSet::new(),
            writes: 0,
            failures_remaining: 0,
            update_failures_remaining: 0,
        }
    }

    fn check_available(&mut self) -> Result<(), StoreError> {
        if self.failures_remaining > 0 {
            self.failures_remaining -= 1;
            return Err(StoreError::Unavailable("injected store failure".to_string()));
        }
        Ok(())
    }
}

/// InMemoryMessageStore は MessageStore の参照実装
///
/// # 使用例
/// ```ignore
/// let store = InMemoryMessageStore::new();
/// let message = store.insert(NewMessage::new("https://hooks.example.com", json!({}))).await;
/// let batch = store.fetch_pending(10).await?;
/// ```
pub struct InMemoryMessageStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::with_parts(Arc::new(SystemClock), Arc::new(UlidGenerator::new(SystemClock)))
    }

    pub fn with_parts(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Mutex::new(StoreState::new()),
            clock,
            ids,
        }
    }

    /// producer 側の作成 API（core の外の責務だが、デモとテストで使う）
    pub async fn insert(&self, new: NewMessage) -> Message {
        let message = Message::from_new(self.ids.generate_message_id(), new, self.clock.now());
        let mut state = self.state.lock().await;
        state.order.push(message.id);
        state.messages.insert(message.id, message.clone());
        message
    }

    /// 次の `n` 回の操作を `StoreError::Unavailable` で失敗させる
    pub async fn fail_next_operations(&self, n: u32) {
        self.state.lock().await.failures_remaining = n;
    }

    /// 次の `n` 回の update_status だけを `StoreError::Unavailable` で失敗させる
    ///
    /// fetch / release は成功するので「publish 後に store が落ちた」を再現できる。
    pub async fn fail_next_updates(&self, n: u32) {
        self.state.lock().await.update_failures_remaining = n;
    }

    /// 成功した状態更新の累計
    pub async fn write_count(&self) -> u64 {
        self.state.lock().await.writes
    }

    pub async fn claimed_count(&self) -> usize {
        self.state.lock().await.claimed.len()
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn fetch_pending(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        let StoreState {
            messages,
            order,
            claimed,
            ..
        } = &mut *state;

        let mut batch = Vec::with_capacity(limit);
        for id in order.iter() {
            if batch.len() >= limit {
                break;
            }
            if claimed.contains(id) {
                continue;
            }
            if let Some(message) = messages.get(id)
                && message.status == MessageStatus::Pending
            {
                claimed.insert(*id);
                batch.push(message.clone());
            }
        }
        Ok(batch)
    }

    async fn update_status(
        &self,
        id: MessageId,
        status: MessageStatus,
    ) -> Result<StatusChange, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.check_available()?;
        if state.update_failures_remaining > 0 {
            state.update_failures_remaining -= 1;
            return Err(StoreError::Unavailable("injected update failure".to_string()));
        }

        let message = state.messages.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let current = message.status;
        if !current.can_transition_to(status) {
            return Err(StoreError::Conflict {
                id,
                current,
                requested: status,
            });
        }
        message.status = status;
        message.updated_at = now;

        state.claimed.remove(&id);
        state.writes += 1;

        Ok(StatusChange {
            id,
            from: current,
            to: status,
        })
    }

    async fn release(&self, ids: &[MessageId]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        for id in ids {
            state.claimed.remove(id);
        }
        Ok(())
    }

    async fn get(&self, id: MessageId) -> Result<Option<Message>, StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        Ok(state.messages.get(&id).cloned())
    }

    async fn counts_by_status(&self) -> Result<StatusCounts, StoreError> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        let mut counts = StatusCounts::default();
        for message in state.messages.values() {
            counts.add(message.status);
        }
        Ok(counts)
    }
}
