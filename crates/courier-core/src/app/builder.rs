//! PipelineBuilder - パイプラインの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - ports を `Arc<dyn _>` で受け取り、実装の差し替えを可能にする

use std::sync::Arc;

use super::consumer_loop::ConsumerLoop;
use super::coordinator::PipelineCoordinator;
use super::publisher_loop::PublisherLoop;
use super::recorder::StatusRecorder;
use crate::config::{ConfigError, PipelineConfig};
use crate::ports::{
    Clock, ExecutionHistoryLog, IdGenerator, MessageStore, QueueTransport, SystemClock,
    UlidGenerator,
};

/// PipelineBuilder は PipelineCoordinator を構築
///
/// # 使用例
/// ```ignore
/// let mut pipeline = PipelineBuilder::new()
///     .store(store)
///     .history(history)
///     .transport(transport)
///     .config(PipelineConfig::from_env()?)
///     .build()?;
/// pipeline.start().await?;
/// ```
///
/// # Fail-fast 設計
/// - store / history / transport は必須。欠けていれば BuildError
/// - config は build() 時に validate() する
/// - clock / id_generator は省略時に SystemClock / UlidGenerator
#[derive(Default)]
pub struct PipelineBuilder {
    store: Option<Arc<dyn MessageStore>>,
    history: Option<Arc<dyn ExecutionHistoryLog>>,
    transport: Option<Arc<dyn QueueTransport>>,
    config: PipelineConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError はパイプライン構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing component: {0}. Set it on the builder before build().")]
    MissingComponent(&'static str),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn history(mut self, history: Arc<dyn ExecutionHistoryLog>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn QueueTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// 検証してからループを組み立てる（まだ起動はしない）
    pub fn build(self) -> Result<PipelineCoordinator, BuildError> {
        let store = self.store.ok_or(BuildError::MissingComponent("store"))?;
        let history = self.history.ok_or(BuildError::MissingComponent("history"))?;
        let transport = self
            .transport
            .ok_or(BuildError::MissingComponent("transport"))?;
        let config = self.config;
        config.validate()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(SystemClock)));

        let recorder = Arc::new(StatusRecorder::new(
            Arc::clone(&store),
            history,
            clock,
            ids,
            config.store_retry_attempts,
            config.error_backoff,
        ));
        let publisher = Arc::new(PublisherLoop::new(
            store,
            Arc::clone(&transport),
            Arc::clone(&recorder),
            config.publish_exchange.clone(),
            config.batch_size,
            config.idle_backoff,
            config.error_backoff,
        ));
        let consumer = Arc::new(ConsumerLoop::new(
            Arc::clone(&transport),
            recorder,
            config.result_queue.clone(),
            config.error_backoff,
            config.ack_recheck_attempts,
            config.ack_recheck_delay,
        ));

        Ok(PipelineCoordinator::new(
            publisher,
            consumer,
            transport,
            config.result_queue,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryHistoryLog, InMemoryMessageStore, InMemoryTransport};

    #[test]
    fn test_build_success() {
        let pipeline = PipelineBuilder::new()
            .store(Arc::new(InMemoryMessageStore::new()))
            .history(Arc::new(InMemoryHistoryLog::new()))
            .transport(Arc::new(InMemoryTransport::new()))
            .build();
        assert!(pipeline.is_ok());
    }

    #[test]
    fn test_build_missing_transport() {
        let pipeline = PipelineBuilder::new()
            .store(Arc::new(InMemoryMessageStore::new()))
            .history(Arc::new(InMemoryHistoryLog::new()))
            .build();
        assert!(matches!(
            pipeline,
            Err(BuildError::MissingComponent("transport"))
        ));
    }

    #[test]
    fn test_build_invalid_config() {
        let pipeline = PipelineBuilder::new()
            .store(Arc::new(InMemoryMessageStore::new()))
            .history(Arc::new(InMemoryHistoryLog::new()))
            .transport(Arc::new(InMemoryTransport::new()))
            .config(PipelineConfig {
                batch_size: 0,
                ..PipelineConfig::default()
            })
            .build();
        assert!(matches!(pipeline, Err(BuildError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_built_pipeline_is_idle_until_started() {
        let pipeline = PipelineBuilder::new()
            .store(Arc::new(InMemoryMessageStore::new()))
            .history(Arc::new(InMemoryHistoryLog::new()))
            .transport(Arc::new(InMemoryTransport::new()))
            .build()
            .unwrap();
        assert!(!pipeline.is_publishing());
        assert!(!pipeline.is_consuming());
    }
}
