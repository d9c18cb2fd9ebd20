//! PipelineCoordinator - Publisher と Consumer のライフサイクル
//!
//! # 設計
//! - 2 つのループは独立した tokio タスクで、プロセス内の可変状態を共有しない
//! - ループごとに watch チャネル（停止シグナル）と JoinHandle を持つ
//! - `stop()` はシグナルを送ってから join するので、戻った時点で
//!   Message Store / 履歴への書き込みはもう起きない
//! - 片方のループが panic してももう片方は動き続ける（join 時にログを出す）

use std::sync::Arc;

use super::consumer_loop::ConsumerLoop;
use super::lifecycle::LoopHandle;
use super::publisher_loop::PublisherLoop;
use crate::domain::CoordinatorError;
use crate::ports::QueueTransport;

/// どちらのループを止めるか
///
/// 例: publish だけ止めて、届き続ける ack は consumer で捌き切る。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSignal {
    pub publish: bool,
    pub consume: bool,
}

impl StopSignal {
    pub const ALL: StopSignal = StopSignal {
        publish: true,
        consume: true,
    };
    pub const PUBLISH_ONLY: StopSignal = StopSignal {
        publish: true,
        consume: false,
    };
    pub const CONSUME_ONLY: StopSignal = StopSignal {
        publish: false,
        consume: true,
    };
}

pub struct PipelineCoordinator {
    publisher: Arc<PublisherLoop>,
    consumer: Arc<ConsumerLoop>,
    transport: Arc<dyn QueueTransport>,
    result_queue: String,
    running_publisher: Option<LoopHandle>,
    running_consumer: Option<LoopHandle>,
}

impl PipelineCoordinator {
    pub fn new(
        publisher: Arc<PublisherLoop>,
        consumer: Arc<ConsumerLoop>,
        transport: Arc<dyn QueueTransport>,
        result_queue: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            consumer,
            transport,
            result_queue: result_queue.into(),
            running_publisher: None,
            running_consumer: None,
        }
    }

    /// 動いていないループを起動する
    ///
    /// 部分停止したループや、ストリームが閉じて自分で終わった consumer も起動し直す。
    /// 両方動いていれば AlreadyRunning。
    /// broker に届かない、または結果キューを購読できなければ
    /// どちらのループも起動せずにエラーを返す。
    pub async fn start(&mut self) -> Result<(), CoordinatorError> {
        self.reap_finished().await;
        let start_publisher = self.running_publisher.is_none();
        let start_consumer = self.running_consumer.is_none();
        if !start_publisher && !start_consumer {
            return Err(CoordinatorError::AlreadyRunning);
        }

        if start_publisher {
            self.transport
                .ensure_ready()
                .await
                .map_err(CoordinatorError::PublisherStart)?;
        }
        let stream = if start_consumer {
            let stream = self
                .transport
                .consume(&self.result_queue)
                .await
                .map_err(CoordinatorError::ConsumerStart)?;
            Some(stream)
        } else {
            None
        };

        if start_publisher {
            let publisher = Arc::clone(&self.publisher);
            self.running_publisher = Some(LoopHandle::spawn("publisher", move |shutdown| async move {
                publisher.run(shutdown).await
            }));
        }
        if let Some(stream) = stream {
            let consumer = Arc::clone(&self.consumer);
            self.running_consumer = Some(LoopHandle::spawn("consumer", move |shutdown| async move {
                consumer.run(stream, shutdown).await
            }));
        }

        tracing::info!(
            result_queue = %self.result_queue,
            publisher = start_publisher,
            consumer = start_consumer,
            "pipeline started"
        );
        Ok(())
    }

    /// 自分で終わった（ストリーム終了・panic）ループの handle を回収する
    async fn reap_finished(&mut self) {
        for slot in [&mut self.running_publisher, &mut self.running_consumer] {
            if slot.as_ref().is_some_and(LoopHandle::is_finished)
                && let Some(handle) = slot.take()
            {
                handle.join().await;
            }
        }
    }

    /// 指定したループを止め、それらが終了するまで待つ
    pub async fn stop(&mut self, signal: StopSignal) {
        let publisher = if signal.publish {
            self.running_publisher.take()
        } else {
            None
        };
        let consumer = if signal.consume {
            self.running_consumer.take()
        } else {
            None
        };

        // 先に両方へシグナルを送り、並行に安全点まで進ませる
        for handle in publisher.iter().chain(consumer.iter()) {
            handle.request_shutdown();
        }
        if let Some(handle) = publisher {
            handle.join().await;
        }
        if let Some(handle) = consumer {
            handle.join().await;
        }
    }

    pub async fn shutdown(&mut self) {
        self.stop(StopSignal::ALL).await;
        tracing::info!("pipeline shut down");
    }

    /// Publisher ループが起動済みで、まだ終了していない
    pub fn is_publishing(&self) -> bool {
        self.running_publisher
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Consumer ループが起動済みで、まだ終了していない
    ///
    /// transport が結果ストリームを閉じるとループは自分で終わる。
    pub fn is_consuming(&self) -> bool {
        self.running_consumer
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}
