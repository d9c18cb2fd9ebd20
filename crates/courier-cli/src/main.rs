use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use courier_core::domain::{DeliveryResult, MessageId, NewMessage, StatusCounts};
use courier_core::impls::{InMemoryHistoryLog, InMemoryMessageStore, InMemoryTransport};
use courier_core::ports::MessageStore;
use courier_core::{PipelineBuilder, PipelineConfig, StopSignal};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SEED_MESSAGES: usize = 12;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// broker 役：publish されたメッセージを取り出し、配送結果を返す
///
/// 5 件に 1 件は宛先が 500 を返したことにする。
async fn broker_simulator(transport: Arc<InMemoryTransport>, exchange: String, queue: String) {
    let mut seen = 0usize;
    loop {
        let Some(published) = transport
            .pop_published(&exchange, Duration::from_secs(1))
            .await
        else {
            continue;
        };
        seen += 1;

        let destination = published
            .decode()
            .map(|m| m.destination)
            .unwrap_or_default();
        let result = if seen % 5 == 0 {
            DeliveryResult::failed(published.message_id, format!("{destination} returned 500"))
        } else {
            DeliveryResult::delivered(published.message_id)
        };
        transport.deliver_result(&queue, result).await;
    }
}

async fn seed(store: &InMemoryMessageStore) -> Vec<MessageId> {
    let mut ids = Vec::with_capacity(SEED_MESSAGES);
    for i in 0..SEED_MESSAGES {
        let new = NewMessage::new(
            format!("https://hooks.example.com/team-{}", i % 3),
            serde_json::json!({ "text": format!("deploy #{i} finished") }),
        )
        .with_metadata("event_type", "DEPLOY")
        .with_metadata("channel", "slack");
        ids.push(store.insert(new).await.id);
    }
    ids
}

async fn wait_for_terminal(store: &InMemoryMessageStore, total: usize) -> anyhow::Result<StatusCounts> {
    loop {
        let counts = store.counts_by_status().await?;
        if counts.terminal() == total {
            return Ok(counts);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn wait_for_no_enqueued(store: &InMemoryMessageStore) -> anyhow::Result<()> {
    while store.counts_by_status().await?.enqueued > 0 {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier=info,courier_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // (A) 設定と in-memory の ports を用意
    let config = PipelineConfig::from_env().context("failed to load pipeline config")?;
    let store = Arc::new(InMemoryMessageStore::new());
    let history = Arc::new(InMemoryHistoryLog::new());
    let transport = Arc::new(InMemoryTransport::new());

    // (B) PENDING を投入。1 件は broker が受け付けない
    let ids = seed(&store).await;
    if let Some(first) = ids.first() {
        transport.reject(*first).await;
    }

    // (C) broker 役を起動
    let broker = tokio::spawn(broker_simulator(
        transport.clone(),
        config.publish_exchange.clone(),
        config.result_queue.clone(),
    ));

    // (D) パイプラインを組み立てて起動
    let mut pipeline = PipelineBuilder::new()
        .store(store.clone())
        .history(history.clone())
        .transport(transport.clone())
        .config(config)
        .build()?;
    pipeline.start().await?;

    // (E) 全件が終端状態になるか、Ctrl-C で抜ける
    tokio::select! {
        counts = tokio::time::timeout(DRAIN_TIMEOUT, wait_for_terminal(&store, ids.len())) => {
            match counts {
                Ok(counts) => {
                    let counts = counts?;
                    tracing::info!(terminal = counts.terminal(), "all messages settled");
                }
                Err(_) => tracing::warn!(timeout_secs = DRAIN_TIMEOUT.as_secs(), "messages did not settle in time"),
            }
        }
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }

    // (F) publish を先に止め、ENQUEUED が残らなくなるまで結果を捌いてから consume を止める
    pipeline.stop(StopSignal::PUBLISH_ONLY).await;
    match tokio::time::timeout(DRAIN_TIMEOUT, wait_for_no_enqueued(&store)).await {
        Ok(drained) => drained?,
        Err(_) => tracing::warn!(timeout_secs = DRAIN_TIMEOUT.as_secs(), "stopping consumer with results outstanding"),
    }
    pipeline.stop(StopSignal::CONSUME_ONLY).await;
    broker.abort();

    let counts = store.counts_by_status().await?;
    println!(
        "pending={} enqueued={} not_enqueued={} delivered={} delivered_failed={} history_entries={}",
        counts.pending,
        counts.enqueued,
        counts.not_enqueued,
        counts.delivered,
        counts.delivered_failed,
        history.len().await,
    );
    Ok(())
}
