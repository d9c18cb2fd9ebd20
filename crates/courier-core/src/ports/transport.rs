//! QueueTransport port - broker との接続（RabbitMQ または InMemory）
//!
//! 再接続、チャネルの再宣言、認証情報はこの collaborator の内部の話で、
//! core は publish / consume が完了するか `TransportError` で失敗するかだけを知ります。

use async_trait::async_trait;

use crate::domain::{DeliveryResult, Message, TransportError};

/// QueueTransport は publish と consume のプリミティブ
///
/// publish と consume を並行に呼んでも安全であること（内部で同期する）。
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// broker に到達できるか確認する（起動時の fail-fast 用）
    async fn ensure_ready(&self) -> Result<(), TransportError>;

    /// メッセージを `exchange` に送る。Message Store には触れない。
    async fn publish(&self, exchange: &str, message: &Message) -> Result<(), TransportError>;

    /// `queue` の配送結果を購読する
    ///
    /// 返るストリームは途中から再開できない。接続が切れたら consume し直す。
    async fn consume(&self, queue: &str) -> Result<Box<dyn DeliveryStream>, TransportError>;
}

/// DeliveryStream は配送結果の pull 型ストリーム
///
/// - `Ok(Some(result))`: 次の結果
/// - `Ok(None)`: transport がストリームを閉じた（正常終了）
/// - `Err(_)`: 接続断。このストリームはもう使えない
///
/// `next_result` は cancel-safe であること（shutdown と select される）。
#[async_trait]
pub trait DeliveryStream: Send {
    async fn next_result(&mut self) -> Result<Option<DeliveryResult>, TransportError>;
}
