//! Errors - エラー型と分類
//!
//! ループはエラーを `ErrorKind` で分類して扱いを決めます。
//! - Transient: 一時的なエラー（記録して次へ進む）
//! - Permanent: 恒久的なエラー（リトライしても成功しないので捨てる）
//! - Infrastructure: インフラエラー（store/broker の障害、backoff して再試行）

use thiserror::Error;

use super::ids::MessageId;
use super::status::MessageStatus;

/// ErrorKind はエラーの運用分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// StoreError は Message Store / Execution History Log のエラー
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("message not found: {0}")]
    NotFound(MessageId),

    #[error("illegal status transition for {id}: {current} -> {requested}")]
    Conflict {
        id: MessageId,
        current: MessageStatus,
        requested: MessageStatus,
    },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            // 業務上の「見つからない」は at-least-once 配送の想定内ノイズ
            StoreError::NotFound(_) => ErrorKind::Transient,
            StoreError::Conflict { .. } => ErrorKind::Permanent,
            StoreError::Unavailable(_) => ErrorKind::Infrastructure,
        }
    }
}

/// TransportError は Queue Transport Client のエラー
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("broker unreachable: {0}")]
    Unavailable(String),

    #[error("publish rejected: {0}")]
    Rejected(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("encode failed: {0}")]
    Encode(String),
}

impl TransportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransportError::Rejected(_) | TransportError::Encode(_) => ErrorKind::Permanent,
            TransportError::Unavailable(_) | TransportError::ConnectionLost(_) => {
                ErrorKind::Infrastructure
            }
        }
    }
}

/// CoordinatorError は `PipelineCoordinator::start()` の失敗
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("publisher could not start: {0}")]
    PublisherStart(#[source] TransportError),

    #[error("consumer could not start: {0}")]
    ConsumerStart(#[source] TransportError),

    #[error("pipeline is already running")]
    AlreadyRunning,
}
