//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の in-memory 実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryMessageStore**: claim と Conflict チェック付きの Message Store
//! - **InMemoryHistoryLog**: 追記のみの実行履歴
//! - **InMemoryTransport**: exchange / queue 単位の broker
//!
//! 本番用の実装（PostgreSQL, RabbitMQ）は別クレートに置く想定です。

pub mod inmem_history;
pub mod inmem_store;
pub mod inmem_transport;

pub use self::inmem_history::InMemoryHistoryLog;
pub use self::inmem_store::InMemoryMessageStore;
pub use self::inmem_transport::{InMemoryTransport, PublishedMessage};
