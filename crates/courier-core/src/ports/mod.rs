//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部の collaborator（DB, broker など）へのインターフェースで、
//! 実装の詳細を隠します。core はこの trait だけに依存します。
//!
//! - MessageStore が Message の正本
//! - ExecutionHistoryLog は追記のみの監査ログ
//! - QueueTransport は broker への publish と結果の consume

pub mod clock;
pub mod history_log;
pub mod id_generator;
pub mod message_store;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::history_log::ExecutionHistoryLog;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::message_store::MessageStore;
pub use self::transport::{DeliveryStream, QueueTransport};
