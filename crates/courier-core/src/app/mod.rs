//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてパイプラインを実装します。
//!
//! # 主要コンポーネント
//! - **PipelineBuilder**: パイプラインの構築とワイヤリング
//! - **PipelineCoordinator**: 2 つのループの起動・停止
//! - **PublisherLoop**: PENDING を取り出して broker に publish（ENQUEUED / NOT_ENQUEUED）
//! - **ConsumerLoop**: 配送結果を読んで DELIVERED / DELIVERED_FAILED を記録
//! - **StatusRecorder**: 状態更新 + 履歴追記 + 遷移ログ

pub mod builder;
pub mod consumer_loop;
pub mod coordinator;
mod lifecycle;
pub mod publisher_loop;
pub mod recorder;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, PipelineBuilder};
pub use self::consumer_loop::{ConsumerLoop, ResultDisposition};
pub use self::coordinator::{PipelineCoordinator, StopSignal};
pub use self::publisher_loop::{BatchReport, PublisherLoop};
pub use self::recorder::{RecordOutcome, StatusRecorder};
