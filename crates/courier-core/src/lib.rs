//! courier-core
//!
//! Core building blocks of the notification delivery pipeline.
//!
//! PENDING のメッセージを broker に publish し、配送結果を受けて
//! 終端状態まで進める。状態が変わるたびに実行履歴を 1 件残す。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, message, status, history, delivery, errors）
//! - **ports**: 抽象化レイヤー（MessageStore, ExecutionHistoryLog, QueueTransport, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（builder, coordinator, publisher_loop, consumer_loop, recorder）
//! - **impls**: 実装（InMemoryMessageStore など開発・テスト用）
//! - **config**: 環境変数からの設定読み込み

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use app::{BuildError, PipelineBuilder, PipelineCoordinator, StopSignal};
pub use config::{ConfigError, PipelineConfig};
