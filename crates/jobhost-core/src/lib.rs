//! jobhost-core
//!
//! Queue-triggered function host: polls storage queues, runs functions with
//! lease renewal, and quarantines messages that keep failing.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, message, outcome, poison route）
//! - **ports**: 抽象化レイヤー（StorageQueue, QueueClient, TriggeredFunctionExecutor, など）
//! - **impls**: 実装（InMemoryQueueClient など開発用）
//! - **listener**: polling loop とその部品（delay, watcher, poison, lease, factory）
//! - **app**: アプリケーション層（builder, host, runtime, output）
//! - **config** / **logging** / **error**: 設定・ログ・エラー型

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod listener;
pub mod logging;
pub mod ports;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{JobHost, JobHostBuilder, QueueFunction, QueueOutput, RunningHost};
pub use config::{HostConfig, QueuesConfig, load_config};
pub use error::HostError;
