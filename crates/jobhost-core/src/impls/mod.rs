//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryQueueClient**: 開発用のキュー backend（TTL・可視性・pop receipt を再現）
//! - **TracingExceptionDispatcher**: host デフォルトの BackgroundExceptionDispatcher
//!
//! # 本番用実装
//! Azure Storage Queue などの backend は別クレートで `QueueClient` を実装します。

pub mod exception;
pub mod inmem_queue;

// 主要な型を再エクスポート
pub use self::exception::TracingExceptionDispatcher;
pub use self::inmem_queue::{InMemoryQueue, InMemoryQueueClient, is_valid_queue_name};
