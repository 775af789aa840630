//! Listener - キューの polling と配送
//!
//! # 主要コンポーネント
//! - **DelayStrategy**: 空 poll が続いたときの待ち時間（randomized exponential backoff）
//! - **SharedQueueWatcher**: 同一プロセス内の enqueue を listener に即時通知
//! - **PoisonQueueRouter**: 失敗し続けるメッセージを `<queue>-poison` に隔離
//! - **MessageLeaseRenewer**: 実行中メッセージの可視性タイムアウト延長
//! - **QueueListener**: polling loop 本体
//! - **QueueListenerFactory**: 検証とワイヤリング

pub mod delay;
pub mod factory;
pub mod lease;
pub mod poison;
pub mod queue_listener;
pub mod stats;
pub mod watcher;

// 主要な型を再エクスポート
pub use self::delay::{DelayStrategy, QueuePollingIntervals, RandomizedExponentialBackoff};
pub use self::factory::{QueueListenerFactory, SharedContextProvider};
pub use self::lease::{LeaseStatus, MessageLeaseRenewer, RenewedLease};
pub use self::poison::{PoisonOutcome, PoisonQueueRouter};
pub use self::queue_listener::{ListenerSettings, QueueListener};
pub use self::stats::{ListenerStats, ListenerStatsSnapshot};
pub use self::watcher::{MessageEnqueuedWatcher, QueueSubscription, SharedQueueWatcher};
