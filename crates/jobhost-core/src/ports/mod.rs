//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部の協調者（キュー backend、関数の実行系、例外通知先）への
//! インターフェースで、listener はこれらにだけ依存します。

pub mod clock;
pub mod exception;
pub mod executor;
pub mod id_generator;
pub mod queue;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::exception::BackgroundExceptionDispatcher;
pub use self::executor::{QueueTrigger, TriggeredFunctionExecutor};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::queue::{QueueClient, QueueError, StorageQueue, VisibilityUpdate};
