//! Executor port - トリガーされた関数の実行
//!
//! listener から見ると「遅いかもしれない・失敗するかもしれない」不透明な呼び出し。
//! 失敗は `FunctionResult::succeeded == false` で表し、Result のエラーにはしない
//! （関数の失敗は listener のエラーではないため）。

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{FunctionResult, QueueMessage};

/// The value a queue trigger hands to the executor.
#[derive(Debug, Clone)]
pub struct QueueTrigger {
    pub queue_name: String,
    pub message: QueueMessage,
}

#[async_trait]
pub trait TriggeredFunctionExecutor: Send + Sync {
    /// `cancel` fires when the host shuts down. Functions may observe it;
    /// the listener never aborts an invocation.
    async fn execute(&self, trigger: QueueTrigger, cancel: CancellationToken) -> FunctionResult;
}
