//! Queue backend port - 永続キュー（Azure Storage Queue 相当、または InMemory）
//!
//! # 設計原則
//! - メッセージ単位の排他は backend の「dequeue + lease」だけに依存する
//!   （アプリ側で所有権ロックを取らない）
//! - pop receipt が古い操作は `QueueError::MessageNotFound` で返す
//!   （呼び出し側はエラーではなく「もう自分の担当ではない」と解釈する）

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{MessageId, PopReceipt, QueueMessage};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("queue '{0}' does not exist")]
    QueueNotFound(String),

    /// The message was deleted, redelivered, or its lease expired.
    #[error("message {0} is no longer held by this pop receipt")]
    MessageNotFound(MessageId),

    #[error("invalid queue name '{0}'")]
    InvalidQueueName(String),

    #[error("queue service unavailable: {0}")]
    Unavailable(String),
}

impl QueueError {
    /// Stale-lease outcome: another actor owns the message now.
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, QueueError::MessageNotFound(_))
    }
}

/// New lease state returned by a successful visibility update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityUpdate {
    pub pop_receipt: PopReceipt,
    pub next_visible_time: DateTime<Utc>,
}

/// Handle to one named queue.
#[async_trait]
pub trait StorageQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn exists(&self) -> Result<bool, QueueError>;

    /// Returns `true` when the queue was created by this call.
    async fn create_if_not_exists(&self) -> Result<bool, QueueError>;

    async fn enqueue(&self, body: Vec<u8>) -> Result<QueueMessage, QueueError>;

    /// Dequeue up to `max_count` visible messages, hiding each of them for
    /// `visibility_timeout` and issuing a fresh pop receipt.
    async fn dequeue_batch(
        &self,
        visibility_timeout: Duration,
        max_count: usize,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Hide `message` for `visibility_timeout` from now. Invalidates the
    /// receipt the call was made with.
    async fn update_visibility(
        &self,
        message: &QueueMessage,
        visibility_timeout: Duration,
    ) -> Result<VisibilityUpdate, QueueError>;

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError>;
}

/// Entry point to a queue service account.
pub trait QueueClient: Send + Sync {
    /// Get a reference to a queue. Does not create it.
    fn queue(&self, name: &str) -> Arc<dyn StorageQueue>;

    fn is_valid_queue_name(&self, name: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_message_not_found_means_lease_lost() {
        assert!(QueueError::MessageNotFound(MessageId::new("m")).is_lease_lost());
        assert!(!QueueError::QueueNotFound("q".into()).is_lease_lost());
        assert!(!QueueError::Unavailable("503".into()).is_lease_lost());
    }
}
