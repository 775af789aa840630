//! PoisonQueueRouter - 失敗し続けるメッセージの隔離
//!
//! # 判定は 2 箇所
//! - **実行前** `exceeds_budget`: `dequeue_count > max`。このメッセージは関数に渡さない
//! - **失敗後** `is_last_attempt`: `dequeue_count >= max`。最後の試行が失敗したら即隔離
//!
//! max = 5 なら 5 回目の失敗で poison キューへ移る。
//! 6 回目の配送が来るのは、前回の隔離が途中で失敗した場合だけ。

use std::sync::Arc;

use crate::domain::QueueMessage;
use crate::error::{HostError, QueueOperation};
use crate::listener::stats::ListenerStats;
use crate::listener::watcher::MessageEnqueuedWatcher;
use crate::ports::StorageQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoisonOutcome {
    /// Copied to the poison queue and deleted from the main queue.
    Routed,
    /// Copied, but the delete found our receipt stale. Someone else owns the
    /// message now.
    LeaseLost,
    /// No poison queue for this queue. The message is left to expire.
    Unroutable,
}

pub struct PoisonQueueRouter {
    queue: Arc<dyn StorageQueue>,
    poison_queue: Option<Arc<dyn StorageQueue>>,
    max_dequeue_count: u32,
    watcher: Arc<dyn MessageEnqueuedWatcher>,
    stats: Arc<ListenerStats>,
}

impl PoisonQueueRouter {
    pub fn new(
        queue: Arc<dyn StorageQueue>,
        poison_queue: Option<Arc<dyn StorageQueue>>,
        max_dequeue_count: u32,
        watcher: Arc<dyn MessageEnqueuedWatcher>,
        stats: Arc<ListenerStats>,
    ) -> Self {
        Self {
            queue,
            poison_queue,
            max_dequeue_count,
            watcher,
            stats,
        }
    }

    pub fn poison_queue_name(&self) -> Option<&str> {
        self.poison_queue.as_deref().map(|q| q.name())
    }

    pub fn max_dequeue_count(&self) -> u32 {
        self.max_dequeue_count
    }

    pub fn exceeds_budget(&self, message: &QueueMessage) -> bool {
        message.dequeue_count > self.max_dequeue_count
    }

    pub fn is_last_attempt(&self, message: &QueueMessage) -> bool {
        message.dequeue_count >= self.max_dequeue_count
    }

    /// Move `message` to the poison queue.
    ///
    /// The copy happens before the delete, so a crash in between duplicates
    /// the message rather than losing it.
    pub async fn route(&self, message: &QueueMessage) -> Result<PoisonOutcome, HostError> {
        let Some(poison_queue) = &self.poison_queue else {
            tracing::warn!(
                queue = %self.queue.name(),
                message_id = %message.id,
                dequeue_count = message.dequeue_count,
                "message exceeded max dequeue count but the queue has no poison queue; leaving it to expire"
            );
            self.stats.record_unroutable_poison();
            return Ok(PoisonOutcome::Unroutable);
        };

        let to_poison = |source| HostError::queue(poison_queue.name(), QueueOperation::MoveToPoison, source);
        poison_queue.create_if_not_exists().await.map_err(to_poison)?;
        poison_queue
            .enqueue(message.body.clone())
            .await
            .map_err(to_poison)?;
        self.watcher.notify(poison_queue.name());

        match self.queue.delete(message).await {
            Ok(()) => {
                tracing::info!(
                    queue = %self.queue.name(),
                    poison_queue = %poison_queue.name(),
                    message_id = %message.id,
                    dequeue_count = message.dequeue_count,
                    "message moved to poison queue"
                );
                self.stats.record_poisoned();
                Ok(PoisonOutcome::Routed)
            }
            Err(err) if err.is_lease_lost() => {
                tracing::debug!(
                    queue = %self.queue.name(),
                    message_id = %message.id,
                    "lease lost before the poisoned message could be deleted"
                );
                self.stats.record_lease_lost();
                Ok(PoisonOutcome::LeaseLost)
            }
            Err(err) => Err(HostError::queue(self.queue.name(), QueueOperation::Delete, err)),
        }
    }
}
