//! QueueOutput - 関数やアプリから別キューへメッセージを書く
//!
//! enqueue のあと watcher に通知するので、同じ host 内でそのキューを
//! 監視している listener は backoff を待たずに poll する。

use std::sync::Arc;

use crate::domain::QueueMessage;
use crate::error::{HostError, QueueOperation};
use crate::listener::MessageEnqueuedWatcher;
use crate::ports::StorageQueue;

#[derive(Clone)]
pub struct QueueOutput {
    queue: Arc<dyn StorageQueue>,
    watcher: Arc<dyn MessageEnqueuedWatcher>,
}

impl QueueOutput {
    pub fn new(queue: Arc<dyn StorageQueue>, watcher: Arc<dyn MessageEnqueuedWatcher>) -> Self {
        Self { queue, watcher }
    }

    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    /// Create the queue if needed, enqueue `body`, then notify listeners.
    pub async fn add(&self, body: impl Into<Vec<u8>>) -> Result<QueueMessage, HostError> {
        let to_error = |source| HostError::queue(self.queue.name(), QueueOperation::Enqueue, source);

        self.queue.create_if_not_exists().await.map_err(to_error)?;
        let message = self.queue.enqueue(body.into()).await.map_err(to_error)?;
        self.watcher.notify(self.queue.name());

        tracing::debug!(queue = %self.queue.name(), message_id = %message.id, "message added");
        Ok(message)
    }
}
