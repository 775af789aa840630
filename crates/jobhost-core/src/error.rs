use std::fmt;

use thiserror::Error;

use crate::ports::QueueError;

/// The queue operation a background failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOperation {
    Enqueue,
    Dequeue,
    Delete,
    RenewLease,
    Release,
    MoveToPoison,
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            QueueOperation::Enqueue => "enqueue",
            QueueOperation::Dequeue => "dequeue",
            QueueOperation::Delete => "delete",
            QueueOperation::RenewLease => "lease renewal",
            QueueOperation::Release => "release",
            QueueOperation::MoveToPoison => "move to poison queue",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid queue name '{0}'")]
    InvalidQueueName(String),

    #[error("{operation} on queue '{queue}' failed: {source}")]
    Queue {
        queue: String,
        operation: QueueOperation,
        #[source]
        source: QueueError,
    },

    #[error("message processing on queue '{queue}' panicked: {reason}")]
    ProcessingPanicked { queue: String, reason: String },

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl HostError {
    pub fn queue(queue: impl Into<String>, operation: QueueOperation, source: QueueError) -> Self {
        HostError::Queue {
            queue: queue.into(),
            operation,
            source,
        }
    }
}
