//! Domain model (IDs, messages, outcomes, poison routes).

pub mod ids;
pub mod message;
pub mod outcome;
pub mod poison;

pub use ids::{FunctionInstanceId, Id, IdMarker, MessageId, PopReceipt};
pub use message::QueueMessage;
pub use outcome::{FunctionInvocationError, FunctionResult};
pub use poison::{POISON_QUEUE_SUFFIX, PoisonRoute, is_poison_queue};
