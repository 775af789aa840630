//! Poison queue naming.

/// Suffix appended to a queue name to form its poison queue name.
pub const POISON_QUEUE_SUFFIX: &str = "-poison";

/// Main queue name -> poison queue name.
///
/// Computed once when a listener is wired and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoisonRoute {
    pub queue_name: String,
    pub poison_queue_name: String,
}

impl PoisonRoute {
    /// Derive the poison route for `queue_name`.
    ///
    /// Returns `None` when:
    /// - the queue is itself a poison queue (no chaining), or
    /// - the derived name is rejected by `is_valid_name` (e.g. too long).
    pub fn derive(queue_name: &str, is_valid_name: impl Fn(&str) -> bool) -> Option<Self> {
        if is_poison_queue(queue_name) {
            return None;
        }

        let poison_queue_name = format!("{queue_name}{POISON_QUEUE_SUFFIX}");
        if !is_valid_name(&poison_queue_name) {
            return None;
        }

        Some(Self {
            queue_name: queue_name.to_string(),
            poison_queue_name,
        })
    }
}

pub fn is_poison_queue(queue_name: &str) -> bool {
    queue_name.ends_with(POISON_QUEUE_SUFFIX)
}
