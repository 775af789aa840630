//! SharedQueueWatcher - 同一プロセス内の enqueue を listener に知らせる
//!
//! # 学習ポイント
//! - 通知は最適化にすぎない（取りこぼしても listener は自分の周期で poll する）
//! - pending フラグは AtomicBool の swap で read-and-clear する
//! - 登録ごとに Weak を持つので、listener が消えれば次の notify で掃除される

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio::sync::Notify;

/// Anything that enqueues can tell listeners about it.
pub trait MessageEnqueuedWatcher: Send + Sync {
    fn notify(&self, queue_name: &str);
}

#[derive(Debug, Default)]
struct QueueSignal {
    pending: AtomicBool,
    wake: Notify,
}

/// Process-wide map of queue name -> registered listeners.
#[derive(Debug, Default)]
pub struct SharedQueueWatcher {
    registrations: DashMap<String, Vec<Weak<QueueSignal>>>,
}

impl SharedQueueWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, queue_name: &str) -> QueueSubscription {
        let signal = Arc::new(QueueSignal::default());
        let mut entry = self.registrations.entry(queue_name.to_string()).or_default();
        entry.retain(|weak| weak.strong_count() > 0);
        entry.push(Arc::downgrade(&signal));

        QueueSubscription {
            queue_name: queue_name.to_string(),
            signal,
        }
    }

    /// Read-and-clear the pending flag of every registration for `queue_name`.
    pub fn was_notified_since_last_check(&self, queue_name: &str) -> bool {
        let Some(entry) = self.registrations.get(queue_name) else {
            return false;
        };
        entry
            .iter()
            .filter_map(Weak::upgrade)
            .fold(false, |notified, signal| {
                signal.pending.swap(false, Ordering::AcqRel) || notified
            })
    }

    pub fn registration_count(&self, queue_name: &str) -> usize {
        self.registrations
            .get(queue_name)
            .map(|entry| entry.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

impl MessageEnqueuedWatcher for SharedQueueWatcher {
    fn notify(&self, queue_name: &str) {
        // 未登録のキュー名は無視（entry を作らない）
        let Some(mut entry) = self.registrations.get_mut(queue_name) else {
            return;
        };
        entry.retain(|weak| match weak.upgrade() {
            Some(signal) => {
                signal.pending.store(true, Ordering::Release);
                signal.wake.notify_one();
                true
            }
            None => false,
        });
    }
}

/// One listener's view of the watcher.
#[derive(Debug)]
pub struct QueueSubscription {
    queue_name: String,
    signal: Arc<QueueSignal>,
}

impl QueueSubscription {
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Read-and-clear this registration's pending flag.
    pub fn take_pending(&self) -> bool {
        self.signal.pending.swap(false, Ordering::AcqRel)
    }

    /// Resolves once a notification is pending. Does not clear it.
    pub async fn notified(&self) {
        loop {
            if self.signal.pending.load(Ordering::Acquire) {
                return;
            }
            // 前回 take_pending で消費済みの permit は pending=false なので待ち直す
            self.signal.wake.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn notify_sets_flag_once() {
        let watcher = SharedQueueWatcher::new();
        let _sub = watcher.register("orders");

        assert!(!watcher.was_notified_since_last_check("orders"));
        watcher.notify("orders");
        assert!(watcher.was_notified_since_last_check("orders"));
        assert!(!watcher.was_notified_since_last_check("orders"));
    }

    #[test]
    fn unknown_queue_is_ignored() {
        let watcher = SharedQueueWatcher::new();
        watcher.notify("nobody-listens");
        assert!(!watcher.was_notified_since_last_check("nobody-listens"));
        assert_eq!(watcher.registration_count("nobody-listens"), 0);
    }

    #[test]
    fn each_registration_has_its_own_flag() {
        let watcher = SharedQueueWatcher::new();
        let a = watcher.register("orders");
        let b = watcher.register("orders");
        let other = watcher.register("invoices");

        watcher.notify("orders");

        assert!(a.take_pending());
        assert!(!a.take_pending());
        assert!(b.take_pending());
        assert!(!other.take_pending());
    }

    #[test]
    fn dropped_subscriptions_are_pruned() {
        let watcher = SharedQueueWatcher::new();
        let a = watcher.register("orders");
        let b = watcher.register("orders");
        assert_eq!(watcher.registration_count("orders"), 2);

        drop(a);
        watcher.notify("orders");
        assert_eq!(watcher.registration_count("orders"), 1);
        assert!(b.take_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn notified_wakes_a_waiting_subscription() {
        let watcher = Arc::new(SharedQueueWatcher::new());
        let sub = watcher.register("orders");

        let w = Arc::clone(&watcher);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            w.notify("orders");
        });

        tokio::time::timeout(Duration::from_secs(10), sub.notified())
            .await
            .expect("notification should arrive");
        assert!(sub.take_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn consumed_notification_does_not_wake_again() {
        let watcher = SharedQueueWatcher::new();
        let sub = watcher.register("orders");

        watcher.notify("orders");
        assert!(sub.take_pending());

        let woke = tokio::time::timeout(Duration::from_secs(1), sub.notified()).await;
        assert!(woke.is_err());
    }
}
