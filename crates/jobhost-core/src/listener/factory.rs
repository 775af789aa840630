//! QueueListenerFactory - listener の組み立て
//!
//! # Fail-fast 設計
//! - キュー名と設定は `new()` で検証する（polling 開始前に弾く）
//! - poison キューの参照もここで一度だけ導出する
//! - `create()` 自体は失敗しない

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::config::QueuesConfig;
use crate::domain::PoisonRoute;
use crate::error::HostError;
use crate::listener::delay::{QueuePollingIntervals, RandomizedExponentialBackoff};
use crate::listener::poison::PoisonQueueRouter;
use crate::listener::queue_listener::{ListenerSettings, MessageProcessor, QueueListener};
use crate::listener::stats::ListenerStats;
use crate::listener::watcher::SharedQueueWatcher;
use crate::ports::{BackgroundExceptionDispatcher, QueueClient, StorageQueue, TriggeredFunctionExecutor};

/// Type-keyed shared state for one host.
///
/// Replaces a process-wide singleton: everything built from the same provider
/// sees the same `T`, separate providers are fully independent.
#[derive(Default)]
pub struct SharedContextProvider {
    values: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl SharedContextProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the shared `T`, creating it with `init` on first use.
    ///
    /// `init` runs under the map's shard lock; it must not call back into
    /// this provider.
    pub fn get_or_create<T, F>(&self, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        match self.values.entry(TypeId::of::<T>()) {
            Entry::Occupied(mut occupied) => match Arc::clone(occupied.get()).downcast::<T>() {
                Ok(value) => value,
                Err(_) => {
                    let value = Arc::new(init());
                    occupied.insert(value.clone());
                    value
                }
            },
            Entry::Vacant(vacant) => {
                let value = Arc::new(init());
                vacant.insert(value.clone());
                value
            }
        }
    }
}

pub struct QueueListenerFactory {
    queue: Arc<dyn StorageQueue>,
    poison_queue: Option<Arc<dyn StorageQueue>>,
    config: QueuesConfig,
    dispatcher: Arc<dyn BackgroundExceptionDispatcher>,
    shared_context: Arc<SharedContextProvider>,
    executor: Arc<dyn TriggeredFunctionExecutor>,
}

impl QueueListenerFactory {
    pub fn new(
        client: &dyn QueueClient,
        queue_name: &str,
        config: QueuesConfig,
        dispatcher: Arc<dyn BackgroundExceptionDispatcher>,
        shared_context: Arc<SharedContextProvider>,
        executor: Arc<dyn TriggeredFunctionExecutor>,
    ) -> Result<Self, HostError> {
        if !client.is_valid_queue_name(queue_name) {
            return Err(HostError::InvalidQueueName(queue_name.to_string()));
        }
        config.validate()?;

        let poison_queue = PoisonRoute::derive(queue_name, |name| client.is_valid_queue_name(name))
            .map(|route| client.queue(&route.poison_queue_name));
        if poison_queue.is_none() {
            tracing::debug!(queue = %queue_name, "no poison queue for this queue");
        }

        Ok(Self {
            queue: client.queue(queue_name),
            poison_queue,
            config,
            dispatcher,
            shared_context,
            executor,
        })
    }

    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    pub fn poison_queue_name(&self) -> Option<&str> {
        self.poison_queue.as_deref().map(|q| q.name())
    }

    pub fn create(&self) -> QueueListener {
        let watcher = self.shared_context.get_or_create(SharedQueueWatcher::new);
        let subscription = watcher.register(self.queue.name());
        let stats = Arc::new(ListenerStats::new());

        let poison = PoisonQueueRouter::new(
            Arc::clone(&self.queue),
            self.poison_queue.clone(),
            self.config.max_dequeue_count,
            watcher,
            Arc::clone(&stats),
        );
        let processor = MessageProcessor {
            queue: Arc::clone(&self.queue),
            executor: Arc::clone(&self.executor),
            poison,
            dispatcher: Arc::clone(&self.dispatcher),
            stats,
            visibility_timeout: self.config.visibility_timeout(),
            failed_visibility_timeout: self.config.failed_visibility_timeout(),
        };
        let delay = RandomizedExponentialBackoff::clamped(
            QueuePollingIntervals::MINIMUM,
            self.config.max_polling_interval(),
        );
        let settings = ListenerSettings {
            batch_size: self.config.batch_size,
            new_batch_threshold: self.config.new_batch_threshold(),
            visibility_timeout: self.config.visibility_timeout(),
            failed_visibility_timeout: self.config.failed_visibility_timeout(),
        };

        QueueListener::new(processor, Box::new(delay), subscription, settings)
    }
}
