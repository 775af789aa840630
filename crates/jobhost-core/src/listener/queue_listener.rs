//! QueueListener - polling loop
//!
//! # 1 サイクル
//! 1. watcher に pending があれば待たずに poll（delay もリセット）
//! 2. なければ delay だけ待つ（cancel / watcher の wake-up と競合させる）
//! 3. dequeue_batch
//! 4. メッセージごとに task を spawn（poison 判定 → lease 更新 + 実行 → delete / poison / 放置）
//! 5. in-flight が new_batch_threshold 以下になるまで待つ
//! 6. 見つかったかどうかを delay に渡す
//!
//! # 学習ポイント
//! - メッセージの排他は backend の dequeue + lease だけ（ここではロックを取らない）
//! - backend エラーは dispatcher に報告してループは続行
//! - cancel 後は新しい dequeue をしない。in-flight は abort せずに drain する

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::domain::QueueMessage;
use crate::error::{HostError, QueueOperation};
use crate::listener::delay::DelayStrategy;
use crate::listener::lease::{LeaseStatus, MessageLeaseRenewer};
use crate::listener::poison::PoisonQueueRouter;
use crate::listener::stats::ListenerStats;
use crate::listener::watcher::QueueSubscription;
use crate::ports::{
    BackgroundExceptionDispatcher, QueueError, QueueTrigger, StorageQueue,
    TriggeredFunctionExecutor,
};

/// Per-listener tuning, already validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerSettings {
    pub batch_size: usize,
    pub new_batch_threshold: usize,
    pub visibility_timeout: Duration,
    pub failed_visibility_timeout: Option<Duration>,
}

/// Handles one dequeued message from start to terminal action.
pub(crate) struct MessageProcessor {
    pub(crate) queue: Arc<dyn StorageQueue>,
    pub(crate) executor: Arc<dyn TriggeredFunctionExecutor>,
    pub(crate) poison: PoisonQueueRouter,
    pub(crate) dispatcher: Arc<dyn BackgroundExceptionDispatcher>,
    pub(crate) stats: Arc<ListenerStats>,
    pub(crate) visibility_timeout: Duration,
    pub(crate) failed_visibility_timeout: Option<Duration>,
}

impl MessageProcessor {
    async fn process(&self, message: QueueMessage, cancel: CancellationToken) {
        if self.poison.exceeds_budget(&message) {
            self.move_to_poison(&message).await;
            return;
        }

        let renewer = MessageLeaseRenewer::start(
            Arc::clone(&self.queue),
            message.clone(),
            self.visibility_timeout,
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.stats),
        );

        let trigger = QueueTrigger {
            queue_name: self.queue.name().to_string(),
            message,
        };
        let result = self.executor.execute(trigger, cancel).await;

        // renewal を止めてから終端処理
        let lease = renewer.stop().await;
        let message = lease.message;

        if result.succeeded {
            self.stats.record_success();
        } else {
            self.stats.record_failure();
            tracing::debug!(
                queue = %self.queue.name(),
                message_id = %message.id,
                instance_id = %result.instance_id,
                dequeue_count = message.dequeue_count,
                "function failed"
            );
        }

        if lease.status == LeaseStatus::Lost {
            return;
        }

        if result.succeeded {
            self.delete(&message).await;
        } else if self.poison.is_last_attempt(&message) {
            self.move_to_poison(&message).await;
        } else if let Some(timeout) = self.failed_visibility_timeout {
            self.release(&message, timeout).await;
        }
    }

    async fn delete(&self, message: &QueueMessage) {
        match self.queue.delete(message).await {
            Ok(()) => {}
            Err(err) => self.queue_error(QueueOperation::Delete, message, err),
        }
    }

    async fn release(&self, message: &QueueMessage, timeout: Duration) {
        if let Err(err) = self.queue.update_visibility(message, timeout).await {
            self.queue_error(QueueOperation::Release, message, err);
        }
    }

    async fn move_to_poison(&self, message: &QueueMessage) {
        if let Err(err) = self.poison.route(message).await {
            self.stats.record_backend_error();
            self.dispatcher.report(&err);
        }
    }

    fn queue_error(&self, operation: QueueOperation, message: &QueueMessage, err: QueueError) {
        if err.is_lease_lost() {
            tracing::debug!(
                queue = %self.queue.name(),
                message_id = %message.id,
                %operation,
                "lease lost before terminal action"
            );
            self.stats.record_lease_lost();
            return;
        }
        self.stats.record_backend_error();
        self.dispatcher
            .report(&HostError::queue(self.queue.name(), operation, err));
    }
}

pub struct QueueListener {
    queue: Arc<dyn StorageQueue>,
    processor: Arc<MessageProcessor>,
    delay: Box<dyn DelayStrategy>,
    subscription: QueueSubscription,
    settings: ListenerSettings,
    dispatcher: Arc<dyn BackgroundExceptionDispatcher>,
    stats: Arc<ListenerStats>,
}

impl QueueListener {
    pub(crate) fn new(
        processor: MessageProcessor,
        delay: Box<dyn DelayStrategy>,
        subscription: QueueSubscription,
        settings: ListenerSettings,
    ) -> Self {
        Self {
            queue: Arc::clone(&processor.queue),
            dispatcher: Arc::clone(&processor.dispatcher),
            stats: Arc::clone(&processor.stats),
            processor: Arc::new(processor),
            delay,
            subscription,
            settings,
        }
    }

    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    pub fn poison_queue_name(&self) -> Option<&str> {
        self.processor.poison.poison_queue_name()
    }

    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Poll until `cancel` fires, then wait for in-flight messages.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            queue = %self.queue.name(),
            poison_queue = ?self.poison_queue_name(),
            batch_size = self.settings.batch_size,
            "queue listener started"
        );

        let mut in_flight: JoinSet<()> = JoinSet::new();
        // 起動直後は待たずに poll
        let mut wait = Duration::ZERO;

        loop {
            while let Some(joined) = in_flight.try_join_next() {
                self.on_task_finished(joined);
            }

            if cancel.is_cancelled() {
                break;
            }

            if self.subscription.take_pending() {
                self.delay.next_delay(true);
            } else if !wait.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = self.subscription.notified() => {
                        self.subscription.take_pending();
                        self.delay.next_delay(true);
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
            }

            if cancel.is_cancelled() {
                break;
            }

            let messages = self.poll().await;
            let found = !messages.is_empty();

            for message in messages {
                let processor = Arc::clone(&self.processor);
                let token = cancel.child_token();
                in_flight.spawn(async move { processor.process(message, token).await });
            }

            while in_flight.len() > self.settings.new_batch_threshold {
                match in_flight.join_next().await {
                    Some(joined) => self.on_task_finished(joined),
                    None => break,
                }
            }

            wait = self.delay.next_delay(found);
        }

        tracing::info!(
            queue = %self.queue.name(),
            in_flight = in_flight.len(),
            "queue listener stopping; draining in-flight messages"
        );
        while let Some(joined) = in_flight.join_next().await {
            self.on_task_finished(joined);
        }
        tracing::info!(queue = %self.queue.name(), "queue listener stopped");
    }

    async fn poll(&self) -> Vec<QueueMessage> {
        let result = self
            .queue
            .dequeue_batch(self.settings.visibility_timeout, self.settings.batch_size)
            .await;

        match result {
            Ok(messages) => {
                self.stats.record_poll(messages.len());
                if !messages.is_empty() {
                    tracing::debug!(queue = %self.queue.name(), count = messages.len(), "dequeued batch");
                }
                messages
            }
            Err(QueueError::QueueNotFound(_)) => {
                self.stats.record_poll(0);
                tracing::trace!(queue = %self.queue.name(), "queue does not exist yet");
                Vec::new()
            }
            Err(err) => {
                self.stats.record_poll(0);
                self.stats.record_backend_error();
                self.dispatcher
                    .report(&HostError::queue(self.queue.name(), QueueOperation::Dequeue, err));
                Vec::new()
            }
        }
    }

    fn on_task_finished(&self, joined: Result<(), JoinError>) {
        let Err(err) = joined else {
            return;
        };
        if err.is_panic() {
            self.stats.record_backend_error();
            self.dispatcher.report(&HostError::ProcessingPanicked {
                queue: self.queue.name().to_string(),
                reason: panic_reason(err.into_panic()),
            });
        }
    }
}

pub(crate) fn panic_reason(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
