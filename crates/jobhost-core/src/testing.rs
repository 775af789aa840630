//! Test doubles shared across modules.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::domain::{FunctionInstanceId, FunctionInvocationError, FunctionResult, QueueMessage};
use crate::error::HostError;
use crate::ports::{
    BackgroundExceptionDispatcher, QueueError, QueueTrigger, StorageQueue,
    TriggeredFunctionExecutor, VisibilityUpdate,
};

/// Keeps the display text of every reported error.
#[derive(Default)]
pub struct RecordingDispatcher {
    errors: Mutex<Vec<String>>,
}

impl RecordingDispatcher {
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

impl BackgroundExceptionDispatcher for RecordingDispatcher {
    fn report(&self, error: &HostError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// Executor whose outcome is decided by call number.
pub struct ScriptedExecutor {
    failures_before_success: Option<usize>,
    run_time: Duration,
    panics: bool,
    calls: AtomicUsize,
    seen: Mutex<Vec<QueueMessage>>,
}

impl ScriptedExecutor {
    fn new(failures_before_success: Option<usize>) -> Self {
        Self {
            failures_before_success,
            run_time: Duration::ZERO,
            panics: false,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn always_succeed() -> Self {
        Self::new(Some(0))
    }

    pub fn always_fail() -> Self {
        Self::new(None)
    }

    pub fn fail_first(n: usize) -> Self {
        Self::new(Some(n))
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::new(None)
        }
    }

    /// Each call sleeps this long before answering.
    pub fn taking(mut self, run_time: Duration) -> Self {
        self.run_time = run_time;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<QueueMessage> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TriggeredFunctionExecutor for ScriptedExecutor {
    async fn execute(&self, trigger: QueueTrigger, _cancel: CancellationToken) -> FunctionResult {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(trigger.message.clone());

        if !self.run_time.is_zero() {
            tokio::time::sleep(self.run_time).await;
        }
        if self.panics {
            panic!("scripted panic");
        }

        let instance_id = FunctionInstanceId::from_ulid(Ulid::new());
        let succeed = self.failures_before_success.is_some_and(|n| call >= n);
        if succeed {
            FunctionResult::success(instance_id)
        } else {
            FunctionResult::failure(FunctionInvocationError {
                instance_id,
                function_name: "scripted".to_string(),
                message: format!("scripted failure #{}", call + 1),
            })
        }
    }
}

/// Wraps a queue and fails selected operations with `Unavailable`.
pub struct FlakyQueue {
    inner: Arc<dyn StorageQueue>,
    dequeues: AtomicU32,
    renewals: AtomicU32,
    deletes: AtomicU32,
}

impl FlakyQueue {
    pub fn new(inner: Arc<dyn StorageQueue>) -> Self {
        Self {
            inner,
            dequeues: AtomicU32::new(0),
            renewals: AtomicU32::new(0),
            deletes: AtomicU32::new(0),
        }
    }

    pub fn fail_next_dequeues(&self, n: u32) {
        self.dequeues.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_renewals(&self, n: u32) {
        self.renewals.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_deletes(&self, n: u32) {
        self.deletes.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicU32) -> Result<(), QueueError> {
        let failed = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(QueueError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageQueue for FlakyQueue {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn exists(&self) -> Result<bool, QueueError> {
        self.inner.exists().await
    }

    async fn create_if_not_exists(&self) -> Result<bool, QueueError> {
        self.inner.create_if_not_exists().await
    }

    async fn enqueue(&self, body: Vec<u8>) -> Result<QueueMessage, QueueError> {
        self.inner.enqueue(body).await
    }

    async fn dequeue_batch(
        &self,
        visibility_timeout: Duration,
        max_count: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        Self::take(&self.dequeues)?;
        self.inner.dequeue_batch(visibility_timeout, max_count).await
    }

    async fn update_visibility(
        &self,
        message: &QueueMessage,
        visibility_timeout: Duration,
    ) -> Result<VisibilityUpdate, QueueError> {
        Self::take(&self.renewals)?;
        self.inner.update_visibility(message, visibility_timeout).await
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        Self::take(&self.deletes)?;
        self.inner.delete(message).await
    }
}
