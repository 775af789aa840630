//! MessageLeaseRenewer - 実行中メッセージの可視性タイムアウトを延長し続ける
//!
//! # 学習ポイント
//! - renewal タスクが「メッセージを所有」し、最新の pop receipt を持つ
//! - `stop()` は cancel → join。join を待つので、終端処理（delete / poison）より後に
//!   renewal が走ることはない
//! - 古い receipt（MessageNotFound）は「もう自分の担当ではない」だけでエラーではない

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::domain::QueueMessage;
use crate::error::{HostError, QueueOperation};
use crate::listener::stats::ListenerStats;
use crate::ports::{BackgroundExceptionDispatcher, StorageQueue};

/// Shortest normal renewal interval.
pub const MIN_RENEWAL_INTERVAL: Duration = Duration::from_millis(500);

/// Retries after a failed renewal never come faster than this.
const MIN_RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    /// Our receipt was still valid at the last renewal.
    Held,
    /// The backend no longer recognizes our receipt.
    Lost,
}

/// What the renewer hands back when it stops.
#[derive(Debug, Clone)]
pub struct RenewedLease {
    /// Carries the latest pop receipt.
    pub message: QueueMessage,
    pub status: LeaseStatus,
}

/// Interval between successful renewals.
pub fn renewal_interval(visibility_timeout: Duration) -> Duration {
    (visibility_timeout / 2).max(MIN_RENEWAL_INTERVAL)
}

/// Interval after `failures` consecutive failed renewals: linear speed-up,
/// bounded below by `min(normal, 1s)`.
pub fn retry_interval(normal: Duration, failures: u32) -> Duration {
    let floor = normal.min(MIN_RETRY_INTERVAL);
    (normal / failures.saturating_add(1)).max(floor)
}

/// Renewal task for one message.
///
/// Dropping the renewer without calling `stop` still cancels the task.
pub struct MessageLeaseRenewer {
    guard: DropGuard,
    handle: JoinHandle<RenewedLease>,
    fallback: QueueMessage,
}

impl MessageLeaseRenewer {
    pub fn start(
        queue: Arc<dyn StorageQueue>,
        message: QueueMessage,
        visibility_timeout: Duration,
        dispatcher: Arc<dyn BackgroundExceptionDispatcher>,
        stats: Arc<ListenerStats>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let fallback = message.clone();
        let handle = tokio::spawn(renew_loop(
            queue,
            message,
            visibility_timeout,
            dispatcher,
            stats,
            cancel.clone(),
        ));
        Self {
            guard: cancel.drop_guard(),
            handle,
            fallback,
        }
    }

    /// Stop renewing and wait for the renewal task to finish.
    pub async fn stop(self) -> RenewedLease {
        let Self {
            guard,
            handle,
            fallback,
        } = self;
        drop(guard);

        match handle.await {
            Ok(lease) => lease,
            Err(err) => {
                // receipt が古い可能性はあるが、終端処理側が MessageNotFound として扱う
                tracing::error!(message_id = %fallback.id, error = %err, "lease renewal task failed");
                RenewedLease {
                    message: fallback,
                    status: LeaseStatus::Held,
                }
            }
        }
    }
}

async fn renew_loop(
    queue: Arc<dyn StorageQueue>,
    mut message: QueueMessage,
    visibility_timeout: Duration,
    dispatcher: Arc<dyn BackgroundExceptionDispatcher>,
    stats: Arc<ListenerStats>,
    cancel: CancellationToken,
) -> RenewedLease {
    let normal = renewal_interval(visibility_timeout);
    let mut failures: u32 = 0;

    loop {
        let wait = if failures == 0 {
            normal
        } else {
            retry_interval(normal, failures)
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return RenewedLease { message, status: LeaseStatus::Held };
            }
            _ = tokio::time::sleep(wait) => {}
        }

        match queue.update_visibility(&message, visibility_timeout).await {
            Ok(update) => {
                message.apply_visibility(update);
                failures = 0;
                stats.record_lease_renewal();
                tracing::debug!(
                    queue = %queue.name(),
                    message_id = %message.id,
                    "lease renewed"
                );
            }
            Err(err) if err.is_lease_lost() => {
                tracing::debug!(
                    queue = %queue.name(),
                    message_id = %message.id,
                    "lease lost; stopping renewal"
                );
                stats.record_lease_lost();
                return RenewedLease {
                    message,
                    status: LeaseStatus::Lost,
                };
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                dispatcher.report(&HostError::queue(queue.name(), QueueOperation::RenewLease, err));
            }
        }
    }
}
