//! InMemoryQueueClient - 開発・テスト用のキュー backend
//!
//! # 学習ポイント
//! - dequeue + lease を 1 つの Mutex の中で完結させる（これが唯一の排他）
//! - 可視性・TTL は `tokio::time::Instant` で管理する
//!   （`start_paused` のテストで時間を進められる）
//! - ロックを保持したまま await しない（DashMap の guard は即 drop）

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::domain::{MessageId, PopReceipt, QueueMessage};
use crate::ports::{
    Clock, IdGenerator, QueueClient, QueueError, StorageQueue, SystemClock, UlidGenerator,
    VisibilityUpdate,
};

pub const MIN_QUEUE_NAME_LENGTH: usize = 3;
pub const MAX_QUEUE_NAME_LENGTH: usize = 63;

/// Messages not deleted within this window disappear on their own.
pub const DEFAULT_MESSAGE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Storage-queue naming rules: 3-63 characters, lowercase ASCII letters,
/// digits and single hyphens, starting and ending with a letter or digit.
pub fn is_valid_queue_name(name: &str) -> bool {
    if name.len() < MIN_QUEUE_NAME_LENGTH || name.len() > MAX_QUEUE_NAME_LENGTH {
        return false;
    }
    if name.starts_with('-') || name.ends_with('-') || name.contains("--") {
        return false;
    }
    name.bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// Backend-side record of one message.
#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    body: Vec<u8>,
    dequeue_count: u32,
    pop_receipt: Option<PopReceipt>,
    insertion_time: DateTime<Utc>,
    expiration_time: DateTime<Utc>,
    visible_at: Instant,
    expires_at: Instant,
}

impl StoredMessage {
    /// Is `receipt` the live lease on this message?
    fn is_leased_by(&self, receipt: Option<&PopReceipt>, now: Instant) -> bool {
        receipt.is_some() && self.pop_receipt.as_ref() == receipt && self.visible_at > now
    }

    fn snapshot(&self, now: Instant, now_utc: DateTime<Utc>) -> QueueMessage {
        QueueMessage {
            id: self.id.clone(),
            body: self.body.clone(),
            dequeue_count: self.dequeue_count,
            pop_receipt: self.pop_receipt.clone(),
            insertion_time: self.insertion_time,
            next_visible_time: Some(add_std(now_utc, self.visible_at.saturating_duration_since(now))),
            expiration_time: Some(self.expiration_time),
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
}

impl QueueState {
    fn purge_expired(&mut self, now: Instant) {
        self.messages.retain(|m| m.expires_at > now);
    }

    fn find_mut(&mut self, id: &MessageId) -> Option<&mut StoredMessage> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }
}

struct Shared {
    queues: DashMap<String, Arc<Mutex<QueueState>>>,
    clock: Arc<dyn Clock>,
    ids: Box<dyn IdGenerator>,
    message_ttl: Duration,
}

/// In-memory queue service. Cheap to clone; clones share the same queues.
#[derive(Clone)]
pub struct InMemoryQueueClient {
    shared: Arc<Shared>,
}

impl InMemoryQueueClient {
    pub fn new() -> Self {
        Self::with_options(Arc::new(SystemClock), DEFAULT_MESSAGE_TTL)
    }

    /// `clock` stamps insertion/visibility times; `message_ttl` bounds how
    /// long an undeleted message lives.
    pub fn with_options(clock: Arc<dyn Clock>, message_ttl: Duration) -> Self {
        let ids = UlidGenerator::new(Arc::clone(&clock));
        Self {
            shared: Arc::new(Shared {
                queues: DashMap::new(),
                clock,
                ids: Box::new(ids),
                message_ttl,
            }),
        }
    }

    /// Every unexpired message in `name`, visible or not. For inspection only;
    /// does not touch leases.
    pub async fn peek_all(&self, name: &str) -> Vec<QueueMessage> {
        let Some(state) = self.shared.state(name) else {
            return Vec::new();
        };
        let now = Instant::now();
        let now_utc = self.shared.clock.now();
        let mut state = state.lock().await;
        state.purge_expired(now);
        state
            .messages
            .iter()
            .map(|m| m.snapshot(now, now_utc))
            .collect()
    }

    /// Unexpired messages in `name`, including invisible ones.
    pub async fn message_count(&self, name: &str) -> usize {
        self.peek_all(name).await.len()
    }
}

impl Default for InMemoryQueueClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Shared {
    fn state(&self, name: &str) -> Option<Arc<Mutex<QueueState>>> {
        self.queues.get(name).map(|entry| Arc::clone(entry.value()))
    }
}

impl QueueClient for InMemoryQueueClient {
    fn queue(&self, name: &str) -> Arc<dyn StorageQueue> {
        Arc::new(InMemoryQueue {
            name: name.to_string(),
            shared: Arc::clone(&self.shared),
        })
    }

    fn is_valid_queue_name(&self, name: &str) -> bool {
        is_valid_queue_name(name)
    }
}

/// Handle to one queue of an `InMemoryQueueClient`.
pub struct InMemoryQueue {
    name: String,
    shared: Arc<Shared>,
}

impl InMemoryQueue {
    fn state(&self) -> Result<Arc<Mutex<QueueState>>, QueueError> {
        self.shared
            .state(&self.name)
            .ok_or_else(|| QueueError::QueueNotFound(self.name.clone()))
    }
}

#[async_trait]
impl StorageQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> Result<bool, QueueError> {
        Ok(self.shared.queues.contains_key(&self.name))
    }

    async fn create_if_not_exists(&self) -> Result<bool, QueueError> {
        if !is_valid_queue_name(&self.name) {
            return Err(QueueError::InvalidQueueName(self.name.clone()));
        }
        match self.shared.queues.entry(self.name.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::new(Mutex::new(QueueState::default())));
                Ok(true)
            }
        }
    }

    async fn enqueue(&self, body: Vec<u8>) -> Result<QueueMessage, QueueError> {
        let state = self.state()?;
        let now = Instant::now();
        let now_utc = self.shared.clock.now();

        let stored = StoredMessage {
            id: self.shared.ids.generate_message_id(),
            body,
            dequeue_count: 0,
            pop_receipt: None,
            insertion_time: now_utc,
            expiration_time: add_std(now_utc, self.shared.message_ttl),
            visible_at: now,
            expires_at: now + self.shared.message_ttl,
        };
        let snapshot = stored.snapshot(now, now_utc);

        state.lock().await.messages.push_back(stored);
        Ok(snapshot)
    }

    async fn dequeue_batch(
        &self,
        visibility_timeout: Duration,
        max_count: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let state = self.state()?;
        let now = Instant::now();
        let now_utc = self.shared.clock.now();

        let mut state = state.lock().await;
        state.purge_expired(now);

        let mut batch = Vec::new();
        for stored in state.messages.iter_mut() {
            if batch.len() >= max_count {
                break;
            }
            if stored.visible_at > now {
                continue;
            }
            stored.dequeue_count += 1;
            stored.pop_receipt = Some(self.shared.ids.generate_pop_receipt());
            stored.visible_at = now + visibility_timeout;
            batch.push(stored.snapshot(now, now_utc));
        }
        Ok(batch)
    }

    async fn update_visibility(
        &self,
        message: &QueueMessage,
        visibility_timeout: Duration,
    ) -> Result<VisibilityUpdate, QueueError> {
        let state = self.state()?;
        let now = Instant::now();
        let now_utc = self.shared.clock.now();

        let mut state = state.lock().await;
        let stored = state
            .find_mut(&message.id)
            .filter(|m| m.is_leased_by(message.pop_receipt.as_ref(), now))
            .ok_or_else(|| QueueError::MessageNotFound(message.id.clone()))?;

        let pop_receipt = self.shared.ids.generate_pop_receipt();
        stored.pop_receipt = Some(pop_receipt.clone());
        stored.visible_at = now + visibility_timeout;

        Ok(VisibilityUpdate {
            pop_receipt,
            next_visible_time: add_std(now_utc, visibility_timeout),
        })
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let state = self.state()?;
        let now = Instant::now();

        let mut state = state.lock().await;
        let position = state
            .messages
            .iter()
            .position(|m| m.id == message.id && m.is_leased_by(message.pop_receipt.as_ref(), now))
            .ok_or_else(|| QueueError::MessageNotFound(message.id.clone()))?;
        state.messages.remove(position);
        Ok(())
    }
}

fn add_std(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|d| at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
