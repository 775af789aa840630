//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::{FunctionInstanceId, MessageId, PopReceipt};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は分散環境で衝突しない ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数タスクから使える）
pub trait IdGenerator: Send + Sync {
    fn generate_message_id(&self) -> MessageId;

    fn generate_pop_receipt(&self) -> PopReceipt;

    fn generate_instance_id(&self) -> FunctionInstanceId;
}

/// UlidGenerator は Clock の時刻を timestamp 部分に使う ULID 生成器
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_message_id(&self) -> MessageId {
        MessageId::new(self.next_ulid().to_string().to_lowercase())
    }

    fn generate_pop_receipt(&self) -> PopReceipt {
        PopReceipt::new(self.next_ulid().to_string())
    }

    fn generate_instance_id(&self) -> FunctionInstanceId {
        FunctionInstanceId::from_ulid(self.next_ulid())
    }
}
