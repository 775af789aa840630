//! Function runtime - ユーザー関数の登録と実行
//!
//! # 学習ポイント
//! - Object-safe trait (`QueueFunction`) を `Arc<dyn ...>` で保持
//! - クロージャは `FnQueueFunction` で trait object に変換
//! - 関数は自分の task で動かす。panic は JoinError として受け取り、失敗扱いにする

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::domain::{FunctionInvocationError, FunctionResult, QueueMessage};
use crate::listener::queue_listener::panic_reason;
use crate::ports::{IdGenerator, QueueTrigger, TriggeredFunctionExecutor};

/// Error type user functions return.
pub type FunctionError = Box<dyn std::error::Error + Send + Sync>;

/// A function triggered by queue messages.
///
/// # 使用例
/// ```ignore
/// struct ProcessOrder;
///
/// #[async_trait]
/// impl QueueFunction for ProcessOrder {
///     async fn run(&self, message: &QueueMessage, _cancel: CancellationToken) -> Result<(), FunctionError> {
///         let order: Order = serde_json::from_slice(&message.body)?;
///         println!("order {}", order.id);
///         Ok(())
///     }
/// }
/// ```
///
/// Returning `Err` leaves the message for redelivery. The message reaches the
/// poison queue after `max_dequeue_count` failed deliveries.
#[async_trait]
pub trait QueueFunction: Send + Sync {
    async fn run(&self, message: &QueueMessage, cancel: CancellationToken) -> Result<(), FunctionError>;
}

/// Adapts an async closure to [`QueueFunction`].
pub struct FnQueueFunction<F>(F);

impl<F> FnQueueFunction<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> QueueFunction for FnQueueFunction<F>
where
    F: Fn(QueueMessage, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), FunctionError>> + Send,
{
    async fn run(&self, message: &QueueMessage, cancel: CancellationToken) -> Result<(), FunctionError> {
        (self.0)(message.clone(), cancel).await
    }
}

/// RegistryError は FunctionRegistry の操作エラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("function '{0}' is already registered")]
    AlreadyRegistered(String),
}

#[derive(Clone)]
pub struct RegisteredFunction {
    pub name: String,
    pub queue_name: String,
    pub function: Arc<dyn QueueFunction>,
}

/// Registry of functions (name -> function + trigger queue).
///
/// Built during initialization, read-only afterwards.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: BTreeMap<String, RegisteredFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: &str,
        queue_name: &str,
        function: Arc<dyn QueueFunction>,
    ) -> Result<(), RegistryError> {
        if self.functions.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }
        self.functions.insert(
            name.to_string(),
            RegisteredFunction {
                name: name.to_string(),
                queue_name: queue_name.to_string(),
                function,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredFunction> {
        self.functions.get(name)
    }

    /// In name order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredFunction> {
        self.functions.values()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

/// Runs one registered function for each trigger.
pub struct FunctionExecutor {
    function_name: String,
    function: Arc<dyn QueueFunction>,
    ids: Arc<dyn IdGenerator>,
}

impl FunctionExecutor {
    pub fn new(registered: &RegisteredFunction, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            function_name: registered.name.clone(),
            function: Arc::clone(&registered.function),
            ids,
        }
    }
}

#[async_trait]
impl TriggeredFunctionExecutor for FunctionExecutor {
    async fn execute(&self, trigger: QueueTrigger, cancel: CancellationToken) -> FunctionResult {
        let instance_id = self.ids.generate_instance_id();
        let span = tracing::info_span!(
            "function",
            function = %self.function_name,
            %instance_id,
            queue = %trigger.queue_name,
            message_id = %trigger.message.id,
            dequeue_count = trigger.message.dequeue_count,
        );

        let function = Arc::clone(&self.function);
        let message = trigger.message;
        let joined = tokio::spawn(
            async move {
                tracing::debug!("executing");
                function.run(&message, cancel).await.map_err(|e| e.to_string())
            }
            .instrument(span.clone()),
        )
        .await;

        let error_message = match joined {
            Ok(Ok(())) => {
                span.in_scope(|| tracing::debug!("succeeded"));
                return FunctionResult::success(instance_id);
            }
            Ok(Err(message)) => message,
            Err(err) if err.is_panic() => format!("panicked: {}", panic_reason(err.into_panic())),
            Err(err) => err.to_string(),
        };

        let error = FunctionInvocationError {
            instance_id,
            function_name: self.function_name.clone(),
            message: error_message,
        };
        span.in_scope(|| tracing::warn!(error = %error.message, "function failed"));
        FunctionResult::failure(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageId, PopReceipt};
    use crate::ports::{SystemClock, UlidGenerator};

    fn trigger(body: &str) -> QueueTrigger {
        QueueTrigger {
            queue_name: "orders".to_string(),
            message: QueueMessage {
                id: MessageId::new("m-1"),
                body: body.as_bytes().to_vec(),
                dequeue_count: 1,
                pop_receipt: Some(PopReceipt::new("r-1")),
                insertion_time: chrono::Utc::now(),
                next_visible_time: None,
                expiration_time: None,
            },
        }
    }

    fn executor(name: &str, function: Arc<dyn QueueFunction>) -> FunctionExecutor {
        let mut registry = FunctionRegistry::new();
        registry.register(name, "orders", function).unwrap();
        FunctionExecutor::new(
            registry.get(name).unwrap(),
            Arc::new(UlidGenerator::new(SystemClock)),
        )
    }

    struct Echo;

    #[async_trait]
    impl QueueFunction for Echo {
        async fn run(&self, message: &QueueMessage, _cancel: CancellationToken) -> Result<(), FunctionError> {
            match message.as_text() {
                Some("bad") => Err("bad input".into()),
                Some(_) => Ok(()),
                None => Err("not text".into()),
            }
        }
    }

    #[test]
    fn duplicate_function_name_is_rejected() {
        let mut registry = FunctionRegistry::new();
        registry.register("Echo", "orders", Arc::new(Echo)).unwrap();
        let err = registry.register("Echo", "invoices", Arc::new(Echo)).unwrap_err();

        assert!(matches!(err, RegistryError::AlreadyRegistered(name) if name == "Echo"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("Echo").unwrap().queue_name, "orders");
    }

    #[test]
    fn iter_is_in_name_order() {
        let mut registry = FunctionRegistry::new();
        registry.register("b", "q-b", Arc::new(Echo)).unwrap();
        registry.register("a", "q-a", Arc::new(Echo)).unwrap();

        let names: Vec<_> = registry.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn success_and_error_map_to_result() {
        let exec = executor("Echo", Arc::new(Echo));

        let ok = exec.execute(trigger("hello"), CancellationToken::new()).await;
        assert!(ok.succeeded);
        assert!(ok.error.is_none());

        let failed = exec.execute(trigger("bad"), CancellationToken::new()).await;
        assert!(!failed.succeeded);
        let error = failed.error.unwrap();
        assert_eq!(error.function_name, "Echo");
        assert_eq!(error.message, "bad input");
        assert_eq!(error.instance_id, failed.instance_id);
        assert_ne!(failed.instance_id, ok.instance_id);
    }

    #[tokio::test]
    async fn panic_becomes_failure() {
        let exec = executor(
            "Explode",
            Arc::new(FnQueueFunction::new(
                |msg: QueueMessage, _cancel: CancellationToken| async move {
                    if !msg.body.is_empty() {
                        panic!("kaboom");
                    }
                    Ok::<(), FunctionError>(())
                },
            )),
        );

        let result = exec.execute(trigger("x"), CancellationToken::new()).await;

        assert!(!result.succeeded);
        let message = result.error.unwrap().message;
        assert!(message.contains("panicked"));
        assert!(message.contains("kaboom"));
    }

    #[tokio::test]
    async fn closure_sees_cancellation() {
        let exec = executor(
            "Cancellable",
            Arc::new(FnQueueFunction::new(|_msg: QueueMessage, cancel: CancellationToken| async move {
                if cancel.is_cancelled() {
                    Err::<(), FunctionError>("cancelled".into())
                } else {
                    Ok(())
                }
            })),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = exec.execute(trigger("x"), cancel).await;
        assert_eq!(result.error.unwrap().message, "cancelled");
    }
}
