//! JobHostBuilder - host の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）：設定・キュー名・関数名の重複は build() までに弾く
//! - 開発体験の改善（どの関数のどの設定が悪いかをエラーに含める）

use std::future::Future;
use std::sync::Arc;

use crate::app::host::{HostedFunction, JobHost};
use crate::app::runtime::{
    FnQueueFunction, FunctionError, FunctionExecutor, FunctionRegistry, QueueFunction,
    RegistryError,
};
use crate::config::HostConfig;
use crate::domain::QueueMessage;
use crate::error::HostError;
use crate::impls::{InMemoryQueueClient, TracingExceptionDispatcher};
use crate::listener::{QueueListenerFactory, SharedContextProvider};
use crate::ports::{BackgroundExceptionDispatcher, QueueClient, SystemClock, UlidGenerator};

use tokio_util::sync::CancellationToken;

/// JobHostBuilder は JobHost を構築
///
/// # 使用例
/// ```ignore
/// let host = JobHostBuilder::new()
///     .config(load_config("jobhost.toml")?)
///     .queue_client(Arc::new(client))
///     .register("ProcessOrder", "orders", ProcessOrder)?
///     .build()?;
/// let running = host.start();
/// ```
///
/// # デフォルト
/// - queue client: `InMemoryQueueClient`
/// - exception dispatcher: `TracingExceptionDispatcher`
/// - shared context: builder ごとに新規
pub struct JobHostBuilder {
    registry: FunctionRegistry,
    config: HostConfig,
    client: Option<Arc<dyn QueueClient>>,
    dispatcher: Option<Arc<dyn BackgroundExceptionDispatcher>>,
    shared_context: Option<Arc<SharedContextProvider>>,
}

/// BuildError は host 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no functions registered")]
    NoFunctions,

    #[error(transparent)]
    InvalidConfig(HostError),

    #[error("function '{function}' cannot listen on queue '{queue}': {source}")]
    Listener {
        function: String,
        queue: String,
        #[source]
        source: HostError,
    },
}

impl JobHostBuilder {
    pub fn new() -> Self {
        Self {
            registry: FunctionRegistry::new(),
            config: HostConfig::default(),
            client: None,
            dispatcher: None,
            shared_context: None,
        }
    }

    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn queue_client(mut self, client: Arc<dyn QueueClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn exception_dispatcher(mut self, dispatcher: Arc<dyn BackgroundExceptionDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Share watcher state with code outside the host (e.g. a `QueueOutput`
    /// built before the host).
    pub fn shared_context(mut self, shared_context: Arc<SharedContextProvider>) -> Self {
        self.shared_context = Some(shared_context);
        self
    }

    /// Register `function` under `name`, triggered by `queue_name`.
    pub fn register<F: QueueFunction + 'static>(
        mut self,
        name: &str,
        queue_name: &str,
        function: F,
    ) -> Result<Self, RegistryError> {
        self.registry.register(name, queue_name, Arc::new(function))?;
        Ok(self)
    }

    /// Register an async closure.
    pub fn register_fn<F, Fut>(self, name: &str, queue_name: &str, f: F) -> Result<Self, RegistryError>
    where
        F: Fn(QueueMessage, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), FunctionError>> + Send + 'static,
    {
        self.register(name, queue_name, FnQueueFunction::new(f))
    }

    /// # 検証
    /// - 関数が 1 つ以上登録されているか
    /// - 設定値が範囲内か
    /// - 各関数のキュー名が backend のルールを満たすか
    pub fn build(self) -> Result<JobHost, BuildError> {
        if self.registry.is_empty() {
            return Err(BuildError::NoFunctions);
        }
        self.config.validate().map_err(BuildError::InvalidConfig)?;

        let client = self
            .client
            .unwrap_or_else(|| Arc::new(InMemoryQueueClient::new()) as Arc<dyn QueueClient>);
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(TracingExceptionDispatcher::new()) as Arc<dyn BackgroundExceptionDispatcher>);
        let shared_context = self
            .shared_context
            .unwrap_or_else(|| Arc::new(SharedContextProvider::new()));
        let ids = Arc::new(UlidGenerator::new(SystemClock));

        let mut functions = Vec::with_capacity(self.registry.len());
        for registered in self.registry.iter() {
            let executor = Arc::new(FunctionExecutor::new(registered, ids.clone()));
            let factory = QueueListenerFactory::new(
                client.as_ref(),
                &registered.queue_name,
                self.config.queues.clone(),
                Arc::clone(&dispatcher),
                Arc::clone(&shared_context),
                executor,
            )
            .map_err(|source| BuildError::Listener {
                function: registered.name.clone(),
                queue: registered.queue_name.clone(),
                source,
            })?;
            functions.push(HostedFunction {
                name: registered.name.clone(),
                factory,
            });
        }

        Ok(JobHost::new(client, shared_context, functions))
    }
}

impl Default for JobHostBuilder {
    fn default() -> Self {
        Self::new()
    }
}
