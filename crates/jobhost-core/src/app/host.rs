//! JobHost - listener 群の起動と停止
//!
//! 関数 1 つにつき listener 1 つ。全 listener は 1 つの CancellationToken を共有し、
//! `stop_and_join()` で in-flight の実行が終わるまで待つ。

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::output::QueueOutput;
use crate::error::HostError;
use crate::listener::{ListenerStats, ListenerStatsSnapshot, QueueListenerFactory, SharedContextProvider, SharedQueueWatcher};
use crate::ports::QueueClient;

pub(crate) struct HostedFunction {
    pub(crate) name: String,
    pub(crate) factory: QueueListenerFactory,
}

/// A built, not yet started host.
pub struct JobHost {
    client: Arc<dyn QueueClient>,
    shared_context: Arc<SharedContextProvider>,
    functions: Vec<HostedFunction>,
}

impl JobHost {
    pub(crate) fn new(
        client: Arc<dyn QueueClient>,
        shared_context: Arc<SharedContextProvider>,
        functions: Vec<HostedFunction>,
    ) -> Self {
        Self {
            client,
            shared_context,
            functions,
        }
    }

    pub fn function_names(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.name.as_str()).collect()
    }

    /// Writer for `queue_name` that wakes this host's listeners.
    pub fn queue_output(&self, queue_name: &str) -> Result<QueueOutput, HostError> {
        queue_output(self.client.as_ref(), &self.shared_context, queue_name)
    }

    /// Spawn one listener per function.
    pub fn start(self) -> RunningHost {
        let cancel = CancellationToken::new();
        let listeners = self
            .functions
            .iter()
            .map(|function| {
                let listener = function.factory.create();
                tracing::info!(
                    function = %function.name,
                    queue = %listener.queue_name(),
                    "starting listener"
                );
                RunningListener {
                    function: function.name.clone(),
                    stats: listener.stats(),
                    handle: listener.spawn(cancel.child_token()),
                }
            })
            .collect();

        RunningHost {
            cancel,
            listeners,
            client: self.client,
            shared_context: self.shared_context,
        }
    }
}

struct RunningListener {
    function: String,
    stats: Arc<ListenerStats>,
    handle: JoinHandle<()>,
}

pub struct RunningHost {
    cancel: CancellationToken,
    listeners: Vec<RunningListener>,
    client: Arc<dyn QueueClient>,
    shared_context: Arc<SharedContextProvider>,
}

impl RunningHost {
    /// Per-function counters.
    pub fn stats(&self) -> BTreeMap<String, ListenerStatsSnapshot> {
        self.listeners
            .iter()
            .map(|l| (l.function.clone(), l.stats.snapshot()))
            .collect()
    }

    pub fn queue_output(&self, queue_name: &str) -> Result<QueueOutput, HostError> {
        queue_output(self.client.as_ref(), &self.shared_context, queue_name)
    }

    /// Cancelling this token stops the host like `stop_and_join` does.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop polling, wait for in-flight executions, return final counters.
    pub async fn stop_and_join(self) -> BTreeMap<String, ListenerStatsSnapshot> {
        self.cancel.cancel();

        let mut stats = BTreeMap::new();
        for listener in self.listeners {
            if let Err(err) = listener.handle.await {
                tracing::error!(function = %listener.function, error = %err, "listener task failed");
            }
            stats.insert(listener.function, listener.stats.snapshot());
        }
        tracing::info!("host stopped");
        stats
    }
}

fn queue_output(
    client: &dyn QueueClient,
    shared_context: &SharedContextProvider,
    queue_name: &str,
) -> Result<QueueOutput, HostError> {
    if !client.is_valid_queue_name(queue_name) {
        return Err(HostError::InvalidQueueName(queue_name.to_string()));
    }
    let watcher = shared_context.get_or_create(SharedQueueWatcher::new);
    Ok(QueueOutput::new(client.queue(queue_name), watcher))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::builder::JobHostBuilder;
    use crate::app::runtime::FunctionError;
    use crate::config::{HostConfig, QueuesConfig};
    use crate::domain::QueueMessage;
    use crate::impls::InMemoryQueueClient;
    use crate::testing::RecordingDispatcher;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config() -> HostConfig {
        HostConfig {
            queues: QueuesConfig {
                max_polling_interval_ms: 60_000,
                visibility_timeout_ms: 2_000,
                ..QueuesConfig::default()
            },
            ..HostConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn output_binding_wakes_a_chained_listener() {
        let client = Arc::new(InMemoryQueueClient::new());
        let shared = Arc::new(SharedContextProvider::new());
        let invoices = queue_output(client.as_ref(), &shared, "invoices").unwrap();
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&handled);

        let host = JobHostBuilder::new()
            .config(config())
            .queue_client(client.clone())
            .shared_context(shared)
            .register_fn("Forward", "orders", move |msg: QueueMessage, _cancel| {
                let invoices = invoices.clone();
                async move {
                    invoices.add(msg.body).await?;
                    Ok::<(), FunctionError>(())
                }
            })
            .unwrap()
            .register_fn("Bill", "invoices", move |_msg: QueueMessage, _cancel| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), FunctionError>(())
                }
            })
            .unwrap()
            .build()
            .unwrap();
        let running = host.start();

        // どちらの listener も backoff 上限まで伸びる
        tokio::time::sleep(Duration::from_secs(600)).await;

        running.queue_output("orders").unwrap().add("order-1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(handled.load(Ordering::SeqCst), 1);
        assert_eq!(client.message_count("orders").await, 0);
        assert_eq!(client.message_count("invoices").await, 0);

        let stats = running.stop_and_join().await;
        assert_eq!(stats["Forward"].succeeded, 1);
        assert_eq!(stats["Bill"].succeeded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_execution() {
        let client = Arc::new(InMemoryQueueClient::new());
        let finished = Arc::new(AtomicUsize::new(0));
        let done = Arc::clone(&finished);

        let host = JobHostBuilder::new()
            .config(config())
            .queue_client(client.clone())
            .exception_dispatcher(Arc::new(RecordingDispatcher::default()))
            .register_fn("Slow", "orders", move |_msg: QueueMessage, _cancel| {
                let done = Arc::clone(&done);
                async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), FunctionError>(())
                }
            })
            .unwrap()
            .build()
            .unwrap();
        host.queue_output("orders").unwrap().add("work").await.unwrap();
        let running = host.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let stats = running.stop_and_join().await;

        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(stats["Slow"].succeeded, 1);
        assert_eq!(client.message_count("orders").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_function_ends_in_poison_queue() {
        let client = Arc::new(InMemoryQueueClient::new());
        let host = JobHostBuilder::new()
            .config(config())
            .queue_client(client.clone())
            .register_fn("Broken", "orders", |_msg: QueueMessage, _cancel| async {
                Err::<(), FunctionError>("always broken".into())
            })
            .unwrap()
            .build()
            .unwrap();
        host.queue_output("orders").unwrap().add("hello").await.unwrap();
        let running = host.start();

        tokio::time::sleep(Duration::from_secs(120)).await;
        let stats = running.stop_and_join().await;

        assert_eq!(stats["Broken"].failed, 5);
        assert_eq!(stats["Broken"].poisoned, 1);
        assert_eq!(client.message_count("orders").await, 0);
        let poisoned = client.peek_all("orders-poison").await;
        assert_eq!(poisoned.len(), 1);
        assert_eq!(poisoned[0].body, b"hello");
    }

    #[test]
    fn queue_output_rejects_invalid_name() {
        let client = InMemoryQueueClient::new();
        let err = queue_output(&client, &SharedContextProvider::new(), "No Spaces")
            .err()
            .unwrap();
        assert!(matches!(err, HostError::InvalidQueueName(_)));
    }
}
