use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;

use jobhost_core::app::{FunctionError, JobHostBuilder, QueueFunction};
use jobhost_core::config::{HostConfig, load_config};
use jobhost_core::domain::QueueMessage;
use jobhost_core::impls::InMemoryQueueClient;
use jobhost_core::logging::init_logging;

#[derive(Parser, Debug)]
#[command(name = "jobhost", about = "Run a queue-triggered function host over an in-memory queue")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Queue the demo function listens on.
    #[arg(long, default_value = "orders")]
    queue: String,

    /// Messages to enqueue before starting.
    #[arg(long, default_value_t = 10)]
    messages: u32,

    /// Every Nth message always fails and ends up in the poison queue (0 = never).
    #[arg(long, default_value_t = 4)]
    fail_every: u32,

    /// Stop after this many seconds (Ctrl-C stops earlier).
    #[arg(long, default_value_t = 30)]
    run_for_secs: u64,

    /// Override `queues.visibility_timeout_ms`.
    #[arg(long)]
    visibility_timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HelloPayload {
    seq: u32,
    name: String,
    fail: bool,
}

struct HelloFunction;

#[async_trait]
impl QueueFunction for HelloFunction {
    async fn run(&self, message: &QueueMessage, _cancel: CancellationToken) -> Result<(), FunctionError> {
        let payload: HelloPayload = serde_json::from_slice(&message.body)?;
        if payload.fail {
            return Err(format!(
                "intentional failure for #{} (attempt {})",
                payload.seq, message.dequeue_count
            )
            .into());
        }

        tracing::info!(seq = payload.seq, "Hello, {}!", payload.name);
        Ok(())
    }
}

fn demo_config(cli: &Cli) -> Result<HostConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display()))?,
        None => {
            // 手元のデモ用に短め
            let mut config = HostConfig::default();
            config.queues.visibility_timeout_ms = 2_000;
            config.queues.max_polling_interval_ms = 2_000;
            config
        }
    };
    if let Some(ms) = cli.visibility_timeout_ms {
        config.queues.visibility_timeout_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = demo_config(&cli)?;
    init_logging(&config.logging.filter).context("installing tracing subscriber")?;

    let client = Arc::new(InMemoryQueueClient::new());
    let host = JobHostBuilder::new()
        .config(config)
        .queue_client(client.clone())
        .register("Hello", &cli.queue, HelloFunction)?
        .build()?;

    let output = host.queue_output(&cli.queue)?;
    for seq in 1..=cli.messages {
        let payload = HelloPayload {
            seq,
            name: format!("guest-{seq}"),
            fail: cli.fail_every != 0 && seq % cli.fail_every == 0,
        };
        output.add(serde_json::to_vec(&payload)?).await?;
    }
    tracing::info!(queue = %cli.queue, count = cli.messages, "enqueued demo messages");

    let running = host.start();

    tokio::select! {
        _ = sleep(Duration::from_secs(cli.run_for_secs)) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
            tracing::info!("Ctrl-C received");
        }
    }

    let stats = running.stop_and_join().await;
    let poison_queue = format!("{}-poison", cli.queue);

    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!(
        "remaining in '{}': {}, in '{}': {}",
        cli.queue,
        client.message_count(&cli.queue).await,
        poison_queue,
        client.message_count(&poison_queue).await,
    );
    Ok(())
}
