//! Stream one chat reply to the terminal.
//!
//! ```bash
//! TAROT_API_BASE_URL=https://api.example.com/v1 TAROT_API_KEY=... \
//!     tarot-chat "What does The Tower mean in a love reading?"
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tarot_stream::prelude::*;
use tarot_stream_http::{ChatMessage, ChatStreamClient, ClientConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "tarot-chat", version, about = "Stream a chat reply from an OpenAI-compatible endpoint")]
struct Cli {
    /// Question to ask.
    prompt: String,

    /// Base URL of the API.
    #[arg(long, env = "TAROT_API_BASE_URL")]
    base_url: String,

    /// Bearer token.
    #[arg(long, env = "TAROT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model name.
    #[arg(long, env = "TAROT_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Endpoint path relative to the base URL.
    #[arg(long, env = "TAROT_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Optional system prompt.
    #[arg(long)]
    system: Option<String>,

    /// Seconds to wait for the response headers.
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,

    /// Milliseconds between repaints.
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::new(cli.base_url)
        .endpoint(cli.endpoint)
        .model(cli.model)
        .timeout(Duration::from_secs(cli.timeout_secs));
    if let Some(key) = cli.api_key {
        config = config.api_key(key);
    }
    let client = ChatStreamClient::new(config).context("failed to build client")?;

    let mut messages = Vec::new();
    if let Some(system) = cli.system {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(cli.prompt.clone()));

    // The batcher hands over the full text; print only what is new.
    let printed = Arc::new(AtomicUsize::new(0));
    let scheduler = Arc::new(TokioFrameScheduler::new(Duration::from_millis(cli.frame_ms)));
    let batcher = RenderBatcher::new(scheduler, move |text| {
        let start = printed.load(Ordering::Acquire);
        if let Some(suffix) = text.get(start..) {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(suffix.as_bytes());
            let _ = stdout.flush();
            printed.store(text.len(), Ordering::Release);
        }
    });

    let history = Arc::new(MemoryHistory::new());
    let request_id = client.new_request_id();
    let mut consumer = StreamConsumer::new(batcher)
        .with_history(history.clone())
        .with_prompt(cli.prompt)
        .with_request_id(request_id.clone());

    let cancel = consumer.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let outcome = consumer
        .run(client.open_with_request_id(messages, &request_id))
        .await;
    println!();

    if let Some(task) = consumer.take_persist_task() {
        task.await.context("history task panicked")?;
    }

    match outcome {
        StreamOutcome::Completed { .. } => {
            tracing::info!(request_id, saved = history.len(), "reply complete");
            Ok(())
        }
        StreamOutcome::Failed { failure, notice, .. } => {
            if let Some(notice) = notice {
                eprintln!("{notice}");
            }
            bail!("stream failed: {failure:?}")
        }
    }
}
