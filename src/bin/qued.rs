//! qued CLI: operator interface to a queue.

use clap::{Parser, Subcommand};
use qued::config::Config;
use qued::telemetry::{TelemetryConfig, init_telemetry};
use qued::worker::CommandHandler;
use qued::{Envelope, Queue, Worker, WorkerConfig};
use secrecy::ExposeSecret;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

type Payload = serde_json::Value;

#[derive(Parser)]
#[command(name = "qued", about = "Redis work queues with retries and dead-lettering")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Push a message onto the queue
    Enqueue {
        /// JSON payload
        payload: String,
        /// Message type tag
        #[arg(long = "type")]
        kind: Option<String>,
    },
    /// Pop one message and print it
    Dequeue {
        /// Seconds to wait (0 = forever)
        #[arg(long, default_value_t = 0)]
        timeout: u64,
    },
    /// Run a worker that pipes each message to a command
    Work {
        /// Executable invoked per message with the envelope JSON on stdin
        #[arg(long)]
        command: PathBuf,
        /// Seconds each dequeue blocks before re-checking for shutdown
        #[arg(long, default_value_t = 5)]
        poll_timeout: u64,
    },
    /// Dead-letter channel operations
    Dead {
        #[command(subcommand)]
        action: DeadAction,
    },
    /// Show channel depths
    Stats,
}

#[derive(Subcommand)]
enum DeadAction {
    /// Pop dead-lettered messages and print them
    Drain {
        /// Seconds to wait for each message (0 = forever)
        #[arg(long, default_value_t = 1)]
        timeout: u64,
        /// Stop after this many messages
        #[arg(long)]
        count: Option<usize>,
    },
    /// Move dead-lettered messages back onto the live queue
    Replay {
        /// Seconds to wait for each message (0 = forever)
        #[arg(long, default_value_t = 1)]
        timeout: u64,
        /// Stop after this many messages
        #[arg(long)]
        count: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "qued".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let queue = Arc::new(
        Queue::connect(config.redis_url.expose_secret(), config.queue_config()).await?,
    );

    // Release the connection on every exit path, then report the first error.
    let result = dispatch(&queue, cli.command).await;
    let closed = queue.close().await;
    result?;
    closed?;
    Ok(())
}

async fn dispatch(queue: &Arc<Queue>, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Enqueue { payload, kind } => cmd_enqueue(queue, payload, kind).await,
        Command::Dequeue { timeout } => cmd_dequeue(queue, timeout).await,
        Command::Work {
            command,
            poll_timeout,
        } => cmd_work(queue, command, poll_timeout).await,
        Command::Dead { action } => match action {
            DeadAction::Drain { timeout, count } => cmd_dead_drain(queue, timeout, count).await,
            DeadAction::Replay { timeout, count } => {
                cmd_dead_replay(queue, timeout, count).await
            }
        },
        Command::Stats => cmd_stats(queue).await,
    }
}

async fn cmd_enqueue(queue: &Queue, payload: String, kind: Option<String>) -> anyhow::Result<()> {
    let payload: Payload = serde_json::from_str(&payload)
        .map_err(|e| anyhow::anyhow!("payload is not valid JSON: {e}"))?;
    let id = queue.enqueue(kind.as_deref(), payload).await?;
    println!("Enqueued: {id}");
    Ok(())
}

async fn cmd_dequeue(queue: &Queue, timeout: u64) -> anyhow::Result<()> {
    match queue
        .dequeue::<Payload>(Duration::from_secs(timeout))
        .await?
    {
        Some(envelope) => print_envelope(&envelope)?,
        None => eprintln!("No message within {timeout}s."),
    }
    Ok(())
}

async fn cmd_work(queue: &Arc<Queue>, command: PathBuf, poll_timeout: u64) -> anyhow::Result<()> {
    let handler = Arc::new(CommandHandler::new(&command, queue.name())?);
    let worker = Worker::<Payload, _, _, _>::new(
        Arc::clone(queue),
        handler,
        WorkerConfig {
            poll_timeout: Duration::from_secs(poll_timeout),
            ..WorkerConfig::default()
        },
    );

    let w = worker.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        w.shutdown();
    });

    let stats = worker.run().await?;
    println!(
        "Completed: {}  Retried: {}  Dead-lettered: {}  Malformed: {}  Store errors: {}",
        stats.completed, stats.retried, stats.dead_lettered, stats.malformed, stats.store_errors
    );
    Ok(())
}

async fn cmd_dead_drain(queue: &Queue, timeout: u64, count: Option<usize>) -> anyhow::Result<()> {
    let mut drained = 0usize;
    while count.is_none_or(|n| drained < n) {
        match queue
            .drain_dead_letter::<Payload>(Duration::from_secs(timeout))
            .await
        {
            Ok(Some(envelope)) => print_envelope(&envelope)?,
            Ok(None) => break,
            Err(qued::Error::Malformed { reason, raw, .. }) => {
                eprintln!("Malformed entry ({reason}): {raw}");
            }
            Err(e) => return Err(e.into()),
        }
        drained += 1;
    }
    eprintln!("{drained} message(s) drained from {}", queue.dead_name());
    Ok(())
}

async fn cmd_dead_replay(queue: &Queue, timeout: u64, count: Option<usize>) -> anyhow::Result<()> {
    let mut replayed = 0usize;
    while count.is_none_or(|n| replayed < n) {
        let Some(envelope) = queue
            .drain_dead_letter::<Payload>(Duration::from_secs(timeout))
            .await?
        else {
            break;
        };
        queue.replay(&envelope).await?;
        println!("Replayed: {} (attempts: {})", envelope.id, envelope.attempts);
        replayed += 1;
    }
    eprintln!("{replayed} message(s) replayed onto {}", queue.name());
    Ok(())
}

async fn cmd_stats(queue: &Queue) -> anyhow::Result<()> {
    let stats = queue.stats().await?;
    println!("{:<24}  {:>8}", "CHANNEL", "LENGTH");
    println!("{}", "-".repeat(34));
    println!("{:<24}  {:>8}", queue.name(), stats.pending);
    println!("{:<24}  {:>8}", queue.dead_name(), stats.dead);
    Ok(())
}

fn print_envelope(envelope: &Envelope<Payload>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(envelope)?);
    Ok(())
}
