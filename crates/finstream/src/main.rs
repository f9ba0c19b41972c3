//! finstream: publish financial analysis messages and ingest them into a table
//!
//! Commands:
//! - `produce` publishes generated sample messages to the bus
//! - `consume` runs every configured subscription until SIGTERM/SIGINT
//! - `demo` does both in one process over the in-memory bus and exits

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use finstream_ingest::{IngestPipeline, SubscriptionOutcome};
use finstream_metadata::{PipelineConfig, TransportType};
use finstream_middleware::{InMemoryTransport, MiddlewareFactory, Transport};
use finstream_producer::{BatchingProducer, Producer, SampleGenerator};

#[derive(Parser, Debug)]
#[command(name = "finstream")]
#[command(about = "Streaming ingest of financial analysis messages")]
struct Cli {
    /// Path to pipeline configuration file (in-memory dev preset when omitted)
    #[arg(short, long, global = true, env = "FINSTREAM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish generated sample messages
    Produce {
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
    /// Consume all configured subscriptions into the table
    Consume,
    /// Produce samples and ingest them over the in-memory bus
    Demo {
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
    },
}

fn load_config(path: Option<&Path>) -> Result<(PipelineConfig, bool)> {
    let mut config = match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::dev(),
    };
    config.apply_env_overrides();
    Ok(config.validated()?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, clamped) = load_config(cli.config.as_deref())?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    if clamped {
        warn!("Batch size or retry settings were out of range and have been clamped");
    }
    info!(
        pipeline = %config.name,
        transport = ?config.bus.transport_type,
        topic = %config.bus.topic,
        table = ?config.table.table_type,
        checkpoints = ?config.checkpoint.checkpoint_type,
        "Loaded configuration"
    );

    match cli.command {
        Command::Produce { count } => {
            let transport = MiddlewareFactory::create_transport(&config.bus).await?;
            produce(&config, transport, count).await
        }
        Command::Consume => {
            let transport = MiddlewareFactory::create_transport(&config.bus).await?;
            let shutdown = CancellationToken::new();
            spawn_signal_handler(shutdown.clone());
            consume(config, transport, shutdown).await
        }
        Command::Demo { count } => {
            if config.bus.transport_type != TransportType::Memory {
                bail!("demo runs over the memory bus only");
            }
            let bus = Arc::new(InMemoryTransport::new());
            produce(&config, bus.clone(), count).await?;
            bus.close_topic(&config.bus.topic).await;

            let shutdown = CancellationToken::new();
            spawn_signal_handler(shutdown.clone());
            consume(config, bus, shutdown).await
        }
    }
}

async fn produce(config: &PipelineConfig, transport: Arc<dyn Transport>, count: usize) -> Result<()> {
    let producer = Arc::new(Producer::new(
        transport,
        config.bus.topic.clone(),
        config.producer.clone(),
    ));
    let samples = SampleGenerator::new(&config.samples);
    let batching = BatchingProducer::spawn(producer);

    let mut receipts = Vec::with_capacity(count);
    for _ in 0..count {
        let message = samples.generate()?;
        receipts.push(batching.enqueue(message, None).await?);
    }

    let mut delivered = 0usize;
    let mut failed = 0usize;
    for receipt in receipts {
        match receipt.wait().await {
            Ok(_) => delivered += 1,
            Err(e) => {
                failed += 1;
                error!(error = %e, "Delivery failed");
            }
        }
    }
    batching.close().await;

    info!(delivered = delivered, failed = failed, "Produce finished");
    if failed > 0 {
        bail!("{} of {} messages were not delivered", failed, count);
    }
    Ok(())
}

async fn consume(config: PipelineConfig, transport: Arc<dyn Transport>, shutdown: CancellationToken) -> Result<()> {
    let pipeline = IngestPipeline::from_config(config, transport).await?;
    info!("Ingest running, waiting for end of stream or SIGTERM/SIGINT to stop");

    let outcomes = pipeline.run(shutdown.clone()).await;
    shutdown.cancel();
    report(&outcomes)
}

fn report(outcomes: &[SubscriptionOutcome]) -> Result<()> {
    let mut halted = 0usize;
    for outcome in outcomes {
        match &outcome.result {
            Ok(stats) => info!(
                subscription = %outcome.subscription_id,
                received = stats.received,
                duplicates = stats.duplicates,
                quarantined = stats.quarantined,
                batches = stats.batches,
                rows = stats.rows_written,
                watermark = stats.last_committed.map(|w| w.value()).unwrap_or(0),
                "Subscription finished"
            ),
            Err(e) => {
                halted += 1;
                error!(subscription = %outcome.subscription_id, error = %e, "Subscription failed");
            }
        }
    }
    if halted > 0 {
        bail!("{} of {} subscriptions halted", halted, outcomes.len());
    }
    info!("Ingest stopped");
    Ok(())
}

/// Cancel `shutdown` on SIGTERM or SIGINT
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to create SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to create SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received, shutting down gracefully"),
            _ = sigint.recv() => info!("SIGINT received, shutting down gracefully"),
            _ = shutdown.cancelled() => return,
        }
        shutdown.cancel();
    });
}
