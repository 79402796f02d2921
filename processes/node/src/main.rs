//! 'main' for the hashchain node process

use anyhow::{Context as _, Result};
use clap::Parser;
use config::{Config, Environment, File};
use hashchain_common::{SyncEvent, SyncOutput};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use hashchain_module_block_injector::{BlockInjector, InjectorConfig};
use hashchain_module_chain_sync::{ChainSync, SyncConfig};

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::SpanExporter;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter, fmt, EnvFilter, Registry};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Debug, Parser)]
#[command(version, about = "Hashchain node")]
struct Args {
    /// Config file, without extension
    #[arg(short, long, value_name = "PATH", default_value = "node")]
    config: String,

    /// Glob of JSON block files to inject, overriding the config
    #[arg(short, long, value_name = "GLOB")]
    blocks: Option<String>,
}

/// Stand-in for the network layer: report what chain sync wants sent.
async fn log_outputs(mut outputs: mpsc::Receiver<SyncOutput>) {
    while let Some(output) = outputs.recv().await {
        match output {
            SyncOutput::Broadcast { block, except } => match except {
                Some(peer) => debug!("Broadcast {} (not to {peer})", block.hash),
                None => debug!("Broadcast {}", block.hash),
            },
            SyncOutput::RequestChain { peer, tip } => {
                info!("Would request chain behind {} from {peer}", tip.hash);
            }
            SyncOutput::SendChain { peer, tip, chain } => {
                info!("Would send {} blocks behind {} to {peer}", chain.len(), tip.hash);
            }
        }
    }
}

/// Standard main
#[tokio::main]
pub async fn main() -> Result<()> {
    let args = Args::parse();

    // Standard logging using RUST_LOG for log levels
    let fmt_layer = fmt::layer().with_filter(EnvFilter::from_default_env());

    // Only turn on tracing if some OTEL environment variables exist
    if std::env::vars().any(|(name, _)| name.starts_with("OTEL_")) {
        // Send span tracing to opentelemetry
        // Should pick up standard OTEL_* environment variables
        let otel_exporter = SpanExporter::builder().with_tonic().build()?;
        let otel_tracer = SdkTracerProvider::builder()
            .with_batch_exporter(otel_exporter)
            .build()
            .tracer("rust-otel-otlp");
        let otel_layer = OpenTelemetryLayer::new(otel_tracer)
            .with_filter(
                EnvFilter::from_default_env().add_directive(filter::LevelFilter::INFO.into()),
            )
            .with_filter(filter::filter_fn(|meta| meta.is_span()));
        Registry::default().with(fmt_layer).with(otel_layer).init();
    } else {
        Registry::default().with(fmt_layer).init();
    }

    info!("Hashchain node process");

    // Read the config
    let config = Config::builder()
        .add_source(File::with_name(&args.config).required(false))
        .add_source(Environment::with_prefix("HASHCHAIN"))
        .set_override_option("block-injector.block-files", args.blocks)?
        .build()
        .with_context(|| format!("Failed to read config '{}'", args.config))?;

    let sync_config = SyncConfig::try_load(&config)?;
    let injector_config = InjectorConfig::try_load(&config)?;
    debug!("Chain sync config: {sync_config:?}");

    // Wire chain sync to its producers and to the output reporter
    let (sync, events, outputs) = ChainSync::new(sync_config);
    let sync_task = tokio::spawn(sync.run());
    let output_task = tokio::spawn(log_outputs(outputs));

    let injector = BlockInjector::new(injector_config, events.clone());
    if let Err(e) = injector.run().await {
        error!("Block injection failed: {e:#}");
    }

    info!("Running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    if events.send(SyncEvent::Shutdown).await.is_err() {
        warn!("Chain sync already stopped");
    }
    let tree = sync_task.await?;
    output_task.await?;

    info!(
        "Final tree: {} blocks, height {}, top {}",
        tree.len(),
        tree.height(),
        tree.top().hash
    );

    // Bye!
    info!("Exiting");

    Ok(())
}
