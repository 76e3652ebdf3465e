//! Forkful CLI - inspect and drive the offline-aware network layer.
//!
//! `status` takes one reading, `pending` and `clear` work on the persisted
//! queue metadata, and `watch` runs the provider and logs every event until
//! interrupted.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use forkful_net::{
    HttpProbeClient, JsonQueueStore, ManagerConfig, NetworkConfig, NetworkEvent, NetworkManager,
    PathsConfig, PendingRequestQueue, QueueStore, SystemLinkMonitor,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "forkful")]
#[command(about = "Connectivity and pending request diagnostics")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Directory holding the pending request file (defaults to the local data dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print one connectivity and quality reading as JSON
    Status(ProbeArgs),
    /// List persisted pending requests as JSON
    Pending,
    /// Empty the persisted pending request queue
    Clear,
    /// Run the provider and log events until Ctrl-C
    Watch(ProbeArgs),
}

#[derive(clap::Args, Debug)]
struct ProbeArgs {
    /// Reachability endpoint; repeat to try several in order
    #[arg(long = "probe-url")]
    probe_urls: Vec<Url>,

    /// Endpoint timed by the quality probe
    #[arg(long)]
    quality_url: Option<Url>,

    /// Interface sampling interval in milliseconds
    #[arg(long, default_value = "3000")]
    link_poll_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let data_dir = resolve_data_dir(args.data_dir);
    info!("Data directory: {}", data_dir.display());

    match args.command {
        Command::Status(probe) => {
            let manager = build_manager(&data_dir, &probe).await?;
            let snapshot = manager.snapshot();
            manager.shutdown();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Command::Pending => {
            let store = JsonQueueStore::new(&data_dir);
            let requests = store
                .load()
                .with_context(|| format!("Failed to read {}", store.path().display()))?;
            println!("{}", serde_json::to_string_pretty(&requests)?);
        }
        Command::Clear => {
            let removed = clear_queue(&data_dir);
            println!("Cleared {} pending requests", removed);
        }
        Command::Watch(probe) => {
            let manager = build_manager(&data_dir, &probe).await?;
            watch(&manager).await?;
            manager.shutdown();
        }
    }

    Ok(())
}

fn resolve_data_dir(explicit: Option<PathBuf>) -> PathBuf {
    match explicit {
        Some(path) => path,
        None => dirs::data_local_dir()
            .map(|dir| dir.join(PathsConfig::APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from(".").join(PathsConfig::APP_DIR_NAME)),
    }
}

fn clear_queue(data_dir: &Path) -> usize {
    let queue = PendingRequestQueue::new(Arc::new(JsonQueueStore::new(data_dir)));
    queue.initialize();
    let removed = queue.count();
    queue.clear();
    removed
}

async fn build_manager(data_dir: &Path, probe: &ProbeArgs) -> Result<NetworkManager> {
    let probe_urls = if probe.probe_urls.is_empty() {
        NetworkConfig::DEFAULT_PROBE_URLS
            .iter()
            .map(|url| url.to_string())
            .collect()
    } else {
        probe.probe_urls.iter().map(Url::to_string).collect()
    };
    let quality_url = probe
        .quality_url
        .as_ref()
        .map(Url::to_string)
        .unwrap_or_else(|| NetworkConfig::DEFAULT_QUALITY_URL.to_string());
    let http = HttpProbeClient::with_endpoints(probe_urls, quality_url)?;
    let http = Arc::new(http);

    let manager = NetworkManager::builder()
        .with_link_monitor(Arc::new(SystemLinkMonitor::with_poll_interval(
            Duration::from_millis(probe.link_poll_ms.max(100)),
        )))
        .with_reachability_check(http.clone())
        .with_latency_probe(http)
        .with_data_dir(data_dir)
        .with_config(ManagerConfig::default())
        .on_reachability_change(|online| {
            if *online {
                info!("Back online");
            } else {
                warn!("You are offline");
            }
        })
        .build()
        .await
        .context("Failed to start network manager")?;

    Ok(manager)
}

async fn watch(manager: &NetworkManager) -> Result<()> {
    let mut events = manager.events();
    info!(
        "Watching (online={}, quality={}, pending={})",
        manager.snapshot().is_online,
        manager.snapshot().network_quality,
        manager.snapshot().pending_request_count
    );

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown signal received, exiting");
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} events", skipped),
                Err(RecvError::Closed) => return Ok(()),
            },
        }
    }
}

fn log_event(event: &NetworkEvent) {
    match event {
        NetworkEvent::ConnectionChanged(state) => info!(
            "Link: connected={} reachable={} type={}",
            state.is_connected(),
            state.is_internet_reachable(),
            state.connection_type()
        ),
        NetworkEvent::ReachabilityChanged(reachable) => info!("Reachable: {}", reachable),
        NetworkEvent::QualityChanged(quality) => info!("Quality: {}", quality),
        NetworkEvent::ReplayStarted { at, pending } => {
            info!("Replaying {} pending requests (reconnected at {})", pending, at)
        }
        NetworkEvent::ReplayFinished(report) => info!(
            "Replay done: {}/{} succeeded, failed={:?}",
            report.succeeded, report.attempted, report.failed
        ),
    }
}
