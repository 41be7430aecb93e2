//! Livecam Viewer Binary
//!
//! Connects to a camera's media origin, keeps the stream alive through the
//! connection manager, and reports what arrives.
//!
//! Usage:
//!   livecam --host cam.local
//!   livecam --whep-base http://cam.local:8889/cam --hls-base http://cam.local:8888/cam --json
//!
//! Environment:
//!   LIVECAM_HOST - Media origin host (default: localhost)
//!   LIVECAM_WHEP_BASE - WHEP base URL (overrides host)
//!   LIVECAM_HLS_BASE - HLS base URL (overrides host)
//!   RUST_LOG - Log filter (default: info)

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use clap::Parser;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use livecam::{
    ConnectionManager, HelperConfig, PlaybackSink, Result, SinkSource, Status, ViewerOptions,
};

#[derive(Parser, Debug)]
#[command(name = "livecam")]
#[command(about = "Live camera viewer - WebRTC first, HLS fallback")]
struct Args {
    /// Media origin host, used with the default ports and stream path
    #[arg(long, env = "LIVECAM_HOST", default_value = "localhost")]
    host: String,

    /// WHEP base URL; the offer is posted to {base}/whep
    #[arg(long, env = "LIVECAM_WHEP_BASE")]
    whep_base: Option<Url>,

    /// HLS base URL; the manifest is {base}/index.m3u8
    #[arg(long, env = "LIVECAM_HLS_BASE")]
    hls_base: Option<Url>,

    /// ICE gathering timeout in milliseconds
    #[arg(long, default_value = "3000")]
    gathering_timeout_ms: u64,

    /// ICE server URL (repeatable)
    #[arg(long = "ice-server")]
    ice_servers: Vec<String>,

    /// Start HLS three segments back and refresh once per target duration
    #[arg(long)]
    standard_latency: bool,

    /// Print status transitions as JSON lines
    #[arg(long)]
    json: bool,

    /// Seconds between statistics lines
    #[arg(long, default_value = "5")]
    stats_interval: u64,
}

impl Args {
    fn options(&self) -> Result<ViewerOptions> {
        let defaults = ViewerOptions::for_host(&self.host)?;
        let whep_base = self.whep_base.clone().unwrap_or(defaults.whep_base);
        let hls_base = self.hls_base.clone().unwrap_or(defaults.hls_base);

        let helper = HelperConfig {
            low_latency: !self.standard_latency,
            ..HelperConfig::default()
        };

        let mut options = ViewerOptions::new(whep_base, hls_base)
            .with_gathering_timeout(Duration::from_millis(self.gathering_timeout_ms))
            .with_helper(helper);
        for server in &self.ice_servers {
            options = options.with_ice_server(server.clone());
        }
        Ok(options)
    }
}

// ============================================================================
// StatsSink
// ============================================================================

/// Sink that counts what it receives instead of rendering it.
#[derive(Default)]
struct StatsSink {
    rtp_packets: Arc<AtomicU64>,
    segment_bytes: AtomicU64,
    segments: AtomicU64,
    readers: Mutex<Vec<AbortHandle>>,
}

impl PlaybackSink for StatsSink {
    fn attach(&self, source: SinkSource) {
        match source {
            SinkSource::Track(track) => {
                debug!(kind = %track.kind(), ssrc = track.ssrc(), "Reading remote track");
                let packets = Arc::clone(&self.rtp_packets);
                let reader = tokio::spawn(async move {
                    while track.read_rtp().await.is_ok() {
                        packets.fetch_add(1, Ordering::Relaxed);
                    }
                });
                self.readers.lock().push(reader.abort_handle());
            }
            SinkSource::Chunk(chunk) => {
                if !chunk.init {
                    self.segments.fetch_add(1, Ordering::Relaxed);
                }
                self.segment_bytes
                    .fetch_add(chunk.data.len() as u64, Ordering::Relaxed);
            }
        }
    }

    fn clear(&self) {
        for reader in self.readers.lock().drain(..) {
            reader.abort();
        }
    }
}

impl StatsSink {
    fn report(&self, manager: &ConnectionManager) {
        let snapshot = manager.snapshot();
        info!(
            state = ?snapshot.state,
            attempts = snapshot.reconnect_attempts,
            rtp_packets = self.rtp_packets.load(Ordering::Relaxed),
            segments = self.segments.load(Ordering::Relaxed),
            segment_bytes = self.segment_bytes.load(Ordering::Relaxed),
            "Stats"
        );
    }
}

fn print_status(status: &Status, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(status)?);
    } else {
        println!("[{:?}] {}", status.kind, status.label);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let options = args.options()?;

    info!("Starting livecam viewer");
    info!("  WHEP: {}", options.whep_url()?);
    info!("  HLS:  {}", options.manifest_url()?);

    let stats = Arc::new(StatsSink::default());
    let json = args.json;
    let manager = ConnectionManager::builder()
        .options(options)
        .sink(stats.clone())
        .on_status(move |status| {
            if let Err(e) = print_status(status, json) {
                warn!(error = %e, "Failed to print status");
            }
        })
        .build()?;

    manager.connect()?;

    let mut ticker = tokio::time::interval(Duration::from_secs(args.stats_interval.max(1)));
    ticker.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => stats.report(&manager),
        }
    }

    manager.shutdown().await
}
