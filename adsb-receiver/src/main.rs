//! adsb-receiver: self-contained capture-and-upload daemon.
//!
//! Reads frames from a capture source (an IQ recording or a pre-demodulated
//! hex file, standing in for a live SDR device until `native-sdr` capture
//! lands here too), batches them, and forwards them to an `adsb-server`
//! instance's ingest API. Decoding and tracking stay server-side — this
//! binary's only job is getting bytes off the air and onto the wire.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde_json::{json, Value};

use adsb_feeder::capture::{FrameReader, IQReader, RawFrame};

#[derive(Parser, Debug)]
#[command(
    name = "adsb-receiver",
    version,
    about = "Capture ADS-B frames and feed them to a server instance"
)]
struct Cli {
    /// Base URL of the adsb-server instance, e.g. http://localhost:8080
    #[arg(long, env = "ADSB_SERVER_URL")]
    server: String,

    /// Name this receiver identifies itself as
    #[arg(long, env = "ADSB_RECEIVER_NAME", default_value = "adsb-receiver")]
    name: String,

    /// Capture source: a `.iq`/`.bin` raw sample file, or a hex-frame file
    #[arg(long, env = "ADSB_SOURCE")]
    source: PathBuf,

    /// Sample rate in Hz, only used when `source` is a raw IQ file
    #[arg(long, env = "ADSB_SAMPLE_RATE", default_value_t = 2_000_000)]
    sample_rate: u32,

    /// Observer position "lat,lon", forwarded with each batch
    #[arg(long, env = "OBSERVER_POS")]
    observer_pos: Option<String>,

    /// Frames per ingest POST
    #[arg(long, env = "ADSB_BATCH_SIZE", default_value_t = 50)]
    batch_size: usize,

    /// Seconds between heartbeat POSTs
    #[arg(long, env = "ADSB_HEARTBEAT_INTERVAL", default_value_t = 30.0)]
    heartbeat_interval: f64,
}

fn parse_observer_pos(raw: &str) -> Option<(f64, f64)> {
    let (lat_str, lon_str) = raw.split_once(',')?;
    let lat: f64 = lat_str.trim().parse().ok()?;
    let lon: f64 = lon_str.trim().parse().ok()?;
    Some((lat, lon))
}

fn read_frames(cli: &Cli) -> std::io::Result<Vec<RawFrame>> {
    let path_str = cli.source.display().to_string();
    let is_iq = matches!(
        cli.source.extension().and_then(|e| e.to_str()),
        Some("iq") | Some("bin")
    );

    if is_iq {
        IQReader::new(&path_str, cli.sample_rate).demodulate()
    } else {
        FrameReader::new(&path_str).read_all()
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let (lat, lon) = cli
        .observer_pos
        .as_deref()
        .and_then(parse_observer_pos)
        .unzip();

    let client = reqwest::Client::new();
    let frames_url = format!("{}/api/v1/frames", cli.server.trim_end_matches('/'));
    let heartbeat_url = format!("{}/api/v1/heartbeat", cli.server.trim_end_matches('/'));

    let frames = match read_frames(&cli) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(source = %cli.source.display(), error = %e, "capture source read failed");
            std::process::exit(1);
        }
    };
    tracing::info!(count = frames.len(), source = %cli.source.display(), "captured frames");

    let started = std::time::Instant::now();
    let frames_captured = frames.len() as u64;
    let frames_sent = std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0));

    let heartbeat_client = client.clone();
    let heartbeat_sent = frames_sent.clone();
    let name = cli.name.clone();
    let heartbeat_interval = Duration::from_secs_f64(cli.heartbeat_interval.max(1.0));
    let heartbeat_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(heartbeat_interval);
        loop {
            ticker.tick().await;
            let body = json!({
                "receiver": name,
                "lat": lat,
                "lon": lon,
                "frames_captured": frames_captured,
                "frames_sent": heartbeat_sent.load(std::sync::atomic::Ordering::Relaxed),
                "uptime_sec": started.elapsed().as_secs_f64(),
            });
            if let Err(e) = heartbeat_client.post(&heartbeat_url).json(&body).send().await {
                tracing::warn!(error = %e, "heartbeat POST failed");
            }
        }
    });

    let upload_sent = frames_sent.clone();
    let receiver_name = cli.name.clone();
    let batch_size = cli.batch_size.max(1);
    let upload = async move {
        for chunk in frames.chunks(batch_size) {
            let frame_values: Vec<Value> = chunk
                .iter()
                .map(|f| {
                    json!({
                        "hex": f.hex_str,
                        "timestamp": f.timestamp,
                        "signal_level": f.signal_level,
                    })
                })
                .collect();

            let body = json!({
                "receiver": receiver_name,
                "lat": lat,
                "lon": lon,
                "frames": frame_values,
            });

            match client.post(&frames_url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    upload_sent.fetch_add(chunk.len() as u64, std::sync::atomic::Ordering::Relaxed);
                }
                Ok(resp) => {
                    tracing::warn!(status = %resp.status(), "ingest POST rejected");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ingest POST failed");
                }
            }
        }
    };

    tokio::select! {
        _ = upload => {
            tracing::info!(frames_sent = frames_sent.load(std::sync::atomic::Ordering::Relaxed), "upload complete");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested, stopping upload");
        }
    }

    heartbeat_handle.abort();
}
