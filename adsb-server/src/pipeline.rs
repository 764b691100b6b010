//! Producer/consumer decode pipeline for `adsb serve`.
//!
//! Mirrors the two-task-plus-event-loop split: a producer thread reads raw
//! frames and hands them across a bounded channel (standing in for the
//! shared buffer + ready flag behind one mutex); the consumer thread owns
//! the ICAO cache and the aircraft tracker and never blocks on network I/O.
//! The axum server and the Beast/SBS-1 listeners are the cooperative event
//! loop, reading the tracker through a `RwLock` the consumer never holds
//! for longer than one frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, mpsc};

use adsb_core::frame::{self, IcaoCache};
use adsb_core::tracker::Tracker;

use crate::db::Database;
use crate::fanout;

/// Shutdown flag checked at every loop iteration, per the single-atomic
/// cancellation model.
pub type ShutdownFlag = Arc<AtomicBool>;

/// Spawn the producer thread (file replay) and the consumer thread
/// (decode + track + fan out). Returns immediately; both threads run until
/// `shutdown` is set or the input is exhausted.
pub fn spawn(
    frames_path: std::path::PathBuf,
    db_path: String,
    tracker: Arc<RwLock<Tracker>>,
    beast_tx: broadcast::Sender<String>,
    sbs_tx: broadcast::Sender<String>,
    beast_inbound: mpsc::UnboundedReceiver<String>,
    shutdown: ShutdownFlag,
) {
    let (raw_tx, raw_rx) = std::sync::mpsc::sync_channel::<(String, f64, Option<f64>)>(256);

    // Producer: reads the replay file and any inbound Beast lines, copies
    // each into the shared channel, never holding it past the send.
    let producer_shutdown = shutdown.clone();
    std::thread::spawn(move || {
        producer_loop(frames_path, raw_tx, beast_inbound, producer_shutdown);
    });

    // Consumer: owns the ICAO cache and tracker; persists events to SQLite
    // and republishes lines to the fan-out channels.
    std::thread::spawn(move || {
        consumer_loop(raw_rx, db_path, tracker, beast_tx, sbs_tx, shutdown);
    });
}

fn producer_loop(
    frames_path: std::path::PathBuf,
    raw_tx: std::sync::mpsc::SyncSender<(String, f64, Option<f64>)>,
    mut beast_inbound: mpsc::UnboundedReceiver<String>,
    shutdown: ShutdownFlag,
) {
    use std::io::BufRead;

    // Drain any frames fed in over a Beast input connection first so they
    // interleave with the replay rather than queuing up behind it.
    while let Ok(hex) = beast_inbound.try_recv() {
        let ts = now();
        if raw_tx.send((hex, ts, None)).is_err() {
            return;
        }
    }

    let file = match std::fs::File::open(&frames_path) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(path = %frames_path.display(), error = %e, "replay file open failed");
            return;
        }
    };
    let reader = std::io::BufReader::new(file);
    let mut timestamp = now();

    for line in reader.lines() {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let line = match line {
            Ok(l) => l,
            Err(_) => continue,
        };
        let hex = line.trim();
        if hex.is_empty() || hex.starts_with('#') {
            continue;
        }
        let hex = hex
            .strip_prefix('*')
            .and_then(|s| s.strip_suffix(';'))
            .unwrap_or(hex);
        timestamp += 0.05;
        if raw_tx.send((hex.to_string(), timestamp, None)).is_err() {
            return;
        }

        // Pace replay to feel like a live feed rather than bursting the
        // whole file through the consumer at once.
        std::thread::sleep(std::time::Duration::from_millis(20));

        while let Ok(hex) = beast_inbound.try_recv() {
            let ts = now();
            if raw_tx.send((hex, ts, None)).is_err() {
                return;
            }
        }
    }
}

fn consumer_loop(
    raw_rx: std::sync::mpsc::Receiver<(String, f64, Option<f64>)>,
    db_path: String,
    tracker: Arc<RwLock<Tracker>>,
    beast_tx: broadcast::Sender<String>,
    sbs_tx: broadcast::Sender<String>,
    shutdown: ShutdownFlag,
) {
    let mut db = match Database::open(&db_path) {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(path = %db_path, error = %e, "pipeline database open failed");
            return;
        }
    };
    let mut icao_cache = IcaoCache::new(60.0);
    let mut last_maintenance = now();

    loop {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }

        let (hex, ts, signal_level) =
            match raw_rx.recv_timeout(std::time::Duration::from_millis(200)) {
                Ok(item) => item,
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    maybe_run_maintenance(&tracker, &mut last_maintenance);
                    continue;
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            };

        let parsed = frame::parse_frame(&hex, ts, signal_level, true, false, &mut icao_cache)
            .or_else(|| frame::parse_frame(&hex, ts, signal_level, false, false, &mut icao_cache));
        let Some(mf) = parsed else { continue };

        let _ = beast_tx.send(fanout::beast_line(&mf));

        let (msg, events) = {
            let mut tracker = tracker.write().unwrap();
            let result = tracker.update(&mf);
            if let Some(ac) = tracker.aircraft.get(&mf.icao) {
                if let Some(line) = fanout::sbs_line(&mf, result.0.as_ref(), ac) {
                    let _ = sbs_tx.send(line);
                }
            }
            result
        };
        let _ = msg;
        db.apply_events(&events);

        maybe_run_maintenance(&tracker, &mut last_maintenance);
    }

    db.flush();
}

fn maybe_run_maintenance(tracker: &Arc<RwLock<Tracker>>, last: &mut f64) {
    let now = now();
    if now - *last < 5.0 {
        return;
    }
    *last = now;
    tracker.write().unwrap().maintenance(now);
}

fn now() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}
