//! Outbound wire formats for downstream consumers that don't speak HTTP.
//!
//! Both servers are plain line-oriented TCP: each connected client gets every
//! line broadcast after it, nothing buffered from before it connected. A
//! `tokio::sync::broadcast` channel stands in for the fan-out; lines that
//! arrive while a slow client is behind are simply dropped for that client
//! (`RecvError::Lagged`), matching a live feed rather than a replay log.

use std::io;
use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use adsb_core::tracker::AircraftState;
use adsb_core::types::{hex_encode, icao_to_string, DecodedMsg};
use adsb_core::ModeFrame;

/// Beast-style raw frame: `*` + uppercase hex of the raw frame + `;\n`.
pub fn beast_line(frame: &ModeFrame) -> String {
    format!("*{};\n", hex_encode(&frame.raw))
}

/// Heartbeat line sent by real Beast feeds to keep idle connections alive.
pub const BEAST_HEARTBEAT: &str = "*0000;\n";

/// Serve Beast-format output on `port`, broadcasting every line sent on `tx`.
///
/// Each connection also accepts the same format as input: `*hex;` lines (and
/// the `*0000;` heartbeat, which is ignored) are parsed and forwarded to
/// `inbound` so an upstream raw feed can inject frames into this server.
pub async fn run_beast_server(
    port: u16,
    tx: broadcast::Sender<String>,
    inbound: tokio::sync::mpsc::UnboundedSender<String>,
) -> io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "beast server listening");

    loop {
        let (stream, addr) = listener.accept().await?;
        let rx = tx.subscribe();
        let inbound = inbound.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_beast_client(stream, addr, rx, inbound).await {
                tracing::debug!(%addr, error = %e, "beast client disconnected");
            }
        });
    }
}

async fn handle_beast_client(
    stream: TcpStream,
    addr: SocketAddr,
    mut rx: broadcast::Receiver<String>,
    inbound: tokio::sync::mpsc::UnboundedSender<String>,
) -> io::Result<()> {
    use tokio::io::{AsyncBufReadExt, BufReader};

    tracing::debug!(%addr, "beast client connected");
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        tokio::select! {
            line = rx.recv() => {
                match line {
                    Ok(l) => write_half.write_all(l.as_bytes()).await?,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            maybe_line = lines.next_line() => {
                match maybe_line? {
                    Some(l) => {
                        if let Some(hex) = parse_beast_input(&l) {
                            let _ = inbound.send(hex);
                        }
                    }
                    None => break,
                }
            }
        }
    }

    Ok(())
}

/// Parse an inbound `*HEX;` line. Ignores the `*0000;` heartbeat.
fn parse_beast_input(line: &str) -> Option<String> {
    let line = line.trim();
    let inner = line.strip_prefix('*')?.strip_suffix(';')?;
    if inner == "0000" {
        return None;
    }
    if (inner.len() == 14 || inner.len() == 28) && inner.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(inner.to_ascii_uppercase())
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// SBS-1 BaseStation CSV
// ---------------------------------------------------------------------------

/// DF4/5/20/21 carry a 3-bit flight-status field in the low bits of byte 0
/// (right after the 5-bit DF). FS=2/3/4 means alert (ident change), FS=4/5
/// means SPI (ident pressed). Not present on any other DF.
fn flight_status(frame: &ModeFrame) -> Option<u8> {
    if matches!(frame.df, 4 | 5 | 20 | 21) && !frame.raw.is_empty() {
        Some(frame.raw[0] & 0x07)
    } else {
        None
    }
}

fn alert_flag(frame: &ModeFrame) -> bool {
    matches!(flight_status(frame), Some(2) | Some(3) | Some(4))
}

fn spi_flag(frame: &ModeFrame) -> bool {
    matches!(flight_status(frame), Some(4) | Some(5))
}

/// Emergency per the DF17 surveillance-status field (1 = permanent alert,
/// i.e. an active emergency) or the classic 7500/7600/7700 squawk codes.
fn emergency_flag(msg: Option<&DecodedMsg>, ac: &AircraftState) -> bool {
    if let Some(DecodedMsg::Position(p)) = msg {
        if p.surveillance_status == 1 {
            return true;
        }
    }
    matches!(ac.squawk.as_deref(), Some("7500") | Some("7600") | Some("7700"))
}

/// Build one SBS-1 BaseStation CSV line for a decoded message, or `None` if
/// the downlink format/type code has no BaseStation MSG subtype.
///
/// Position/velocity fields come from the aircraft's accumulated state
/// (`ac`) rather than the single message, since BaseStation rows report the
/// aircraft's current picture at each update, not just what one message
/// carried.
pub fn sbs_line(frame: &ModeFrame, msg: Option<&DecodedMsg>, ac: &AircraftState) -> Option<String> {
    let subtype = match (frame.df, msg) {
        (17, Some(DecodedMsg::Identification(_))) | (18, Some(DecodedMsg::Identification(_))) => 1,
        (17, Some(DecodedMsg::Position(_))) | (18, Some(DecodedMsg::Position(_))) => 3,
        (17, Some(DecodedMsg::Velocity(_))) | (18, Some(DecodedMsg::Velocity(_))) => 4,
        (0, _) | (4, _) | (16, _) | (20, _) => 5,
        (5, _) | (21, _) => 6,
        (11, _) => 8,
        _ => return None,
    };

    let (date, time) = civil_datetime(frame.timestamp);
    let hex = icao_to_string(&frame.icao);

    let callsign = ac.callsign.as_deref().unwrap_or("");
    let altitude = ac.altitude_ft.map(|a| a.to_string()).unwrap_or_default();
    let speed = ac.speed_kts.map(|s| format!("{s:.0}")).unwrap_or_default();
    let track = ac.heading_deg.map(|h| format!("{h:.0}")).unwrap_or_default();
    let lat = ac.lat.map(|l| format!("{l:.5}")).unwrap_or_default();
    let lon = ac.lon.map(|l| format!("{l:.5}")).unwrap_or_default();
    let vrate = ac.vertical_rate_fpm.map(|v| v.to_string()).unwrap_or_default();
    let squawk = ac.squawk.clone().unwrap_or_default();
    let on_ground = if subtype == 3 { "0" } else { "" };
    let alert = alert_flag(frame) as u8;
    let emergency = emergency_flag(msg, ac) as u8;
    let spi = spi_flag(frame) as u8;

    Some(format!(
        "MSG,{subtype},1,1,{hex},1,{date},{time},{date},{time},{callsign},{altitude},{speed},{track},{lat},{lon},{vrate},{squawk},{alert},{emergency},{spi},{on_ground}\n"
    ))
}

/// Serve SBS-1 output on `port`, broadcasting every line sent on `tx`.
pub async fn run_sbs_server(port: u16, tx: broadcast::Sender<String>) -> io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "SBS-1 server listening");

    loop {
        let (stream, addr) = listener.accept().await?;
        let rx = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = handle_sbs_client(stream, addr, rx).await {
                tracing::debug!(%addr, error = %e, "SBS client disconnected");
            }
        });
    }
}

async fn handle_sbs_client(
    mut stream: TcpStream,
    addr: SocketAddr,
    mut rx: broadcast::Receiver<String>,
) -> io::Result<()> {
    tracing::debug!(%addr, "SBS client connected");
    loop {
        match rx.recv().await {
            Ok(line) => stream.write_all(line.as_bytes()).await?,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    Ok(())
}

/// Split a unix timestamp into BaseStation's `YYYY/MM/DD` and
/// `HH:MM:SS.mmm` fields (UTC).
///
/// Civil-from-days conversion after Howard Hinnant's `days_from_civil`
/// algorithm, run in reverse — avoids pulling in a calendar dependency for
/// two formatted fields.
fn civil_datetime(ts: f64) -> (String, String) {
    let ts = ts.max(0.0);
    let total_ms = (ts * 1000.0).round() as i64;
    let days = total_ms.div_euclid(86_400_000);
    let ms_of_day = total_ms.rem_euclid(86_400_000);

    let (y, m, d) = civil_from_days(days);
    let hh = ms_of_day / 3_600_000;
    let mm = (ms_of_day / 60_000) % 60;
    let ss = (ms_of_day / 1000) % 60;
    let ms = ms_of_day % 1000;

    (
        format!("{y:04}/{m:02}/{d:02}"),
        format!("{hh:02}:{mm:02}:{ss:02}.{ms:03}"),
    )
}

fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beast_line_format() {
        let frame = ModeFrame {
            df: 17,
            icao: [0x48, 0x40, 0xD6],
            raw: vec![0x8D, 0x48, 0x40, 0xD6],
            timestamp: 0.0,
            signal_level: None,
            msg_bits: 32,
            crc_ok: true,
            corrected: false,
        };
        assert_eq!(beast_line(&frame), "*8D4840D6;\n");
    }

    #[test]
    fn test_parse_beast_input_roundtrip() {
        assert_eq!(
            parse_beast_input("*8D4840D6202CC371C32CE0576098;"),
            Some("8D4840D6202CC371C32CE0576098".to_string())
        );
    }

    #[test]
    fn test_parse_beast_input_heartbeat_ignored() {
        assert_eq!(parse_beast_input("*0000;"), None);
    }

    #[test]
    fn test_parse_beast_input_rejects_garbage() {
        assert_eq!(parse_beast_input("not a frame"), None);
    }

    #[test]
    fn test_civil_datetime_epoch() {
        let (date, time) = civil_datetime(0.0);
        assert_eq!(date, "1970/01/01");
        assert_eq!(time, "00:00:00.000");
    }

    #[test]
    fn test_civil_datetime_known_point() {
        // 2021-01-01T00:00:00Z = 1609459200
        let (date, _) = civil_datetime(1_609_459_200.0);
        assert_eq!(date, "2021/01/01");
    }

    #[test]
    fn test_sbs_line_identification() {
        let frame = ModeFrame {
            df: 17,
            icao: [0x48, 0x40, 0xD6],
            raw: vec![],
            timestamp: 1_609_459_200.0,
            signal_level: None,
            msg_bits: 112,
            crc_ok: true,
            corrected: false,
        };
        let msg = DecodedMsg::Identification(adsb_core::types::IdentificationMsg {
            icao: [0x48, 0x40, 0xD6],
            callsign: "KLM1023".into(),
            category: 3,
            timestamp: 1_609_459_200.0,
        });
        let mut ac = AircraftState::new([0x48, 0x40, 0xD6], 1_609_459_200.0);
        ac.callsign = Some("KLM1023".into());

        let line = sbs_line(&frame, Some(&msg), &ac).unwrap();
        assert!(line.starts_with("MSG,1,"));
        assert!(line.contains("KLM1023"));
    }

    #[test]
    fn test_sbs_line_all_call_has_no_decoded_msg() {
        let frame = ModeFrame {
            df: 11,
            icao: [0x48, 0x40, 0xD6],
            raw: vec![],
            timestamp: 1.0,
            signal_level: None,
            msg_bits: 56,
            crc_ok: true,
            corrected: false,
        };
        let ac = AircraftState::new([0x48, 0x40, 0xD6], 1.0);
        let line = sbs_line(&frame, None, &ac).unwrap();
        assert!(line.starts_with("MSG,8,"));
    }
}
