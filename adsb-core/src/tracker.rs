//! Per-aircraft state machine with CPR frame pairing.
//!
//! Pure logic — no I/O, no database. Produces `TrackEvent` outputs that
//! the caller (CLI/server) writes to a database, and exposes `snapshot()`
//! for the JSON/table views.
//!
//! Tracks per-aircraft: position, velocity, callsign, squawk, CPR buffers,
//! heading history, show-state, and staleness.

use crate::cpr;
use crate::decode::decode;
use crate::frame::ModeFrame;
use crate::icao;
use crate::types::*;

/// Default: tagged `last-time` after this many seconds of silence.
pub const DEFAULT_TTL_SHOW: f64 = 60.0;
/// Default: dropped from the table after this many seconds of silence.
pub const DEFAULT_TTL_REMOVE: f64 = 300.0;

/// Maximum heading/position history entries per aircraft.
const MAX_HISTORY: usize = 120;

/// Number of recent signal levels retained per aircraft.
const SIGNAL_RING_LEN: usize = 4;

const NM_TO_METERS: f64 = 1852.0;
const EARTH_RADIUS_NM: f64 = 3440.065;

// ---------------------------------------------------------------------------
// Show-state machine
// ---------------------------------------------------------------------------

/// Display lifecycle for a tracked aircraft, walked by `maintenance()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShowState {
    /// Inserted this pass, not yet surfaced to a consumer.
    FirstTime,
    /// Seen recently; shown in snapshots.
    Normal,
    /// Just crossed `TTL_show` — shown once more, then hidden.
    LastTime,
    /// Past `TTL_show`; excluded from snapshots, kept until `TTL_remove`.
    Hidden,
}

// ---------------------------------------------------------------------------
// Track events (output)
// ---------------------------------------------------------------------------

/// Events emitted by the tracker for the caller to persist.
#[derive(Debug, Clone)]
pub enum TrackEvent {
    /// First time seeing this ICAO address.
    NewAircraft {
        icao: Icao,
        country: Option<&'static str>,
        registration: Option<String>,
        is_military: bool,
        timestamp: f64,
    },
    /// Aircraft record should be updated (last_seen).
    AircraftUpdate { icao: Icao, timestamp: f64 },
    /// Sighting record should be updated.
    SightingUpdate {
        icao: Icao,
        capture_id: Option<i64>,
        callsign: Option<String>,
        squawk: Option<String>,
        altitude_ft: Option<i32>,
        timestamp: f64,
    },
    /// New position to store (after downsampling filter).
    PositionUpdate {
        icao: Icao,
        lat: f64,
        lon: f64,
        altitude_ft: Option<i32>,
        speed_kts: Option<f64>,
        heading_deg: Option<f64>,
        vertical_rate_fpm: Option<i32>,
        receiver_id: Option<i64>,
        timestamp: f64,
    },
}

// ---------------------------------------------------------------------------
// Aircraft state
// ---------------------------------------------------------------------------

/// Mutable state for a single tracked aircraft.
#[derive(Debug, Clone)]
pub struct AircraftState {
    pub icao: Icao,
    pub callsign: Option<String>,
    pub squawk: Option<String>,

    // Position
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub altitude_ft: Option<i32>,
    pub distance_nm: Option<f64>,

    // Velocity
    pub speed_kts: Option<f64>,
    pub heading_deg: Option<f64>,
    pub heading_valid: bool,
    pub vertical_rate_fpm: Option<i32>,

    // CPR buffer for global decode
    pub cpr_even_lat: Option<u32>,
    pub cpr_even_lon: Option<u32>,
    pub cpr_even_time: f64,
    pub cpr_odd_lat: Option<u32>,
    pub cpr_odd_lon: Option<u32>,
    pub cpr_odd_time: f64,

    // Metadata
    pub country: Option<&'static str>,
    pub registration: Option<String>,
    pub is_military: bool,

    // Statistics / lifecycle
    pub seen_first: f64,
    pub seen_last: f64,
    pub est_seen_last: f64,
    pub message_count: u64,
    pub show_state: ShowState,
    signal_ring: [Option<f64>; SIGNAL_RING_LEN],
    signal_ring_pos: usize,

    // History buffers for pattern detection
    pub heading_history: Vec<(f64, f64)>, // (timestamp, heading_deg)
    pub position_history: Vec<(f64, f64, f64, Option<i32>)>, // (ts, lat, lon, alt)
}

impl AircraftState {
    pub fn new(icao: Icao, timestamp: f64) -> Self {
        AircraftState {
            icao,
            callsign: None,
            squawk: None,
            lat: None,
            lon: None,
            altitude_ft: None,
            distance_nm: None,
            speed_kts: None,
            heading_deg: None,
            heading_valid: false,
            vertical_rate_fpm: None,
            cpr_even_lat: None,
            cpr_even_lon: None,
            cpr_even_time: 0.0,
            cpr_odd_lat: None,
            cpr_odd_lon: None,
            cpr_odd_time: 0.0,
            country: icao::lookup_country(&icao),
            registration: icao::icao_to_n_number(&icao),
            is_military: icao::is_military(&icao, None),
            seen_first: timestamp,
            seen_last: timestamp,
            est_seen_last: timestamp,
            message_count: 0,
            show_state: ShowState::FirstTime,
            signal_ring: [None; SIGNAL_RING_LEN],
            signal_ring_pos: 0,
            heading_history: Vec::new(),
            position_history: Vec::new(),
        }
    }

    pub fn has_position(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }

    pub fn age(&self, now: f64) -> f64 {
        now - self.seen_last
    }

    fn push_signal(&mut self, level: Option<f64>) {
        if let Some(level) = level {
            self.signal_ring[self.signal_ring_pos] = Some(level);
            self.signal_ring_pos = (self.signal_ring_pos + 1) % SIGNAL_RING_LEN;
        }
    }

    /// Last four recorded signal levels, oldest first, skipping unset slots.
    pub fn recent_signal_levels(&self) -> Vec<f64> {
        let mut out: Vec<f64> = Vec::with_capacity(SIGNAL_RING_LEN);
        for i in 0..SIGNAL_RING_LEN {
            let idx = (self.signal_ring_pos + i) % SIGNAL_RING_LEN;
            if let Some(level) = self.signal_ring[idx] {
                out.push(level);
            }
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Track multiple aircraft from decoded messages.
///
/// Pure state machine: call `update()` with frames, get back decoded messages
/// and `TrackEvent` outputs. The caller decides what to do with events
/// (write to DB, send to network, etc.). Call `maintenance()` periodically
/// to walk the show-state machine and evict stale aircraft.
pub struct Tracker {
    pub aircraft: std::collections::HashMap<Icao, AircraftState>,
    pub receiver_id: Option<i64>,
    pub capture_id: Option<i64>,
    pub ref_lat: Option<f64>,
    pub ref_lon: Option<f64>,
    pub min_position_interval: f64,
    pub ttl_show: f64,
    pub ttl_remove: f64,

    // Last stored position timestamp per ICAO (for downsampling)
    last_stored: std::collections::HashMap<Icao, f64>,

    // Counters
    pub total_frames: u64,
    pub valid_frames: u64,
    pub position_decodes: u64,
    pub positions_skipped: u64,
}

impl Tracker {
    pub fn new(
        receiver_id: Option<i64>,
        capture_id: Option<i64>,
        ref_lat: Option<f64>,
        ref_lon: Option<f64>,
        min_position_interval: f64,
    ) -> Self {
        Tracker {
            aircraft: std::collections::HashMap::new(),
            receiver_id,
            capture_id,
            ref_lat,
            ref_lon,
            min_position_interval,
            ttl_show: DEFAULT_TTL_SHOW,
            ttl_remove: DEFAULT_TTL_REMOVE,
            last_stored: std::collections::HashMap::new(),
            total_frames: 0,
            valid_frames: 0,
            position_decodes: 0,
            positions_skipped: 0,
        }
    }

    pub fn with_ttls(mut self, ttl_show: f64, ttl_remove: f64) -> Self {
        self.ttl_show = ttl_show;
        self.ttl_remove = ttl_remove;
        self
    }

    /// Process a single parsed frame. Returns decoded message and events to persist.
    ///
    /// A CRC-failed frame never reaches here from `parse_frame`/`decode`, but
    /// `decode()` itself also refuses to emit a message for one, so this is
    /// belt-and-suspenders with the frame layer's own invariant.
    pub fn update(&mut self, frame: &ModeFrame) -> (Option<DecodedMsg>, Vec<TrackEvent>) {
        self.total_frames += 1;
        let mut events = Vec::new();

        let msg = match decode(frame) {
            Some(m) => m,
            None => return (None, events),
        };

        self.valid_frames += 1;
        let icao = *msg.icao();
        let timestamp = msg.timestamp();

        // find-or-create
        let is_new = !self.aircraft.contains_key(&icao);
        if is_new {
            let ac = AircraftState::new(icao, timestamp);
            events.push(TrackEvent::NewAircraft {
                icao,
                country: ac.country,
                registration: ac.registration.clone(),
                is_military: ac.is_military,
                timestamp,
            });
            self.aircraft.insert(icao, ac);
        }

        let ac = self.aircraft.get_mut(&icao).unwrap();
        ac.seen_last = timestamp;
        ac.message_count += 1;
        ac.push_signal(frame.signal_level);

        match &msg {
            DecodedMsg::Identification(m) => {
                let cs = m.callsign.trim().to_string();
                if !cs.is_empty() {
                    if !ac.is_military {
                        ac.is_military = icao::is_military(&icao, Some(&cs));
                    }
                    ac.callsign = Some(cs);
                }
            }
            DecodedMsg::Position(m) => {
                if let Some(alt) = m.altitude_ft {
                    ac.altitude_ft = Some(alt);
                }

                if m.cpr_odd {
                    ac.cpr_odd_lat = Some(m.cpr_lat);
                    ac.cpr_odd_lon = Some(m.cpr_lon);
                    ac.cpr_odd_time = m.timestamp;
                } else {
                    ac.cpr_even_lat = Some(m.cpr_lat);
                    ac.cpr_even_lon = Some(m.cpr_lon);
                    ac.cpr_even_time = m.timestamp;
                }

                if let Some((lat, lon)) = try_cpr_decode(ac, self.ref_lat, self.ref_lon) {
                    ac.lat = Some(lat);
                    ac.lon = Some(lon);
                    ac.est_seen_last = timestamp;
                    ac.distance_nm = distance_to_observer(lat, lon, self.ref_lat, self.ref_lon);
                    self.position_decodes += 1;

                    ac.position_history
                        .push((timestamp, lat, lon, ac.altitude_ft));
                    if ac.position_history.len() > MAX_HISTORY {
                        let start = ac.position_history.len() - MAX_HISTORY;
                        ac.position_history = ac.position_history[start..].to_vec();
                    }

                    let last = self.last_stored.get(&icao).copied();
                    if last.is_none() || timestamp - last.unwrap() >= self.min_position_interval {
                        events.push(TrackEvent::PositionUpdate {
                            icao,
                            lat,
                            lon,
                            altitude_ft: ac.altitude_ft,
                            speed_kts: ac.speed_kts,
                            heading_deg: ac.heading_deg,
                            vertical_rate_fpm: ac.vertical_rate_fpm,
                            receiver_id: self.receiver_id,
                            timestamp,
                        });
                        self.last_stored.insert(icao, timestamp);
                    } else {
                        self.positions_skipped += 1;
                    }
                }
            }
            DecodedMsg::Velocity(m) => {
                if let Some(spd) = m.speed_kts {
                    ac.speed_kts = Some(spd);
                }
                if let Some(hdg) = m.heading_deg {
                    ac.heading_deg = Some(hdg);
                    ac.heading_valid = true;
                    ac.heading_history.push((timestamp, hdg));
                    if ac.heading_history.len() > MAX_HISTORY {
                        let start = ac.heading_history.len() - MAX_HISTORY;
                        ac.heading_history = ac.heading_history[start..].to_vec();
                    }
                } else {
                    ac.heading_valid = false;
                }
                if let Some(vr) = m.vertical_rate_fpm {
                    ac.vertical_rate_fpm = Some(vr);
                }
            }
            DecodedMsg::Altitude(m) => {
                if let Some(alt) = m.altitude_ft {
                    ac.altitude_ft = Some(alt);
                }
            }
            DecodedMsg::Squawk(m) => {
                ac.squawk = Some(m.squawk.clone());
            }
        }

        events.push(TrackEvent::AircraftUpdate { icao, timestamp });
        events.push(TrackEvent::SightingUpdate {
            icao,
            capture_id: self.capture_id,
            callsign: ac.callsign.clone(),
            squawk: ac.squawk.clone(),
            altitude_ft: ac.altitude_ft,
            timestamp,
        });

        (Some(msg), events)
    }

    /// Project `a`'s position forward from its last fix using heading+speed.
    ///
    /// No-op if the aircraft lacks a valid heading, has zero speed, or has
    /// never had a position fix.
    pub fn estimate(&mut self, icao: &Icao, now: f64) {
        let Some(ac) = self.aircraft.get_mut(icao) else {
            return;
        };
        estimate_position(ac, now);
    }

    /// Walk the show-state machine and evict aircraft past `ttl_remove`.
    /// Returns the number of aircraft dropped.
    pub fn maintenance(&mut self, now: f64) -> usize {
        let mut to_remove = Vec::new();
        for (icao, ac) in self.aircraft.iter_mut() {
            let age = now - ac.seen_last;
            match ac.show_state {
                ShowState::FirstTime => ac.show_state = ShowState::Normal,
                ShowState::LastTime => ac.show_state = ShowState::Hidden,
                ShowState::Normal | ShowState::Hidden => {}
            }
            if age > self.ttl_show && matches!(ac.show_state, ShowState::Normal) {
                ac.show_state = ShowState::LastTime;
            }
            if age > self.ttl_remove {
                to_remove.push(*icao);
            }
        }
        let count = to_remove.len();
        for icao in to_remove {
            self.aircraft.remove(&icao);
            self.last_stored.remove(&icao);
        }
        count
    }

    /// Aircraft visible to a snapshot consumer: everything except `hidden`.
    pub fn snapshot(&self) -> Vec<&AircraftState> {
        let mut visible: Vec<_> = self
            .aircraft
            .values()
            .filter(|ac| ac.show_state != ShowState::Hidden)
            .collect();
        visible.sort_by(|a, b| b.seen_last.partial_cmp(&a.seen_last).unwrap());
        visible
    }

    /// Return all non-stale aircraft, sorted by last seen (most recent first).
    /// Kept for callers (CLI tooling) that don't use the show-state machine.
    pub fn get_active(&self, now: f64) -> Vec<&AircraftState> {
        let mut active: Vec<_> = self
            .aircraft
            .values()
            .filter(|ac| now - ac.seen_last <= self.ttl_show)
            .collect();
        active.sort_by(|a, b| b.seen_last.partial_cmp(&a.seen_last).unwrap());
        active
    }

    /// Remove aircraft past `ttl_remove`, bypassing the show-state machine.
    /// Returns count removed.
    pub fn prune_stale(&mut self, now: f64) -> usize {
        let stale: Vec<Icao> = self
            .aircraft
            .iter()
            .filter(|(_, ac)| now - ac.seen_last > self.ttl_remove)
            .map(|(k, _)| *k)
            .collect();
        let count = stale.len();
        for k in stale {
            self.aircraft.remove(&k);
        }
        count
    }
}

/// Try to decode position from CPR frames (free function to avoid borrow conflicts).
///
/// Prefers the global (paired odd/even) decode; falls back to a local decode
/// against a reference position (the receiver's own location, or — absent
/// that — the aircraft's last known fix) so a single frame can still resolve
/// a usable position while waiting for its complement.
fn try_cpr_decode(
    ac: &AircraftState,
    tracker_ref_lat: Option<f64>,
    tracker_ref_lon: Option<f64>,
) -> Option<(f64, f64)> {
    if ac.cpr_even_lat.is_some() && ac.cpr_odd_lat.is_some() {
        let result = cpr::global_decode(
            ac.cpr_even_lat.unwrap(),
            ac.cpr_even_lon.unwrap(),
            ac.cpr_odd_lat.unwrap(),
            ac.cpr_odd_lon.unwrap(),
            ac.cpr_even_time,
            ac.cpr_odd_time,
        );
        if result.is_some() {
            return result;
        }
    }

    let (ref_lat, ref_lon) = match (tracker_ref_lat, tracker_ref_lon) {
        (Some(lat), Some(lon)) => (lat, lon),
        _ => match (ac.lat, ac.lon) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => return None,
        },
    };

    if ac.cpr_odd_time >= ac.cpr_even_time {
        if let Some(lat) = ac.cpr_odd_lat {
            return Some(cpr::local_decode(
                lat,
                ac.cpr_odd_lon.unwrap(),
                true,
                ref_lat,
                ref_lon,
            ));
        }
    } else if let Some(lat) = ac.cpr_even_lat {
        return Some(cpr::local_decode(
            lat,
            ac.cpr_even_lon.unwrap(),
            false,
            ref_lat,
            ref_lon,
        ));
    }

    None
}

/// Great-circle distance in nautical miles (haversine).
fn great_circle_nm(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_NM * c
}

fn distance_to_observer(lat: f64, lon: f64, ref_lat: Option<f64>, ref_lon: Option<f64>) -> Option<f64> {
    match (ref_lat, ref_lon) {
        (Some(rlat), Some(rlon)) => Some(great_circle_nm(rlat, rlon, lat, lon)),
        _ => None,
    }
}

/// Flat-earth dead-reckoning projection, accurate over the few-second gaps
/// between fixes this is used for. `ac.lat`/`ac.lon` are overwritten in place.
fn estimate_position(ac: &mut AircraftState, now: f64) {
    let (Some(heading), Some(speed), Some(lat), Some(lon)) =
        (ac.heading_deg, ac.speed_kts, ac.lat, ac.lon)
    else {
        return;
    };
    if !ac.heading_valid || speed <= 0.0 {
        return;
    }
    let dt_hours = (now - ac.est_seen_last) / 3600.0;
    if dt_hours <= 0.0 {
        return;
    }
    let distance_m = speed * dt_hours * NM_TO_METERS;
    let heading_rad = heading.to_radians();
    let dx = distance_m * heading_rad.sin();
    let dy = distance_m * heading_rad.cos();

    let meters_per_deg_lat = 111_320.0;
    let meters_per_deg_lon = 111_320.0 * lat.to_radians().cos().max(1e-6);

    let new_lat = lat + dy / meters_per_deg_lat;
    let new_lon = lon + dx / meters_per_deg_lon;

    ac.lat = Some(new_lat);
    ac.lon = Some(new_lon);
    ac.est_seen_last = now;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse_frame_uncached;

    fn make_tracker() -> Tracker {
        Tracker::new(None, None, None, None, 2.0)
    }

    fn parse(hex: &str, ts: f64) -> ModeFrame {
        parse_frame_uncached(hex, ts, None).expect("valid frame")
    }

    #[test]
    fn test_new_aircraft_event() {
        let mut tracker = make_tracker();
        let frame = parse("8D4840D6202CC371C32CE0576098", 1.0);
        let (msg, events) = tracker.update(&frame);

        assert!(msg.is_some());
        assert!(events
            .iter()
            .any(|e| matches!(e, TrackEvent::NewAircraft { .. })));
    }

    #[test]
    fn test_aircraft_state_created() {
        let mut tracker = make_tracker();
        let frame = parse("8D4840D6202CC371C32CE0576098", 1.0);
        tracker.update(&frame);

        let icao = [0x48, 0x40, 0xD6];
        assert!(tracker.aircraft.contains_key(&icao));

        let ac = &tracker.aircraft[&icao];
        assert_eq!(ac.callsign.as_deref(), Some("KLM1023"));
        assert_eq!(ac.country, Some("Netherlands"));
        assert_eq!(ac.message_count, 1);
        assert_eq!(ac.show_state, ShowState::FirstTime);
    }

    #[test]
    fn test_position_cpr_pairing() {
        let mut tracker = make_tracker();

        let frame = parse("8D40621D58C382D690C8AC2863A7", 1.0);
        tracker.update(&frame);

        let icao = [0x40, 0x62, 0x1D];
        let ac = &tracker.aircraft[&icao];
        assert!(ac.cpr_even_lat.is_some());
        assert!(!ac.has_position());

        let frame = parse("8D40621D58C386435CC412692AD6", 2.0);
        let (_, events) = tracker.update(&frame);

        let ac = &tracker.aircraft[&icao];
        assert!(ac.has_position(), "Should have position after CPR pair");
        assert_eq!(ac.altitude_ft, Some(38000));

        assert!(events
            .iter()
            .any(|e| matches!(e, TrackEvent::PositionUpdate { .. })));
    }

    #[test]
    fn test_velocity_update() {
        let mut tracker = make_tracker();
        let frame = parse("8D485020994409940838175B284F", 1.0);
        tracker.update(&frame);

        let icao = [0x48, 0x50, 0x20];
        let ac = &tracker.aircraft[&icao];
        assert!(ac.speed_kts.is_some());
        assert!(ac.heading_deg.is_some());
        assert!(ac.heading_valid);
        assert_eq!(ac.vertical_rate_fpm, Some(-832));
    }

    #[test]
    fn test_signal_ring_buffer() {
        let mut tracker = make_tracker();
        for i in 0..6 {
            let mut frame = parse("8D4840D6202CC371C32CE0576098", 1.0 + i as f64);
            frame.signal_level = Some(i as f64);
            tracker.update(&frame);
        }
        let icao = [0x48, 0x40, 0xD6];
        let ac = &tracker.aircraft[&icao];
        // Ring holds only the last 4 of the 6 pushed levels.
        assert_eq!(ac.recent_signal_levels(), vec![2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_maintenance_show_state_progression() {
        let mut tracker = make_tracker().with_ttls(10.0, 20.0);
        let frame = parse("8D4840D6202CC371C32CE0576098", 1.0);
        tracker.update(&frame);

        let icao = [0x48, 0x40, 0xD6];
        assert_eq!(tracker.aircraft[&icao].show_state, ShowState::FirstTime);

        tracker.maintenance(2.0);
        assert_eq!(tracker.aircraft[&icao].show_state, ShowState::Normal);

        tracker.maintenance(15.0); // 15 - 1 = 14 > ttl_show(10)
        assert_eq!(tracker.aircraft[&icao].show_state, ShowState::LastTime);

        tracker.maintenance(16.0); // one more pass: last-time -> hidden
        assert_eq!(tracker.aircraft[&icao].show_state, ShowState::Hidden);

        assert_eq!(tracker.maintenance(25.0), 1); // 25 - 1 = 24 > ttl_remove(20)
        assert!(!tracker.aircraft.contains_key(&icao));
    }

    #[test]
    fn test_snapshot_excludes_hidden() {
        let mut tracker = make_tracker().with_ttls(5.0, 100.0);
        let frame = parse("8D4840D6202CC371C32CE0576098", 1.0);
        tracker.update(&frame);

        tracker.maintenance(2.0); // first-time -> normal
        assert_eq!(tracker.snapshot().len(), 1);

        tracker.maintenance(10.0); // normal -> last-time (age 9 > 5)
        assert_eq!(tracker.snapshot().len(), 1); // last-time still shown

        tracker.maintenance(11.0); // last-time -> hidden
        assert_eq!(tracker.snapshot().len(), 0);
    }

    #[test]
    fn test_estimate_projects_position() {
        let mut tracker = make_tracker();
        tracker.update(&parse("8D40621D58C382D690C8AC2863A7", 1.0));
        tracker.update(&parse("8D40621D58C386435CC412692AD6", 2.0));
        tracker.update(&parse("8D485020994409940838175B284F", 2.0)); // unrelated, just to exercise velocity path

        let icao = [0x40, 0x62, 0x1D];
        {
            let ac = tracker.aircraft.get_mut(&icao).unwrap();
            ac.heading_deg = Some(90.0);
            ac.heading_valid = true;
            ac.speed_kts = Some(500.0);
        }
        let (lat0, lon0) = {
            let ac = &tracker.aircraft[&icao];
            (ac.lat.unwrap(), ac.lon.unwrap())
        };

        tracker.estimate(&icao, 62.0); // 60s later at 500kts should move noticeably east
        let ac = &tracker.aircraft[&icao];
        assert!(ac.lon.unwrap() > lon0, "heading 90 should move longitude east");
        assert!((ac.lat.unwrap() - lat0).abs() < 0.01, "heading 90 shouldn't move latitude much");
    }

    #[test]
    fn test_prune_stale() {
        let mut tracker = make_tracker();

        let frame = parse("8D4840D6202CC371C32CE0576098", 1.0);
        tracker.update(&frame);

        assert_eq!(tracker.aircraft.len(), 1);
        assert_eq!(tracker.prune_stale(2.0), 0);
        assert_eq!(tracker.prune_stale(400.0), 1);
        assert_eq!(tracker.aircraft.len(), 0);
    }

    #[test]
    fn test_get_active() {
        let mut tracker = make_tracker();

        let frame = parse("8D4840D6202CC371C32CE0576098", 1.0);
        tracker.update(&frame);

        assert_eq!(tracker.get_active(2.0).len(), 1);
        assert_eq!(tracker.get_active(62.0).len(), 0);
    }

    #[test]
    fn test_position_downsampling() {
        let mut tracker = Tracker::new(None, None, None, None, 5.0);

        let frame = parse("8D40621D58C382D690C8AC2863A7", 1.0); // even
        tracker.update(&frame);
        let frame = parse("8D40621D58C386435CC412692AD6", 2.0); // odd
        tracker.update(&frame);

        assert_eq!(tracker.position_decodes, 1);
        assert_eq!(tracker.positions_skipped, 0);

        let frame = parse("8D40621D58C382D690C8AC2863A7", 3.0);
        tracker.update(&frame);
        let frame = parse("8D40621D58C386435CC412692AD6", 4.0);
        tracker.update(&frame);

        assert_eq!(tracker.position_decodes, 3);
        assert_eq!(tracker.positions_skipped, 2);

        let frame = parse("8D40621D58C382D690C8AC2863A7", 7.0);
        tracker.update(&frame);
        let frame = parse("8D40621D58C386435CC412692AD6", 8.0);
        tracker.update(&frame);

        assert_eq!(tracker.position_decodes, 5);
        assert_eq!(tracker.positions_skipped, 3);
    }

    #[test]
    fn test_counters() {
        let mut tracker = make_tracker();

        let frame = parse("8D4840D6202CC371C32CE0576098", 1.0);
        tracker.update(&frame);

        assert_eq!(tracker.total_frames, 1);
        assert_eq!(tracker.valid_frames, 1);
    }

    #[test]
    fn test_sighting_event_emitted() {
        let mut tracker = make_tracker();
        let frame = parse("8D4840D6202CC371C32CE0576098", 1.0);
        let (_, events) = tracker.update(&frame);

        assert!(events
            .iter()
            .any(|e| matches!(e, TrackEvent::SightingUpdate { .. })));
    }

    #[test]
    fn test_second_message_not_new_aircraft() {
        let mut tracker = make_tracker();

        let frame = parse("8D4840D6202CC371C32CE0576098", 1.0);
        tracker.update(&frame);

        let frame = parse("8D4840D6202CC371C32CE0576098", 2.0);
        let (_, events) = tracker.update(&frame);

        let new_count = events
            .iter()
            .filter(|e| matches!(e, TrackEvent::NewAircraft { .. }))
            .count();
        assert_eq!(new_count, 0);
    }

    #[test]
    fn test_multiple_aircraft() {
        let mut tracker = make_tracker();

        tracker.update(&parse("8D4840D6202CC371C32CE0576098", 1.0));
        tracker.update(&parse("8D406B902015A678D4D220AA4BDA", 2.0));

        assert_eq!(tracker.aircraft.len(), 2);
    }

    #[test]
    fn test_distance_to_observer() {
        let mut tracker = Tracker::new(None, None, Some(52.25), Some(3.92), 0.0);
        tracker.update(&parse("8D40621D58C382D690C8AC2863A7", 1.0));
        tracker.update(&parse("8D40621D58C386435CC412692AD6", 2.0));

        let icao = [0x40, 0x62, 0x1D];
        let ac = &tracker.aircraft[&icao];
        assert!(ac.distance_nm.is_some());
        assert!(ac.distance_nm.unwrap() < 5.0, "should be close to observer");
    }

    #[test]
    fn test_military_callsign_detection() {
        let mut tracker = make_tracker();

        let frame = parse("8D4840D6202CC371C32CE0576098", 1.0);
        tracker.update(&frame);

        let icao = [0x48, 0x40, 0xD6];
        assert!(!tracker.aircraft[&icao].is_military);
    }
}
