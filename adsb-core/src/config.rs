//! Environment-driven runtime configuration.
//!
//! Everything the pipeline needs at startup comes from a handful of
//! environment variables rather than a config file: `OBSERVER_POS`,
//! `ADSB_DEVICE`, `ADSB_BIND`, `ADSB_TTL_SHOW`/`ADSB_TTL_REMOVE`,
//! `ADSB_DB_PATH`, and `RUST_LOG` (read directly by `tracing_subscriber`,
//! not parsed here).

use clap::Parser;

use crate::types::AdsbError;

const DEFAULT_TTL_SHOW: f64 = 60.0;
const DEFAULT_TTL_REMOVE: f64 = 300.0;

/// Runtime configuration parsed from environment variables (and, for the
/// CLI binaries, equivalent flags via clap's `env` feature).
#[derive(Parser, Debug, Clone)]
pub struct EnvConfig {
    /// Observer's reference position, `"lat,lon"` — both in range, lat
    /// within [-90, 90] and lon within [-180, 180].
    #[arg(long, env = "OBSERVER_POS")]
    pub observer_pos: Option<String>,

    /// SDR device identifier, or a replay file path when no hardware is
    /// attached.
    #[arg(long, env = "ADSB_DEVICE")]
    pub device: Option<String>,

    /// HTTP bind address for the web server.
    #[arg(long, env = "ADSB_BIND", default_value = "0.0.0.0:8080")]
    pub bind: String,

    /// Seconds of silence before an aircraft drops out of the "show" set.
    #[arg(long, env = "ADSB_TTL_SHOW", default_value_t = DEFAULT_TTL_SHOW)]
    pub ttl_show: f64,

    /// Seconds of silence before an aircraft is evicted entirely.
    #[arg(long, env = "ADSB_TTL_REMOVE", default_value_t = DEFAULT_TTL_REMOVE)]
    pub ttl_remove: f64,

    /// SQLite database path.
    #[arg(long, env = "ADSB_DB_PATH", default_value = "data/adsb.db")]
    pub db_path: String,
}

impl EnvConfig {
    /// Parse `OBSERVER_POS` into `(lat, lon)`, validating range.
    pub fn observer_position(&self) -> Result<Option<(f64, f64)>, AdsbError> {
        let Some(raw) = &self.observer_pos else {
            return Ok(None);
        };
        let (lat_str, lon_str) = raw
            .split_once(',')
            .ok_or_else(|| AdsbError::Config(format!("OBSERVER_POS must be \"lat,lon\": {raw}")))?;

        let lat: f64 = lat_str
            .trim()
            .parse()
            .map_err(|_| AdsbError::Config(format!("invalid latitude in OBSERVER_POS: {raw}")))?;
        let lon: f64 = lon_str
            .trim()
            .parse()
            .map_err(|_| AdsbError::Config(format!("invalid longitude in OBSERVER_POS: {raw}")))?;

        if !(-90.0..=90.0).contains(&lat) {
            return Err(AdsbError::Config(format!("latitude out of range [-90,90]: {lat}")));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(AdsbError::Config(format!("longitude out of range [-180,180]: {lon}")));
        }

        Ok(Some((lat, lon)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> EnvConfig {
        let mut full = vec!["adsb"];
        full.extend_from_slice(args);
        EnvConfig::parse_from(full)
    }

    #[test]
    fn test_defaults() {
        let cfg = parse(&[]);
        assert_eq!(cfg.bind, "0.0.0.0:8080");
        assert_eq!(cfg.ttl_show, DEFAULT_TTL_SHOW);
        assert_eq!(cfg.ttl_remove, DEFAULT_TTL_REMOVE);
        assert_eq!(cfg.db_path, "data/adsb.db");
        assert!(cfg.observer_pos.is_none());
        assert!(cfg.observer_position().unwrap().is_none());
    }

    #[test]
    fn test_observer_pos_valid() {
        let cfg = parse(&["--observer-pos", "35.5,-82.5"]);
        assert_eq!(cfg.observer_position().unwrap(), Some((35.5, -82.5)));
    }

    #[test]
    fn test_observer_pos_out_of_range_lat() {
        let cfg = parse(&["--observer-pos", "95.0,0.0"]);
        assert!(cfg.observer_position().is_err());
    }

    #[test]
    fn test_observer_pos_out_of_range_lon() {
        let cfg = parse(&["--observer-pos", "0.0,200.0"]);
        assert!(cfg.observer_position().is_err());
    }

    #[test]
    fn test_observer_pos_malformed() {
        let cfg = parse(&["--observer-pos", "not-a-position"]);
        assert!(cfg.observer_position().is_err());
    }

    #[test]
    fn test_overrides() {
        let cfg = parse(&[
            "--bind", "127.0.0.1:9090",
            "--ttl-show", "30",
            "--ttl-remove", "120",
            "--db-path", "/tmp/test.db",
        ]);
        assert_eq!(cfg.bind, "127.0.0.1:9090");
        assert_eq!(cfg.ttl_show, 30.0);
        assert_eq!(cfg.ttl_remove, 120.0);
        assert_eq!(cfg.db_path, "/tmp/test.db");
    }

    #[test]
    fn test_clap_command_is_valid() {
        // Sanity check the derive produces a well-formed clap::Command.
        EnvConfig::command().debug_assert();
    }
}
