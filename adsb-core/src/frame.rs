//! Parse raw hex strings into structured Mode S frames.
//!
//! Responsibilities:
//! - Classify Downlink Format (DF) from first 5 bits
//! - Extract ICAO address (bytes 1-3 for DF11/17/18, or from CRC residual)
//! - Package into `ModeFrame`
//! - Reject frames that fail CRC validation
//! - Attempt 1-2 bit error correction on CRC failures
//! - Validate residual-recovered ICAOs against a time-windowed cache

use crate::crc;
use crate::types::{df_info, hex_decode, icao_to_u32, Icao};

// DFs where ICAO is explicit in bytes 1-3
const DF_EXPLICIT_ICAO: &[u8] = &[11, 17, 18];

// DFs where ICAO is recovered from CRC residual
const DF_RESIDUAL_ICAO: &[u8] = &[0, 4, 5, 16, 20, 21];

// ---------------------------------------------------------------------------
// ICAO cache
// ---------------------------------------------------------------------------

/// Must be a power of two — the hash is masked, not modulo'd, against it.
const DEFAULT_CACHE_LEN: usize = 1024;

/// Fixed-size, direct-mapped cache of recently validated ICAO addresses.
///
/// ICAOs are registered when seen in DF11/17 frames (explicit, CRC-validated).
/// For DF0/4/5/16/20/21, the address is recovered from the CRC residual —
/// noise produces fake addresses, so the cache rejects any residual-recovered
/// address that wasn't recently registered from a validated frame.
///
/// A real hash table would chain or probe on collision; this one doesn't —
/// a colliding address simply evicts whatever was in its slot, same as
/// dump1090's `icao_cache`. At 1024 slots and a handful of aircraft in view
/// at once, collisions are rare and an evicted-but-still-active address is
/// re-registered on its next DF11/17 sighting within a few seconds anyway.
pub struct IcaoCache {
    table: Vec<Option<(u32, f64)>>,
    mask: u32,
    ttl: f64,
}

impl IcaoCache {
    pub fn new(ttl: f64) -> Self {
        Self::with_capacity(ttl, DEFAULT_CACHE_LEN)
    }

    pub fn with_capacity(ttl: f64, capacity: usize) -> Self {
        let capacity = capacity.next_power_of_two();
        IcaoCache {
            table: vec![None; capacity],
            mask: (capacity - 1) as u32,
            ttl,
        }
    }

    /// Three rounds of multiplicative xor-shift, same as dump1090's
    /// `ICAOCacheHashAddress`. The third round skips the multiply — it only
    /// needs to finish spreading bits already mixed by the first two.
    fn hash(addr: u32) -> u32 {
        let mut a = addr;
        a = (a >> 16) ^ a;
        a = a.wrapping_mul(0x45D9_F3B);
        a = (a >> 16) ^ a;
        a = a.wrapping_mul(0x45D9_F3B);
        a = (a >> 16) ^ a;
        a
    }

    fn slot(&self, addr: u32) -> usize {
        (Self::hash(addr) & self.mask) as usize
    }

    /// Register a validated ICAO (from DF11/17).
    pub fn register(&mut self, icao: Icao, timestamp: f64) {
        let addr = icao_to_u32(&icao);
        let slot = self.slot(addr);
        self.table[slot] = Some((addr, timestamp));
    }

    /// Check if an ICAO was recently seen in a validated frame.
    pub fn is_known(&self, icao: &Icao, timestamp: f64) -> bool {
        let addr = icao_to_u32(icao);
        match self.table[self.slot(addr)] {
            Some((a, last_seen)) => a == addr && timestamp - last_seen <= self.ttl,
            None => false,
        }
    }

    /// Drop entries older than the TTL.
    pub fn prune(&mut self, now: f64) {
        let ttl = self.ttl;
        for slot in self.table.iter_mut() {
            if let Some((_, last_seen)) = slot {
                if now - *last_seen > ttl {
                    *slot = None;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.table.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.table.iter().all(|s| s.is_none())
    }
}

impl Default for IcaoCache {
    fn default() -> Self {
        IcaoCache::new(60.0)
    }
}

// ---------------------------------------------------------------------------
// ModeFrame
// ---------------------------------------------------------------------------

/// A parsed Mode S frame.
#[derive(Debug, Clone)]
pub struct ModeFrame {
    /// Downlink Format (0-24)
    pub df: u8,
    /// 3-byte ICAO address
    pub icao: Icao,
    /// Full message bytes
    pub raw: Vec<u8>,
    /// Unix timestamp
    pub timestamp: f64,
    /// Signal strength if available
    pub signal_level: Option<f64>,
    /// Message length in bits (56 or 112)
    pub msg_bits: usize,
    /// CRC validation passed
    pub crc_ok: bool,
    /// True if 1- or 2-bit error correction was applied
    pub corrected: bool,
}

impl ModeFrame {
    /// Human-readable Downlink Format name.
    pub fn df_name(&self) -> &'static str {
        df_info(self.df)
            .map(|info| info.name)
            .unwrap_or("Unknown")
    }

    /// True if this is an ADS-B extended squitter (DF17).
    pub fn is_adsb(&self) -> bool {
        self.df == 17
    }

    /// True if this is a 112-bit (long) message.
    pub fn is_long(&self) -> bool {
        self.msg_bits == 112
    }

    /// Message Extended field (bytes 4-10, 56 bits) for DF17/18.
    /// Returns empty slice for short frames.
    pub fn me(&self) -> &[u8] {
        if self.is_long() && self.raw.len() >= 11 {
            &self.raw[4..11]
        } else {
            &[]
        }
    }

    /// ADS-B Type Code (first 5 bits of ME field). None for non-ADS-B.
    pub fn type_code(&self) -> Option<u8> {
        if (self.df != 17 && self.df != 18) || !self.is_long() {
            return None;
        }
        if self.raw.len() < 5 {
            return None;
        }
        Some((self.raw[4] >> 3) & 0x1F)
    }
}

// ---------------------------------------------------------------------------
// Frame parsing
// ---------------------------------------------------------------------------

/// Parse a hex string into a ModeFrame.
///
/// Rejects anything whose DF doesn't match its bit length, and never
/// returns a frame without either a passing CRC or an accepted
/// residual-recovered address.
///
/// `validate_icao`: if true, reject residual-recovered ICAOs not in cache.
/// `aggressive`: if true, also attempt two-bit CRC correction on DF17
/// frames that fail single-bit correction.
pub fn parse_frame(
    hex_str: &str,
    timestamp: f64,
    signal_level: Option<f64>,
    validate_icao: bool,
    aggressive: bool,
    icao_cache: &mut IcaoCache,
) -> Option<ModeFrame> {
    let hex_str = hex_str.trim();

    // Validate length: 14 hex chars (56 bits) or 28 hex chars (112 bits)
    if hex_str.len() != 14 && hex_str.len() != 28 {
        return None;
    }

    let mut raw = hex_decode(hex_str)?;
    let msg_bits = raw.len() * 8;
    let df = (raw[0] >> 3) & 0x1F;

    // Check if DF is recognized and the length matches what's expected for it
    let info = df_info(df)?;
    if msg_bits != info.bits {
        return None;
    }

    let mut corrected = false;

    let (icao, crc_ok) = if DF_EXPLICIT_ICAO.contains(&df) {
        let mut crc_ok = crc::check(&raw, msg_bits);

        // DF11/DF17 get single-bit correction attempts on CRC failure.
        if !crc_ok && (df == 11 || df == 17) {
            if crc::fix_single(&mut raw, msg_bits).is_some() {
                crc_ok = true;
                corrected = true;
            }
        }

        // Two-bit correction is opt-in and restricted to DF17: trying it on
        // DF11 or the altitude/identity formats risks polluting the ICAO
        // cache with a plausible-but-wrong address.
        if !crc_ok && aggressive && df == 17 {
            if crc::fix_two(&mut raw, msg_bits).is_some() {
                crc_ok = true;
                corrected = true;
            }
        }

        let icao: Icao = [raw[1], raw[2], raw[3]];
        if crc_ok && validate_icao {
            icao_cache.register(icao, timestamp);
        }
        (icao, crc_ok)
    } else if DF_RESIDUAL_ICAO.contains(&df) {
        let icao = match crc::brute_force_address(&raw, msg_bits, icao_cache, timestamp) {
            Some(icao) => icao,
            None if !validate_icao => {
                let residual = crc::compute(&raw, msg_bits) ^ crc::extract(&raw, msg_bits);
                crate::types::icao_from_u32(residual & 0xFF_FFFF)
            }
            None => return None,
        };
        (icao, true)
    } else {
        return None;
    };

    Some(ModeFrame {
        df,
        icao,
        raw,
        timestamp,
        signal_level,
        msg_bits,
        crc_ok,
        corrected,
    })
}

/// Parse a hex string without ICAO cache validation.
/// Convenience for decoding standalone frames (e.g., from test vectors).
pub fn parse_frame_uncached(
    hex_str: &str,
    timestamp: f64,
    signal_level: Option<f64>,
) -> Option<ModeFrame> {
    let mut cache = IcaoCache::new(60.0);
    parse_frame(hex_str, timestamp, signal_level, false, false, &mut cache)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{hex_decode, hex_encode, icao_to_string};

    #[test]
    fn test_parse_df17_identification() {
        let frame = parse_frame_uncached("8D4840D6202CC371C32CE0576098", 1.0, None);
        assert!(frame.is_some());
        let frame = frame.unwrap();
        assert_eq!(frame.df, 17);
        assert_eq!(icao_to_string(&frame.icao), "4840D6");
        assert!(frame.crc_ok);
        assert!(!frame.corrected);
        assert_eq!(frame.msg_bits, 112);
        assert!(frame.is_adsb());
        assert!(frame.is_long());
    }

    #[test]
    fn test_parse_df17_position() {
        let frame = parse_frame_uncached("8D40621D58C382D690C8AC2863A7", 1.0, None).unwrap();
        assert_eq!(frame.df, 17);
        assert_eq!(icao_to_string(&frame.icao), "40621D");
        assert!(frame.crc_ok);

        let tc = frame.type_code().unwrap();
        assert!((9..=18).contains(&tc), "TC={tc} should be airborne position");
    }

    #[test]
    fn test_parse_df17_velocity() {
        let frame = parse_frame_uncached("8D485020994409940838175B284F", 1.0, None).unwrap();
        assert_eq!(frame.df, 17);
        assert_eq!(icao_to_string(&frame.icao), "485020");
        assert_eq!(frame.type_code(), Some(19));
    }

    #[test]
    fn test_parse_invalid_length() {
        assert!(parse_frame_uncached("8D4840D6", 0.0, None).is_none());
        assert!(parse_frame_uncached("", 0.0, None).is_none());
    }

    #[test]
    fn test_parse_invalid_hex() {
        assert!(parse_frame_uncached("ZZZZZZZZZZZZZZ", 0.0, None).is_none());
    }

    #[test]
    fn test_me_field() {
        let frame = parse_frame_uncached("8D4840D6202CC371C32CE0576098", 1.0, None).unwrap();
        let me = frame.me();
        assert_eq!(me.len(), 7); // 56 bits = 7 bytes
    }

    #[test]
    fn test_type_code_identification() {
        let frame = parse_frame_uncached("8D4840D6202CC371C32CE0576098", 1.0, None).unwrap();
        let tc = frame.type_code().unwrap();
        assert!((1..=4).contains(&tc), "TC={tc} should be identification");
    }

    #[test]
    fn test_icao_cache() {
        let mut cache = IcaoCache::new(60.0);
        let icao = [0x48, 0x40, 0xD6];

        assert!(!cache.is_known(&icao, 0.0));

        cache.register(icao, 1.0);
        assert!(cache.is_known(&icao, 2.0));

        // After TTL expires
        assert!(!cache.is_known(&icao, 62.0));
    }

    #[test]
    fn test_icao_cache_prune() {
        let mut cache = IcaoCache::new(10.0);
        cache.register([0x01, 0x02, 0x03], 0.0);
        cache.register([0x04, 0x05, 0x06], 5.0);

        assert_eq!(cache.len(), 2);
        cache.prune(12.0);
        assert_eq!(cache.len(), 1); // First entry expired
    }

    #[test]
    fn test_parse_with_icao_validation() {
        let mut cache = IcaoCache::new(60.0);

        // DF17 should succeed without prior cache entry (explicit ICAO)
        let frame = parse_frame(
            "8D4840D6202CC371C32CE0576098",
            1.0,
            None,
            true,
            false,
            &mut cache,
        );
        assert!(frame.is_some());

        // ICAO should now be in cache
        assert!(cache.is_known(&[0x48, 0x40, 0xD6], 2.0));
    }

    #[test]
    fn test_error_correction() {
        // Corrupt a bit in a valid frame (bit 40, well past DF field)
        let mut data = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        data[5] ^= 0x01;
        let corrupted = hex_encode(&data);

        let frame = parse_frame_uncached(&corrupted, 1.0, None);
        assert!(frame.is_some(), "Error correction should fix single-bit error");
        let frame = frame.unwrap();
        assert!(frame.crc_ok);
        assert!(frame.corrected);
    }

    #[test]
    fn test_two_bit_error_requires_aggressive_mode() {
        let mut data = hex_decode("8D4840D6202CC371C32CE0576098").unwrap();
        data[5] ^= 0x01;
        data[7] ^= 0x10;
        let hex = hex_encode(&data);
        let mut cache = IcaoCache::new(60.0);

        assert!(
            parse_frame(&hex, 1.0, None, false, false, &mut cache).is_none(),
            "two-bit corruption should not pass without aggressive mode"
        );
        assert!(
            parse_frame(&hex, 1.0, None, false, true, &mut cache)
                .is_some_and(|f| f.crc_ok && f.corrected),
            "aggressive mode should recover a two-bit DF17 corruption"
        );
    }

    #[test]
    fn test_address_cache_brute_force_df20_after_df11() {
        // S6: a DF11 from AA=AC82EC primes the cache; a subsequent DF20 whose
        // address-XORed CRC resolves to the same address is accepted and its
        // ICAO set accordingly.
        let mut cache = IcaoCache::new(60.0);
        let icao = [0xAC, 0x82, 0xEC];

        let mut df11 = vec![11u8 << 3, icao[0], icao[1], icao[2], 0, 0, 0];
        let crc = crc::compute(&df11, 56);
        df11[4] = ((crc >> 16) & 0xFF) as u8;
        df11[5] = ((crc >> 8) & 0xFF) as u8;
        df11[6] = (crc & 0xFF) as u8;
        let frame = parse_frame(&hex_encode(&df11), 1.0, None, true, false, &mut cache);
        assert!(frame.is_some_and(|f| f.crc_ok && f.icao == icao));

        let mut df20 = [0u8; 14];
        df20[0] = 20 << 3;
        let crc = crc::compute(&df20, 112);
        let xored = crc ^ icao_to_u32(&icao);
        df20[11] = ((xored >> 16) & 0xFF) as u8;
        df20[12] = ((xored >> 8) & 0xFF) as u8;
        df20[13] = (xored & 0xFF) as u8;

        let frame = parse_frame(&hex_encode(&df20), 2.0, None, true, false, &mut cache);
        assert!(frame.is_some(), "DF20 with known address should be accepted");
        assert_eq!(frame.unwrap().icao, icao);
    }

    #[test]
    fn test_residual_icao_rejected_when_unknown() {
        let mut cache = IcaoCache::new(60.0);
        let mut msg = [0u8; 14];
        msg[0] = 20 << 3; // DF20, residual-ICAO
        let crc = crc::compute(&msg, 112);
        msg[11] = ((crc >> 16) & 0xFF) as u8;
        msg[12] = ((crc >> 8) & 0xFF) as u8;
        msg[13] = (crc & 0xFF) as u8;
        let hex = hex_encode(&msg);

        assert!(parse_frame(&hex, 1.0, None, true, false, &mut cache).is_none());
    }
}
