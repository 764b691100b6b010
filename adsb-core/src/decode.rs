//! Decode Mode S frames into typed aircraft messages.
//!
//! Handles all Downlink Formats and ADS-B Type Codes:
//! - DF17 TC 1-4:  Aircraft identification (callsign)
//! - DF17 TC 9-18: Airborne position (barometric alt + CPR-encoded lat/lon)
//! - DF17 TC 19:   Airborne velocity (ground speed or airspeed + heading)
//! - DF17 TC 20-22: Airborne position (GNSS altitude)
//! - DF4/20:       Surveillance/Comm-B altitude reply
//! - DF5/21:       Surveillance/Comm-B identity reply (squawk)
//! - DF11:         All-call reply (ICAO address acquisition)

use crate::frame::ModeFrame;
use crate::types::*;

// ---------------------------------------------------------------------------
// Altitude decoding
// ---------------------------------------------------------------------------

/// Decode 12-bit altitude code from DF17 airborne position.
///
/// The Q-bit (bit 4) selects the encoding mode:
/// - Q=1: 25-ft resolution
/// - Q=0: 100-ft Gillham gray code
pub fn decode_altitude(alt_code: u32) -> Option<i32> {
    if alt_code == 0 {
        return None;
    }

    let q_bit = (alt_code >> 4) & 1;

    if q_bit == 1 {
        // 25-ft resolution mode: remove Q-bit to get 11-bit code
        let n = ((alt_code >> 5) << 4) | (alt_code & 0x0F);
        Some((n as i32 * 25 - 1000).max(0))
    } else {
        decode_gillham_altitude(alt_code)
    }
}

/// Decode 100-ft Gillham gray code altitude.
///
/// Ported from dump1090's ModeA-to-ModeC conversion.
fn decode_gillham_altitude(alt_code: u32) -> Option<i32> {
    // Extract individual bits from interleaved positions
    let c1 = (alt_code >> 12) & 1;
    let a1 = (alt_code >> 11) & 1;
    let c2 = (alt_code >> 10) & 1;
    let a2 = (alt_code >> 9) & 1;
    let c4 = (alt_code >> 8) & 1;
    let a4 = (alt_code >> 7) & 1;
    // bit 6 = M (metric, should be 0)
    let b1 = (alt_code >> 5) & 1;
    // bit 4 = Q (should be 0 if we got here)
    let b2 = (alt_code >> 3) & 1;
    let d2 = (alt_code >> 2) & 1;
    let b4 = (alt_code >> 1) & 1;
    let d4 = alt_code & 1;
    let d1 = 0u32; // Not transmitted in Mode S

    // Mode A octal digits
    let _a_digit = a4 * 4 + a2 * 2 + a1;
    let _b_digit = b4 * 4 + b2 * 2 + b1;
    let c_digit = c4 * 4 + c2 * 2 + c1;
    let _d_digit = d4 * 4 + d2 * 2 + d1;

    // 100-ft component from C digit (Gray code)
    let mut c_bin = c_digit;
    c_bin ^= c_bin >> 2;
    c_bin ^= c_bin >> 1;

    if c_bin == 0 || c_bin == 6 || c_bin > 6 {
        return None;
    }

    // 500-ft component: Gray code from combined A and B digits
    let ab_gray = (a4 * 4 + a2 * 2 + a1) << 3 | (b4 * 4 + b2 * 2 + b1);
    let mut ab_bin = ab_gray;
    ab_bin ^= ab_bin >> 4;
    ab_bin ^= ab_bin >> 2;
    ab_bin ^= ab_bin >> 1;

    let altitude = ab_bin as i32 * 500 + c_bin as i32 * 100 - 1200;

    if !(-1200..=126750).contains(&altitude) {
        return None;
    }

    Some(altitude)
}

/// Decode 13-bit altitude code from DF0/4/16/20.
///
/// M-bit and Q-bit select the mode:
/// - M=0, Q=1: 25-ft increments
/// - M=0, Q=0: 100-ft Gillham gray code
/// - M=1: metric altitude (rare, not implemented)
pub fn decode_altitude_13bit(alt_code_13: u32) -> Option<i32> {
    if alt_code_13 == 0 {
        return None;
    }

    let m_bit = (alt_code_13 >> 6) & 1;
    let q_bit = (alt_code_13 >> 4) & 1;

    if m_bit == 1 {
        return None; // Metric altitude — very rare
    }

    if q_bit == 1 {
        // 25-ft mode: remove M and Q bits to get 11-bit code
        let n =
            ((alt_code_13 & 0x1F80) >> 2) | ((alt_code_13 & 0x0020) >> 1) | (alt_code_13 & 0x000F);
        Some((n as i32 * 25 - 1000).max(0))
    } else {
        decode_gillham_altitude(alt_code_13)
    }
}

// ---------------------------------------------------------------------------
// Squawk decoding
// ---------------------------------------------------------------------------

/// Decode 13-bit identity code into 4-digit octal squawk.
///
/// Bits are labeled C1 A1 C2 A2 C4 A4 _ B1 D1 B2 D2 B4 D4
pub fn decode_squawk(id_code: u32) -> String {
    let c1 = (id_code >> 12) & 1;
    let a1 = (id_code >> 11) & 1;
    let c2 = (id_code >> 10) & 1;
    let a2 = (id_code >> 9) & 1;
    let c4 = (id_code >> 8) & 1;
    let a4 = (id_code >> 7) & 1;
    // bit 6 is spare (SPI)
    let b1 = (id_code >> 5) & 1;
    let d1 = (id_code >> 4) & 1;
    let b2 = (id_code >> 3) & 1;
    let d2 = (id_code >> 2) & 1;
    let b4 = (id_code >> 1) & 1;
    let d4 = id_code & 1;

    let a = a4 * 4 + a2 * 2 + a1;
    let b = b4 * 4 + b2 * 2 + b1;
    let c = c4 * 4 + c2 * 2 + c1;
    let d = d4 * 4 + d2 * 2 + d1;

    format!("{a}{b}{c}{d}")
}

// ---------------------------------------------------------------------------
// Main decode functions
// ---------------------------------------------------------------------------

/// Decode TC 1-4: Aircraft identification (callsign).
pub fn decode_identification(frame: &ModeFrame) -> Option<IdentificationMsg> {
    let tc = frame.type_code()?;
    if !(1..=4).contains(&tc) {
        return None;
    }

    let me = frame.me();
    if me.len() < 7 {
        return None;
    }

    let category = me[0] & 0x07;

    // Decode 8 callsign characters (6 bits each, packed into 48 bits)
    let bits = u64::from_be_bytes({
        let mut buf = [0u8; 8];
        buf[1..8].copy_from_slice(me);
        buf
    });

    let mut callsign = String::with_capacity(8);
    for i in 0..8 {
        let idx = ((bits >> (42 - i * 6)) & 0x3F) as usize;
        if idx < CALLSIGN_CHARSET.len() {
            callsign.push(CALLSIGN_CHARSET[idx] as char);
        } else {
            callsign.push(' ');
        }
    }

    Some(IdentificationMsg {
        icao: frame.icao,
        callsign,
        category,
        timestamp: frame.timestamp,
    })
}

/// Decode TC 5-8 (surface) or TC 9-18/20-22 (airborne position).
pub fn decode_position(frame: &ModeFrame) -> Option<PositionMsg> {
    let tc = frame.type_code()?;

    let is_surface = (5..=8).contains(&tc);
    let is_airborne_baro = (9..=18).contains(&tc);
    let is_airborne_gnss = (20..=22).contains(&tc);

    if !is_surface && !is_airborne_baro && !is_airborne_gnss {
        return None;
    }

    let me = frame.me();
    if me.len() < 7 {
        return None;
    }

    let bits = u64::from_be_bytes({
        let mut buf = [0u8; 8];
        buf[1..8].copy_from_slice(me);
        buf
    });

    let ss = ((bits >> 49) & 0x03) as u8;

    let altitude_ft = if is_airborne_baro || is_airborne_gnss {
        let alt_code = ((bits >> 36) & 0x0FFF) as u32;
        decode_altitude(alt_code)
    } else {
        None
    };

    let cpr_odd = ((bits >> 34) & 1) == 1;
    let cpr_lat = ((bits >> 17) & 0x1FFFF) as u32;
    let cpr_lon = (bits & 0x1FFFF) as u32;

    Some(PositionMsg {
        icao: frame.icao,
        altitude_ft,
        cpr_lat,
        cpr_lon,
        cpr_odd,
        surveillance_status: ss,
        timestamp: frame.timestamp,
        is_surface,
    })
}

/// Decode TC 19: Airborne velocity.
pub fn decode_velocity(frame: &ModeFrame) -> Option<VelocityMsg> {
    if frame.type_code()? != 19 {
        return None;
    }

    let me = frame.me();
    if me.len() < 7 {
        return None;
    }

    let bits = u64::from_be_bytes({
        let mut buf = [0u8; 8];
        buf[1..8].copy_from_slice(me);
        buf
    });

    let subtype = ((bits >> 48) & 0x07) as u8;

    match subtype {
        1 | 2 => Some(decode_ground_velocity(frame.icao, bits, frame.timestamp)),
        3 | 4 => Some(decode_airspeed(frame.icao, bits, subtype, frame.timestamp)),
        _ => None,
    }
}

fn decode_ground_velocity(icao: Icao, bits: u64, timestamp: f64) -> VelocityMsg {
    let ew_dir = (bits >> 42) & 1; // 0=East, 1=West
    let ew_vel = ((bits >> 32) & 0x3FF) as i32 - 1;
    let ns_dir = (bits >> 31) & 1; // 0=North, 1=South
    let ns_vel = ((bits >> 21) & 0x3FF) as i32 - 1;

    let vr_sign = (bits >> 19) & 1; // 0=up, 1=down
    let vr_val = ((bits >> 10) & 0x1FF) as i32 - 1;

    let (speed, heading) = if ew_vel >= 0 && ns_vel >= 0 {
        let vx = if ew_dir == 1 { -ew_vel } else { ew_vel } as f64;
        let vy = if ns_dir == 1 { -ns_vel } else { ns_vel } as f64;
        let spd = (vx * vx + vy * vy).sqrt();
        // Zero ground speed is a legitimate report; heading is undefined then.
        let hdg = (spd > 0.0).then(|| round2(vx.atan2(vy).to_degrees().rem_euclid(360.0)));
        (Some(round2(spd)), hdg)
    } else {
        (None, None)
    };

    let vrate = if vr_val >= 0 {
        let rate = vr_val * 64;
        Some(if vr_sign == 1 { -rate } else { rate })
    } else {
        None
    };

    VelocityMsg {
        icao,
        speed_kts: speed,
        heading_deg: heading,
        vertical_rate_fpm: vrate,
        speed_type: SpeedType::Ground,
        timestamp,
    }
}

fn decode_airspeed(icao: Icao, bits: u64, _subtype: u8, timestamp: f64) -> VelocityMsg {
    let hdg_available = (bits >> 42) & 1;
    let hdg_raw = ((bits >> 32) & 0x3FF) as u32;

    let speed_type_bit = (bits >> 31) & 1; // 0=IAS, 1=TAS
    let speed_raw = ((bits >> 21) & 0x3FF) as i32;

    let vr_sign = (bits >> 10) & 1;
    let vr_val = ((bits >> 1) & 0x1FF) as i32 - 1;

    let heading = if hdg_available == 1 {
        Some(round2(hdg_raw as f64 * 360.0 / 1024.0))
    } else {
        None
    };

    let speed = if speed_raw > 0 {
        Some((speed_raw - 1) as f64)
    } else {
        None
    };

    let vrate = if vr_val >= 0 {
        let rate = vr_val * 64;
        Some(if vr_sign == 1 { -rate } else { rate })
    } else {
        None
    };

    VelocityMsg {
        icao,
        speed_kts: speed,
        heading_deg: heading,
        vertical_rate_fpm: vrate,
        speed_type: if speed_type_bit == 1 {
            SpeedType::TAS
        } else {
            SpeedType::IAS
        },
        timestamp,
    }
}

/// Decode DF0/4/16/20: altitude from surveillance replies.
pub fn decode_df_altitude(frame: &ModeFrame) -> Option<AltitudeMsg> {
    if !matches!(frame.df, 0 | 4 | 16 | 20) {
        return None;
    }

    if frame.raw.len() < 4 {
        return None;
    }

    let alt_code = ((frame.raw[2] as u32 & 0x1F) << 8) | frame.raw[3] as u32;
    let altitude_ft = decode_altitude_13bit(alt_code);

    Some(AltitudeMsg {
        icao: frame.icao,
        altitude_ft,
        timestamp: frame.timestamp,
    })
}

/// Decode DF5/21: identity (squawk) from surveillance replies.
pub fn decode_df_squawk(frame: &ModeFrame) -> Option<SquawkMsg> {
    if !matches!(frame.df, 5 | 21) {
        return None;
    }

    if frame.raw.len() < 4 {
        return None;
    }

    let id_code = ((frame.raw[2] as u32 & 0x1F) << 8) | frame.raw[3] as u32;
    let squawk = decode_squawk(id_code);

    Some(SquawkMsg {
        icao: frame.icao,
        squawk,
        timestamp: frame.timestamp,
    })
}

/// Decode any ModeFrame into the appropriate typed message.
///
/// Routes to the correct decoder based on DF and TC.
pub fn decode(frame: &ModeFrame) -> Option<DecodedMsg> {
    if !frame.crc_ok {
        return None;
    }

    match frame.df {
        17 | 18 => {
            let tc = frame.type_code()?;
            match tc {
                1..=4 => decode_identification(frame).map(DecodedMsg::Identification),
                5..=18 | 20..=22 => decode_position(frame).map(DecodedMsg::Position),
                19 => decode_velocity(frame).map(DecodedMsg::Velocity),
                _ => None,
            }
        }
        0 | 4 | 16 | 20 => decode_df_altitude(frame).map(DecodedMsg::Altitude),
        5 | 21 => decode_df_squawk(frame).map(DecodedMsg::Squawk),
        _ => None,
    }
}

/// Round to 2 decimal places.
fn round2(val: f64) -> f64 {
    (val * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
