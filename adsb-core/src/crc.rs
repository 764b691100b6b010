//! CRC-24 validation for Mode S messages.
//!
//! ICAO standard polynomial: x^24 + x^23 + x^22 + ... + x^10 + x^3 + 1
//! Generator: 0xFFF409
//!
//! Unlike a byte-wise table built from the generator polynomial, the table
//! below is the literal 112-entry bit-position constant table from the Mode S
//! standard: each entry is the CRC contribution of a single set bit at that
//! position in the message body. The last 24 entries are zero because the
//! CRC/PI field itself never participates in its own computation.
//!
//! For DF17/18 (ADS-B): the trailing 24 bits are pure CRC. Valid frames have
//! `compute(msg) == extract(msg)`.
//! For DF0/4/5/16/20/21/24: the trailing 24 bits are CRC XOR'd with the
//! aircraft's ICAO address, which `brute_force_address` recovers.

use crate::frame::IcaoCache;
use crate::types::Icao;

#[rustfmt::skip]
pub const MODES_CHECKSUM_TABLE: [u32; 112] = [
    0x3935ea, 0x1c9af5, 0xf1b77e, 0x78dbbf, 0xc397db, 0x9e31e9, 0xb0e2f0, 0x587178,
    0x2c38bc, 0x161c5e, 0x0b0e2f, 0xfa7d13, 0x82c48d, 0xbe9842, 0x5f4c21, 0xd05c14,
    0x682e0a, 0x341705, 0xe5f186, 0x72f8c3, 0xc68665, 0x9cb936, 0x4e5c9b, 0xd8d449,
    0x939020, 0x49c810, 0x24e408, 0x127204, 0x093902, 0x049c81, 0xfdb444, 0x7eda22,
    0x3f6d11, 0xe04c8c, 0x702646, 0x381323, 0xe3f395, 0x8e03ce, 0x4701e7, 0xdc7af7,
    0x91c77f, 0xb719bb, 0xa476d9, 0xadc168, 0x56e0b4, 0x2b705a, 0x15b82d, 0xf52612,
    0x7a9309, 0xc2b380, 0x6159c0, 0x30ace0, 0x185670, 0x0c2b38, 0x06159c, 0x030ace,
    0x018567, 0xff38b7, 0x80665f, 0xbfc92b, 0xa01e91, 0xaff54c, 0x57faa6, 0x2bfd53,
    0xea04ad, 0x8af852, 0x457c29, 0xdd4410, 0x6ea208, 0x375104, 0x1ba882, 0x0dd441,
    0xf91024, 0x7c8812, 0x3e4409, 0xe0d800, 0x706c00, 0x383600, 0x1c1b00, 0x0e0d80,
    0x0706c0, 0x038360, 0x01c1b0, 0x00e0d8, 0x00706c, 0x003836, 0x001c1b, 0xfff409,
    0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000,
    0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000,
    0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000, 0x000000,
];

/// DF formats whose trailing 24 bits are the CRC XOR'd with the ICAO address.
pub const DF_ADDRESS_XORED: &[u8] = &[0, 4, 5, 16, 20, 21, 24];

/// Compute the 24-bit Mode S CRC over `nbits` of `msg` (56 or 112).
///
/// XORs the table entry for each set bit's position. For 56-bit messages the
/// table is addressed from its tail (the last 56 of the 112 entries), since
/// the constants are defined relative to a 112-bit message.
pub fn compute(msg: &[u8], nbits: usize) -> u32 {
    debug_assert!(nbits == 56 || nbits == 112);
    let offset = if nbits == 112 { 0 } else { 112 - 56 };
    let mut crc = 0u32;
    for j in 0..nbits {
        let byte_idx = j / 8;
        let bitmask = 1u8 << (7 - (j % 8));
        if msg[byte_idx] & bitmask != 0 {
            crc ^= MODES_CHECKSUM_TABLE[j + offset];
        }
    }
    crc
}

/// Extract the transmitted 24-bit CRC/PI field (the trailing 3 bytes).
pub fn extract(msg: &[u8], nbits: usize) -> u32 {
    let len = nbits / 8;
    ((msg[len - 3] as u32) << 16) | ((msg[len - 2] as u32) << 8) | (msg[len - 1] as u32)
}

/// `true` iff the computed CRC matches the transmitted field exactly
/// (valid only for DF17/18, whose field is a pure CRC, not address-XORed).
pub fn check(msg: &[u8], nbits: usize) -> bool {
    compute(msg, nbits) == extract(msg, nbits)
}

/// Try flipping each bit in turn, starting from bit 0; on the first flip that
/// makes `check` succeed, leave the message corrected in place and return the
/// bit index. Applied by callers to DF11 and DF17 only.
pub fn fix_single(msg: &mut [u8], nbits: usize) -> Option<usize> {
    for bit in 0..nbits {
        flip_bit(msg, bit);
        if check(msg, nbits) {
            return Some(bit);
        }
        flip_bit(msg, bit);
    }
    None
}

/// Try flipping every unordered pair of bits; on the first pair that makes
/// `check` succeed, leave the message corrected and return `(bit1, bit2)`.
///
/// O(n^2) in `nbits`; only used in aggressive mode, and only for DF17 per the
/// error-handling design (DF0/4/5/16/20/21 are never brute-forced this way,
/// to avoid polluting the ICAO cache with a falsely "recovered" address).
pub fn fix_two(msg: &mut [u8], nbits: usize) -> Option<(usize, usize)> {
    for j in 0..nbits {
        flip_bit(msg, j);
        for i in (j + 1)..nbits {
            flip_bit(msg, i);
            if check(msg, nbits) {
                return Some((j, i));
            }
            flip_bit(msg, i);
        }
        flip_bit(msg, j);
    }
    None
}

fn flip_bit(msg: &mut [u8], bit: usize) {
    msg[bit / 8] ^= 1 << (7 - (bit % 8));
}

/// Recover the ICAO address for an address-XORed DF by XORing the computed
/// CRC with the transmitted field, and accept it only if it is a recently
/// seen address (DF11/DF17 cache hit). Fills nothing directly; the caller
/// installs the returned address into the decoded message's AA field.
pub fn brute_force_address(msg: &[u8], nbits: usize, cache: &IcaoCache, now: f64) -> Option<Icao> {
    let df = (msg[0] >> 3) & 0x1F;
    if !DF_ADDRESS_XORED.contains(&df) {
        return None;
    }
    let addr = compute(msg, nbits) ^ extract(msg, nbits);
    if addr == 0 || addr > 0xFF_FFFF {
        return None;
    }
    let icao = crate::types::icao_from_u32(addr);
    if cache.is_known(&icao, now) {
        Some(icao)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
