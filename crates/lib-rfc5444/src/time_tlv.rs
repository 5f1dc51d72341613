//! RFC 5497 time value compression.
//!
//! An 8-bit field `(b << 3) | a` represents `(1 + a/8) * 2^b * C` seconds
//! with the default constant C = 1/1024 s. Used for the INTERVAL_TIME and
//! VALIDITY_TIME TLVs of HELLO and TC messages.

/// Largest representable interval in milliseconds, ~45 days.
pub const TIME_MAX: u64 = decode(0xff);

/// Smallest representable interval (rounds to zero at millisecond
/// precision).
pub const TIME_MIN: u64 = decode(0x00);

/// Decode an RFC 5497 time value into milliseconds.
pub const fn decode(encoded: u8) -> u64 {
    let a = (encoded & 0x07) as u64;
    let b = (encoded >> 3) as u64;
    // (8 + a) * 2^b / 8 / 1024 seconds
    ((8 + a) << b) * 1000 / 8192
}

/// Encode a millisecond interval, rounding up so a decoded validity never
/// undershoots the requested one.
pub fn encode(ms: u64) -> u8 {
    if ms <= TIME_MIN {
        return 0;
    }
    if ms >= TIME_MAX {
        return 0xff;
    }
    for encoded in 1..=0xffu8 {
        if decode(encoded) >= ms {
            return encoded;
        }
    }
    0xff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_known_points() {
        // a=0, b=13: 2^13/1024 = 8 seconds
        assert_eq!(decode(13 << 3), 8_000);
        // a=4, b=12: 1.5 * 4 seconds
        assert_eq!(decode((12 << 3) | 4), 6_000);
        assert_eq!(decode(0), TIME_MIN);
    }

    #[test]
    fn encode_rounds_up() {
        for ms in [1_000u64, 2_000, 6_000, 15_000, 300_000] {
            let encoded = encode(ms);
            assert!(decode(encoded) >= ms);
            if encoded > 0 {
                assert!(decode(encoded - 1) < ms);
            }
        }
    }

    #[test]
    fn roundtrip_idempotent() {
        // below b=4 the millisecond grid cannot distinguish neighboring
        // codes, so start where decoding is injective
        for encoded in (4 << 3)..=0xffu8 {
            assert_eq!(encode(decode(encoded)), encoded);
        }
    }
}
