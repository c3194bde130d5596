//! Half-precision detector gain codec.
//!
//! The FPGA stores gain as a 16-bit "binary fraction" value: the high byte is
//! the integer part, the low byte a binary fraction where bit 0 contributes
//! 1/2, bit 1 contributes 1/4, down to bit 7 contributing 1/256. The integer
//! part is rounded, the fraction truncated, matching the behavior the legacy
//! firmware expects (rounding the integral part avoids 1.0 being transmitted
//! as 0.99999999 and read back as 0).

/// Encode a gain in [0, 255.996] to the 16-bit wire value.
pub fn encode_gain(gain: f32) -> u16 {
    // integral part: round away float noise at the 5th decimal, then truncate
    let msb = (((f64::from(gain) * 1e5).round() / 1e5).trunc() as i64 & 0xff) as u16;
    let lsb = (((f64::from(gain) - f64::from(msb)) * 256.0) as i64 & 0xff) as u16;
    (msb << 8) | lsb
}

/// Decode the 16-bit wire value back to a gain.
pub fn decode_gain(raw: u16) -> f32 {
    let msb = (raw >> 8) & 0xff;
    let lsb = raw & 0xff;
    msb as f32 + lsb as f32 / 256.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_value_from_firmware_docs() {
        // 0x01e7 == 1 + 231/256 == 1.90234375
        assert_eq!(decode_gain(0x01e7), 1.902_343_8);
        assert_eq!(encode_gain(1.902_343_75), 0x01e7);
    }

    #[test]
    fn encode_decode_within_one_lsb() {
        let mut g = 0.0f32;
        while g < 255.996 {
            let decoded = decode_gain(encode_gain(g));
            assert!(
                (decoded - g).abs() <= 1.0 / 256.0 + f32::EPSILON,
                "gain {g} decoded as {decoded}"
            );
            g += 0.37;
        }
    }

    #[test]
    fn integral_gains_are_exact() {
        for msb in 0..=255u16 {
            let g = msb as f32;
            assert_eq!(decode_gain(encode_gain(g)), g);
        }
    }

    #[test]
    fn tenth_db_steps_do_not_collapse_to_zero() {
        // The legacy failure mode: 1.0 encoded as 0x00ff instead of 0x0100.
        assert_eq!(encode_gain(1.0), 0x0100);
        assert_eq!(encode_gain(0.999_999), 0x0100);
    }
}
