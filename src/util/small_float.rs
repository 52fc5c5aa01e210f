//! One-byte floating point encoding for length norms.
//!
//! The byte keeps 3 mantissa bits and 5 exponent bits with the zero exponent
//! at 15, which covers roughly `5.8e-10..7.5e9` with about one significant
//! decimal digit. Values too small to represent round up to the smallest
//! positive byte; zero and negatives map to 0.

const MANTISSA_BITS: u32 = 3;
const ZERO_EXPONENT: i32 = 15;
const FLOOR: i32 = (63 - ZERO_EXPONENT) << MANTISSA_BITS;

/// Encode a float into one byte, rounding toward zero.
pub fn encode_norm(value: f32) -> u8 {
    let bits = value.to_bits() as i32;
    let small = bits >> (24 - MANTISSA_BITS);

    if small <= FLOOR {
        return if bits <= 0 { 0 } else { 1 };
    }
    if small >= FLOOR + 0x100 {
        return u8::MAX;
    }
    (small - FLOOR) as u8
}

/// Decode a byte produced by [`encode_norm`].
pub fn decode_norm(byte: u8) -> f32 {
    if byte == 0 {
        return 0.0;
    }
    let mut bits = (byte as u32) << (24 - MANTISSA_BITS);
    bits += ((63 - ZERO_EXPONENT) as u32) << 24;
    f32::from_bits(bits)
}
