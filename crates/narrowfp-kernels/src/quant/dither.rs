//! Stateless per-element dither for stochastic rounding.
//!
//! The value for element `i` is a cheap integer hash of the element's own
//! bit pattern, combined by xor with a fixed nonce, `i` times a large odd
//! multiplier, and the launch seed. Same `(i, seed, raw)` always gives the
//! same value.
//!
//! Rounding only reads the low `drop` bits of the dither, where `drop` is
//! the number of source mantissa bits discarded. For a run of identical
//! source values the hash term is constant, and the low `drop` bits of
//! `i * INDEX_MULTIPLIER` depend only on `i mod 2^drop`, so the up/down
//! decisions repeat exactly every `2^drop` indices (128 for binary16 into
//! e4m3). Within one period the odd multiplier visits every residue once,
//! which keeps the decisions balanced.

/// Xor-ed into every dither value.
pub const DITHER_NONCE: u32 = 0x1337_1337;
/// Odd multiplier decorrelating neighbouring indices.
pub const INDEX_MULTIPLIER: u32 = 229_791;
/// Odd multiplier of the bit-pattern hash.
pub const HASH_MULTIPLIER: u32 = 0x0700_0149;

/// Dither value for element `index` with raw bit pattern `raw` taken from a
/// `source_bits`-wide source element.
#[inline]
pub fn dither(index: u32, seed: u32, raw: u32, source_bits: u32) -> u32 {
    let mut d = raw & 0xFFFF;
    if source_bits > 16 {
        d ^= raw >> 16;
    }
    // rotate the 16-bit fold left by 11
    d = ((d & 31) << 11) | (d >> 5);
    d = d.wrapping_mul(HASH_MULTIPLIER);
    d ^ DITHER_NONCE ^ index.wrapping_mul(INDEX_MULTIPLIER) ^ seed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let a = dither(17, 0xDEAD_BEEF, 0x3C00, 16);
        let b = dither(17, 0xDEAD_BEEF, 0x3C00, 16);
        assert_eq!(a, b);
    }

    #[test]
    fn test_high_half_only_matters_for_wide_sources() {
        assert_eq!(dither(3, 9, 0x1234_3C00, 16), dither(3, 9, 0x0000_3C00, 16));
        assert_ne!(dither(3, 9, 0x1234_3C00, 32), dither(3, 9, 0x0000_3C00, 32));
    }

    #[test]
    fn test_reseeding_changes_every_element() {
        let raw = 1.5f32.to_bits();
        for i in 0..1024 {
            assert_ne!(dither(i, 1, raw, 32), dither(i, 2, raw, 32));
        }
    }

    #[test]
    fn test_neighbours_differ() {
        let raw = 0x3555;
        let mut flips = 0u32;
        for i in 0..4096u32 {
            flips += (dither(i, 7, raw, 16) ^ dither(i + 1, 7, raw, 16)).count_ones();
        }
        let mean = f64::from(flips) / 4096.0;
        assert!(mean > 6.0, "adjacent dither values too similar: {mean} bits differ");
    }
}
