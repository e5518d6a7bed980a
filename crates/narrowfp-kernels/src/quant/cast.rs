//! Bit-exact conversion between source floats and narrow codes.
//!
//! Both directions work on the integer representation only: fields are
//! pulled out with shifts and masks, the significand is normalized so its
//! leading one sits at a known position, and the exponent is re-biased.
//! Values below the narrow format's normal range are handled by the same
//! rounding step as normal values, with a larger drop count.

use super::format::{NarrowCode, NumericFormat};
use crate::element::SourceFloat;

/// Encode `x` in `format`.
///
/// With `dither == None` the mantissa is rounded to nearest, ties to even.
/// With `Some(r)` the low bits of `r` are added to the discarded bits and
/// the result truncated, so the probability of rounding up equals the
/// discarded fraction.
///
/// Finite values beyond the format's range saturate at its largest finite
/// magnitude; values below half its smallest subnormal become a signed zero.
/// Infinities and NaN map to the reserved all-ones exponent. Unsigned
/// formats clamp negative inputs to zero.
pub fn cast_to_narrow<T: SourceFloat>(
    x: T,
    format: NumericFormat,
    dither: Option<u32>,
) -> NarrowCode {
    let raw = x.to_raw();
    let negative = T::sign_field(raw) == 1;
    let exponent = T::exponent_field(raw);
    let mantissa = T::mantissa_field(raw);
    let wm = format.mantissa_bits();

    if exponent == T::exponent_mask() {
        if mantissa != 0 {
            let quiet = if wm > 0 { 1 << (wm - 1) } else { 0 };
            return pack(format, negative, format.infinity_magnitude() | quiet);
        }
        if negative && !format.has_sign() {
            return NarrowCode(0);
        }
        return pack(format, negative, format.infinity_magnitude());
    }
    if negative && !format.has_sign() {
        return NarrowCode(0);
    }
    if exponent == 0 && mantissa == 0 {
        return pack(format, negative, 0);
    }

    let (sig, act) = normalize(exponent, mantissa, T::MANTISSA_BITS, T::BIAS);

    // Extra right shift for results below the narrow normal range.
    let shift = (format.min_exponent() - act).max(0) as u32;
    let drop = (T::MANTISSA_BITS - wm + shift).min(63);
    let (mut kept, rem, mask) = split(u64::from(sig), drop);

    let round_up = match dither {
        Some(r) => rem + widen_dither(r, drop, mask) > mask,
        None => rounds_to_nearest_even_up(kept, rem, drop),
    };
    kept += u64::from(round_up);

    // `kept` still carries the implicit one when normal, so adding it to
    // `(biased exponent - 1) << wm` yields the code and absorbs a mantissa
    // carry into the exponent field. Subnormals have a biased exponent of 0.
    let exponent_code = (act + shift as i32 + format.bias() - 1) as u64;
    let magnitude = ((exponent_code << wm) + kept).min(u64::from(format.max_magnitude()));

    pack(format, negative, magnitude as u32)
}

/// Decode `code` back into the source type.
///
/// Exact whenever the narrow value is representable in `T`; narrow values
/// above `T`'s range saturate at its largest finite value and values below
/// it are rounded to nearest even among `T`'s subnormals.
pub fn cast_from_narrow<T: SourceFloat>(code: NarrowCode, format: NumericFormat) -> T {
    let sign = u32::from(code.is_negative(&format));
    let magnitude = code.magnitude(&format);
    let wm = format.mantissa_bits();
    let m_s = T::MANTISSA_BITS;
    let exponent = magnitude >> wm;
    let fraction = magnitude & format.mantissa_mask();

    if exponent == format.exponent_mask() {
        let mantissa = if fraction == 0 { 0 } else { (1 << (m_s - 1)) | (fraction << (m_s - wm)) };
        return T::from_raw(T::assemble(sign, T::exponent_mask(), mantissa));
    }
    if magnitude == 0 {
        return T::from_raw(T::assemble(sign, 0, 0));
    }

    let (sig, act) = if exponent == 0 {
        let norm = wm - (31 - fraction.leading_zeros());
        (fraction << norm, format.min_exponent() - norm as i32)
    } else {
        (fraction | (1 << wm), exponent as i32 - format.bias())
    };

    let biased = act + T::BIAS;
    if biased >= T::exponent_mask() as i32 {
        return T::from_raw(T::assemble(sign, T::exponent_mask() - 1, T::mantissa_mask()));
    }

    let wide = u64::from(sig) << (m_s - wm);
    if biased >= 1 {
        return T::from_raw(T::assemble(sign, biased as u32, wide as u32));
    }

    let drop = ((1 - biased) as u32).min(63);
    let (mut kept, rem, _) = split(wide, drop);
    kept += u64::from(rounds_to_nearest_even_up(kept, rem, drop));
    // A carry out of the subnormal range lands in the exponent field.
    T::from_raw((sign << (T::BITS - 1)) | kept as u32)
}

/// Encode-then-decode, the value a quantizing kernel writes back.
#[inline]
pub fn quantize_value<T: SourceFloat>(x: T, format: NumericFormat, dither: Option<u32>) -> T {
    cast_from_narrow(cast_to_narrow(x, format, dither), format)
}

/// Significand with its leading one at bit `mantissa_bits`, and the unbiased exponent.
#[inline]
fn normalize(exponent: u32, mantissa: u32, mantissa_bits: u32, bias: i32) -> (u32, i32) {
    if exponent == 0 {
        let norm = mantissa_bits - (31 - mantissa.leading_zeros());
        (mantissa << norm, 1 - bias - norm as i32)
    } else {
        (mantissa | (1 << mantissa_bits), exponent as i32 - bias)
    }
}

/// Scale a 32-bit dither to `drop` discarded bits. Below 32 bits the high
/// bits are ignored; above, `r` fills the top 32 bits and the rest are set
/// so that `u32::MAX` still rounds every nonzero remainder up.
#[inline]
fn widen_dither(r: u32, drop: u32, mask: u64) -> u64 {
    if drop <= 32 {
        u64::from(r) & mask
    } else {
        let pad = drop - 32;
        (u64::from(r) << pad) | ((1u64 << pad) - 1)
    }
}

/// `(value >> drop, discarded bits, discarded mask)`.
#[inline]
fn split(value: u64, drop: u32) -> (u64, u64, u64) {
    let mask = (1u64 << drop) - 1;
    (value >> drop, value & mask, mask)
}

#[inline]
fn rounds_to_nearest_even_up(kept: u64, rem: u64, drop: u32) -> bool {
    if drop == 0 {
        return false;
    }
    let half = 1u64 << (drop - 1);
    rem > half || (rem == half && kept & 1 == 1)
}

#[inline]
fn pack(format: NumericFormat, negative: bool, magnitude: u32) -> NarrowCode {
    let sign = u32::from(negative && format.has_sign()) << format.sign_shift();
    NarrowCode((sign | magnitude) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use half::f16;

    fn fmt(we: u32, wm: u32) -> NumericFormat {
        NumericFormat::new(we, wm, true).unwrap()
    }

    #[test]
    fn test_e4m3_known_values() {
        let f = fmt(4, 3);
        assert_eq!(cast_to_narrow(1.0f32, f, None), NarrowCode(0x38));
        // halfway between 1.0 and 1.125, ties to even
        assert_eq!(cast_to_narrow(1.0625f32, f, None), NarrowCode(0x38));
        assert_eq!(cast_to_narrow(1.125f32, f, None), NarrowCode(0x39));
        assert_eq!(cast_to_narrow(-0.0f32, f, None), NarrowCode(0x80));
    }

    #[test]
    fn test_saturates_instead_of_overflowing() {
        let f = fmt(4, 3);
        let max = cast_from_narrow::<f32>(NarrowCode(f.max_magnitude() as u16), f);
        assert_eq!(max, 240.0);
        assert_eq!(quantize_value(1.0e6f32, f, None), 240.0);
        assert_eq!(quantize_value(-1.0e6f32, f, None), -240.0);
    }

    #[test]
    fn test_subnormals_and_underflow() {
        let f = fmt(4, 3);
        // smallest subnormal of e4m3 is 2^-9
        assert_eq!(cast_to_narrow(2f32.powi(-9), f, None), NarrowCode(0x01));
        assert_eq!(quantize_value(2f32.powi(-10), f, None), 0.0);
        assert_eq!(quantize_value(3.0 * 2f32.powi(-11), f, None), 2f32.powi(-9));
        let neg = quantize_value(-2f32.powi(-12), f, None);
        assert_eq!(neg, 0.0);
        assert!(neg.is_sign_negative());
    }

    #[test]
    fn test_special_values_survive() {
        let f = fmt(5, 2);
        assert_eq!(quantize_value(f32::INFINITY, f, None), f32::INFINITY);
        assert_eq!(quantize_value(f32::NEG_INFINITY, f, None), f32::NEG_INFINITY);
        assert!(quantize_value(f32::NAN, f, None).is_nan());
        assert!(quantize_value(f16::NAN, f, Some(12345)).is_nan());
    }

    #[test]
    fn test_unsigned_clamps_negatives() {
        let f = NumericFormat::new(4, 3, false).unwrap();
        assert_eq!(cast_to_narrow(-3.0f32, f, None), NarrowCode(0));
        assert_eq!(cast_to_narrow(f32::NEG_INFINITY, f, None), NarrowCode(0));
        assert_eq!(quantize_value(3.0f32, f, None), 3.0);
    }

    #[test]
    fn test_e5m2_matches_truncated_half() {
        let f = fmt(5, 2);
        for bits in 0u16..0x7C00 {
            let x = f16::from_bits(bits);
            let mut kept = bits >> 8;
            let rem = bits & 0xFF;
            if rem > 0x80 || (rem == 0x80 && kept & 1 == 1) {
                kept += 1;
            }
            let expected = kept.min(f.max_magnitude() as u16);
            assert_eq!(cast_to_narrow(x, f, None), NarrowCode(expected), "bits {bits:#06x}");
        }
    }

    #[test]
    fn test_dither_extremes() {
        let f = fmt(4, 3);
        let x = 1.0625f32;
        assert_eq!(quantize_value(x, f, Some(0)), 1.0);
        assert_eq!(quantize_value(x, f, Some(u32::MAX)), 1.125);
        // exactly representable values never move
        assert_eq!(quantize_value(1.125f32, f, Some(u32::MAX)), 1.125);
    }

    #[test]
    fn test_dither_far_below_subnormal_range() {
        let f = fmt(4, 3);
        let tiny = 2.0f32.powi(-30);
        assert_eq!(quantize_value(tiny, f, Some(0)), 0.0);
        assert_eq!(quantize_value(tiny, f, Some(u32::MAX)), 2.0f32.powi(-9));
        assert_eq!(quantize_value(-tiny, f, Some(u32::MAX)), -(2.0f32.powi(-9)));
    }

    #[test]
    fn test_decode_saturates_to_source_range() {
        let f = fmt(8, 3);
        let huge = NarrowCode(((200u32 << 3) | 5) as u16);
        assert_eq!(cast_from_narrow::<f16>(huge, f), f16::MAX);
        let tiny = NarrowCode((100u32 << 3) as u16);
        assert_eq!(cast_from_narrow::<f16>(tiny, f), f16::ZERO);
    }
}
