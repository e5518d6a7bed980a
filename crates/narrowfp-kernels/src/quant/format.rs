//! Narrow floating-point encodings.

use std::fmt;

use narrowfp_common::FormatError;

/// Largest exponent width a narrow format may have.
pub const MAX_EXPONENT_BITS: u32 = 8;
/// Largest mantissa width a narrow format may have.
pub const MAX_MANTISSA_BITS: u32 = 7;

/// A narrow float encoding `(we, wm, has_sign)` nested inside a wider source float.
///
/// The all-ones exponent is reserved for infinity and NaN; finite values
/// saturate at [`NumericFormat::max_magnitude`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NumericFormat {
    exponent_bits: u32,
    mantissa_bits: u32,
    has_sign: bool,
}

impl NumericFormat {
    /// Build a format, checking `1 <= we <= 8` and `wm <= 7`.
    pub fn new(
        exponent_bits: u32,
        mantissa_bits: u32,
        has_sign: bool,
    ) -> Result<Self, FormatError> {
        if !(1..=MAX_EXPONENT_BITS).contains(&exponent_bits) {
            return Err(FormatError::ExponentWidth(exponent_bits));
        }
        if mantissa_bits > MAX_MANTISSA_BITS {
            return Err(FormatError::MantissaWidth(mantissa_bits));
        }
        Ok(Self { exponent_bits, mantissa_bits, has_sign })
    }

    /// Unchecked constructor for the compiled-in variants.
    pub(crate) const fn from_parts(exponent_bits: u32, mantissa_bits: u32, has_sign: bool) -> Self {
        Self { exponent_bits, mantissa_bits, has_sign }
    }

    /// [`NumericFormat::new`] plus the nesting check `we + wm + 1 <= source_bits`.
    pub fn for_source(
        exponent_bits: u32,
        mantissa_bits: u32,
        has_sign: bool,
        source_bits: u32,
    ) -> Result<Self, FormatError> {
        let format = Self::new(exponent_bits, mantissa_bits, has_sign)?;
        format.check_fits(source_bits)?;
        Ok(format)
    }

    pub fn check_fits(&self, source_bits: u32) -> Result<(), FormatError> {
        let needed = self.exponent_bits + self.mantissa_bits + 1;
        if needed > source_bits {
            return Err(FormatError::TooWide { needed, source_bits });
        }
        Ok(())
    }

    pub const fn exponent_bits(&self) -> u32 {
        self.exponent_bits
    }

    pub const fn mantissa_bits(&self) -> u32 {
        self.mantissa_bits
    }

    pub const fn has_sign(&self) -> bool {
        self.has_sign
    }

    /// `2^(we-1) - 1`.
    pub const fn bias(&self) -> i32 {
        (1 << (self.exponent_bits - 1)) - 1
    }

    /// Smallest normal exponent, `1 - bias`.
    pub const fn min_exponent(&self) -> i32 {
        1 - self.bias()
    }

    /// Largest finite exponent; the all-ones field is reserved.
    pub const fn max_exponent(&self) -> i32 {
        ((1 << self.exponent_bits) - 2) - self.bias()
    }

    pub(crate) const fn exponent_mask(&self) -> u32 {
        (1 << self.exponent_bits) - 1
    }

    pub(crate) const fn mantissa_mask(&self) -> u32 {
        (1 << self.mantissa_bits) - 1
    }

    /// Position of the sign bit inside a [`NarrowCode`].
    pub const fn sign_shift(&self) -> u32 {
        self.exponent_bits + self.mantissa_bits
    }

    pub(crate) const fn magnitude_mask(&self) -> u32 {
        (1 << self.sign_shift()) - 1
    }

    /// Magnitude bits of the largest finite value.
    pub const fn max_magnitude(&self) -> u32 {
        ((self.exponent_mask() - 1) << self.mantissa_bits) | self.mantissa_mask()
    }

    /// Magnitude bits of infinity.
    pub const fn infinity_magnitude(&self) -> u32 {
        self.exponent_mask() << self.mantissa_bits
    }

    /// Total encoded width including the sign bit, if any.
    pub const fn total_bits(&self) -> u32 {
        self.sign_shift() + self.has_sign as u32
    }
}

impl fmt::Display for NumericFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.has_sign { "" } else { "u" };
        write!(f, "{prefix}e{}m{}", self.exponent_bits, self.mantissa_bits)
    }
}

/// An encoded narrow value: magnitude in the low `we + wm` bits, sign at bit `we + wm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NarrowCode(pub u16);

impl NarrowCode {
    pub const fn bits(self) -> u16 {
        self.0
    }

    pub fn magnitude(self, format: &NumericFormat) -> u32 {
        u32::from(self.0) & format.magnitude_mask()
    }

    pub fn is_negative(self, format: &NumericFormat) -> bool {
        format.has_sign() && (u32::from(self.0) >> format.sign_shift()) & 1 == 1
    }

    pub fn is_nan(self, format: &NumericFormat) -> bool {
        self.magnitude(format) > format.infinity_magnitude()
    }

    pub fn is_infinite(self, format: &NumericFormat) -> bool {
        self.magnitude(format) == format.infinity_magnitude()
    }
}
