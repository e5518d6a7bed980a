//! Element types the kernels operate on.
//!
//! [`Element`] covers every type the activation functors accept; reduced
//! precision types compute in `f32` and round the result back. [`SourceFloat`]
//! is the subset the quantizer and the exponent histogram accept: IEEE-754
//! binary16 and binary32, with explicit bit-field accessors on their raw
//! integer representation.

use std::fmt::Debug;
use std::ops::{Add, Mul, Neg, Sub};

use half::{bf16, f16};
use narrowfp_common::Result;

use crate::device::ExecutionContext;

/// Arithmetic type the activation formulas are evaluated in.
pub trait Compute:
    Copy
    + PartialOrd
    + Debug
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Neg<Output = Self>
{
    const ZERO: Self;
    const ONE: Self;

    /// Round a double-precision literal to this type.
    fn lit(v: f64) -> Self;
    fn exp(self) -> Self;
    fn tanh(self) -> Self;
    fn cosh(self) -> Self;
    fn recip(self) -> Self;
}

macro_rules! impl_compute {
    ($t:ty) => {
        impl Compute for $t {
            const ZERO: Self = 0.0;
            const ONE: Self = 1.0;

            #[inline]
            fn lit(v: f64) -> Self {
                v as $t
            }
            #[inline]
            fn exp(self) -> Self {
                <$t>::exp(self)
            }
            #[inline]
            fn tanh(self) -> Self {
                <$t>::tanh(self)
            }
            #[inline]
            fn cosh(self) -> Self {
                <$t>::cosh(self)
            }
            #[inline]
            fn recip(self) -> Self {
                <$t>::recip(self)
            }
        }
    };
}

impl_compute!(f32);
impl_compute!(f64);

/// A buffer element for the activation functors.
pub trait Element: Copy + Send + Sync + PartialOrd + Debug + 'static {
    type Compute: Compute;

    const NAME: &'static str;
    const ZERO: Self;

    fn widen(self) -> Self::Compute;
    fn narrow(v: Self::Compute) -> Self;
    fn is_nan(self) -> bool;

    /// Relu gradient over whole buffers. Binary16 overrides this with the
    /// alignment-aware vectorized kernel.
    fn relu_grad(
        ctx: &ExecutionContext,
        gradients: &[Self],
        features: &[Self],
        backprops: &mut [Self],
    ) -> Result<()> {
        crate::activation::relu_grad_elementwise(ctx, gradients, features, backprops)
    }
}

impl Element for f32 {
    type Compute = f32;
    const NAME: &'static str = "f32";
    const ZERO: Self = 0.0;

    #[inline]
    fn widen(self) -> f32 {
        self
    }
    #[inline]
    fn narrow(v: f32) -> Self {
        v
    }
    #[inline]
    fn is_nan(self) -> bool {
        f32::is_nan(self)
    }
}

impl Element for f64 {
    type Compute = f64;
    const NAME: &'static str = "f64";
    const ZERO: Self = 0.0;

    #[inline]
    fn widen(self) -> f64 {
        self
    }
    #[inline]
    fn narrow(v: f64) -> Self {
        v
    }
    #[inline]
    fn is_nan(self) -> bool {
        f64::is_nan(self)
    }
}

impl Element for f16 {
    type Compute = f32;
    const NAME: &'static str = "f16";
    const ZERO: Self = f16::ZERO;

    #[inline]
    fn widen(self) -> f32 {
        self.to_f32()
    }
    #[inline]
    fn narrow(v: f32) -> Self {
        f16::from_f32(v)
    }
    #[inline]
    fn is_nan(self) -> bool {
        f16::is_nan(self)
    }

    fn relu_grad(
        ctx: &ExecutionContext,
        gradients: &[Self],
        features: &[Self],
        backprops: &mut [Self],
    ) -> Result<()> {
        crate::activation::relu_grad_half(ctx, gradients, features, backprops)
    }
}

impl Element for bf16 {
    type Compute = f32;
    const NAME: &'static str = "bf16";
    const ZERO: Self = bf16::ZERO;

    #[inline]
    fn widen(self) -> f32 {
        self.to_f32()
    }
    #[inline]
    fn narrow(v: f32) -> Self {
        bf16::from_f32(v)
    }
    #[inline]
    fn is_nan(self) -> bool {
        bf16::is_nan(self)
    }
}

/// An IEEE-754 source float the narrow-cast engine can reinterpret.
pub trait SourceFloat: Element + bytemuck::Pod {
    /// Container width in bits (16 or 32).
    const BITS: u32;
    const EXPONENT_BITS: u32;
    const MANTISSA_BITS: u32;
    /// `2^(EXPONENT_BITS-1) - 1`.
    const BIAS: i32 = (1 << (Self::EXPONENT_BITS - 1)) - 1;

    /// Raw bit pattern, zero-extended to 32 bits.
    fn to_raw(self) -> u32;
    /// Inverse of [`SourceFloat::to_raw`]; high bits beyond `BITS` are ignored.
    fn from_raw(bits: u32) -> Self;

    #[inline]
    fn exponent_mask() -> u32 {
        (1 << Self::EXPONENT_BITS) - 1
    }

    #[inline]
    fn mantissa_mask() -> u32 {
        (1 << Self::MANTISSA_BITS) - 1
    }

    #[inline]
    fn sign_field(raw: u32) -> u32 {
        (raw >> (Self::BITS - 1)) & 1
    }

    #[inline]
    fn exponent_field(raw: u32) -> u32 {
        (raw >> Self::MANTISSA_BITS) & Self::exponent_mask()
    }

    #[inline]
    fn mantissa_field(raw: u32) -> u32 {
        raw & Self::mantissa_mask()
    }

    /// Assemble a raw pattern from its fields.
    #[inline]
    fn assemble(sign: u32, exponent: u32, mantissa: u32) -> u32 {
        (sign << (Self::BITS - 1))
            | ((exponent & Self::exponent_mask()) << Self::MANTISSA_BITS)
            | (mantissa & Self::mantissa_mask())
    }
}

impl SourceFloat for f16 {
    const BITS: u32 = 16;
    const EXPONENT_BITS: u32 = 5;
    const MANTISSA_BITS: u32 = 10;

    #[inline]
    fn to_raw(self) -> u32 {
        u32::from(self.to_bits())
    }
    #[inline]
    fn from_raw(bits: u32) -> Self {
        f16::from_bits(bits as u16)
    }
}

impl SourceFloat for f32 {
    const BITS: u32 = 32;
    const EXPONENT_BITS: u32 = 8;
    const MANTISSA_BITS: u32 = 23;

    #[inline]
    fn to_raw(self) -> u32 {
        self.to_bits()
    }
    #[inline]
    fn from_raw(bits: u32) -> Self {
        f32::from_bits(bits)
    }
}
