//! Narrow floating-point quantization.
//!
//! - [`format`]: the narrow encodings and their codes.
//! - [`dither`]: per-element pseudo-random values for stochastic rounding.
//! - [`cast`]: bit-exact encode/decode between source floats and codes.
//! - [`dispatch`]: variant selection and the quantize kernels.

pub mod cast;
pub mod dispatch;
pub mod dither;
pub mod format;

pub use cast::{cast_from_narrow, cast_to_narrow, quantize_value};
pub use dispatch::{
    describe_quantize, exp_low_cutoff, quantize_backward, quantize_forward, LaunchDescriptor,
    QuantVariant, WIDE_SOURCE_WARNING,
};
pub use dither::dither;
pub use format::{NarrowCode, NumericFormat};
