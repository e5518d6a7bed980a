//! Quantization dispatch: validate the requested format, pick a compiled
//! variant and launch it one thread per element.
//!
//! # Variants
//!
//! The supported `(exponent width, mantissa width)` pairs form a small
//! closed set, [`QuantVariant`]. Each variant is a monomorphized kernel
//! with the widths as const parameters; a runtime `match` picks one.
//!
//! | requested `we` | `wm`    | 16-bit source | 32-bit source |
//! |----------------|---------|---------------|---------------|
//! | 4              | 1, 2, 3 | `E4Mx`        | `E4Mx`        |
//! | 5              | 1, 2, 3 | `E5Mx`        | `E5Mx`        |
//! | 8              | 1, 2, 3 | `E5Mx`        | rejected      |
//!
//! A 16-bit source only carries five exponent bits, so an eight-bit
//! exponent request is served by the five-bit variant.

use std::fmt;

use narrowfp_common::{KernelError, Result};

use super::cast::quantize_value;
use super::dither::dither;
use super::format::NumericFormat;
use crate::device::{alignment_of, check_lengths, DeviceSliceMut, ExecutionContext, LaunchConfig};
use crate::element::{Element, SourceFloat};

/// Diagnostic key for quantizing 32-bit sources.
pub const WIDE_SOURCE_WARNING: &str = "quantize_forward.wide_source";

// ── Variants ──────────────────────────────────────────────────────────

/// A compiled quantization kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantVariant {
    E4M1,
    E4M2,
    E4M3,
    E5M1,
    E5M2,
    E5M3,
}

impl QuantVariant {
    pub const ALL: [QuantVariant; 6] =
        [Self::E4M1, Self::E4M2, Self::E4M3, Self::E5M1, Self::E5M2, Self::E5M3];

    /// Map a requested width pair to a variant for `source_bits`-wide elements.
    ///
    /// # Errors
    ///
    /// [`KernelError::UnsupportedFormat`] for any pair outside the table above.
    pub fn select(exponent_width: u32, mantissa_width: u32, source_bits: u32) -> Result<Self> {
        let unsupported =
            || KernelError::UnsupportedFormat { exponent_width, mantissa_width, source_bits };

        let exponent = match (exponent_width, source_bits) {
            (4, 16 | 32) => 4,
            (5, 16 | 32) | (8, 16) => 5,
            _ => return Err(unsupported().into()),
        };
        let variant = match (exponent, mantissa_width) {
            (4, 1) => Self::E4M1,
            (4, 2) => Self::E4M2,
            (4, 3) => Self::E4M3,
            (5, 1) => Self::E5M1,
            (5, 2) => Self::E5M2,
            (5, 3) => Self::E5M3,
            _ => return Err(unsupported().into()),
        };
        Ok(variant)
    }

    pub const fn exponent_bits(self) -> u32 {
        match self {
            Self::E4M1 | Self::E4M2 | Self::E4M3 => 4,
            Self::E5M1 | Self::E5M2 | Self::E5M3 => 5,
        }
    }

    pub const fn mantissa_bits(self) -> u32 {
        match self {
            Self::E4M1 | Self::E5M1 => 1,
            Self::E4M2 | Self::E5M2 => 2,
            Self::E4M3 | Self::E5M3 => 3,
        }
    }

    /// The signed narrow format this variant quantizes to.
    pub const fn format(self) -> NumericFormat {
        NumericFormat::from_parts(self.exponent_bits(), self.mantissa_bits(), true)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::E4M1 => "e4m1",
            Self::E4M2 => "e4m2",
            Self::E4M3 => "e4m3",
            Self::E5M1 => "e5m1",
            Self::E5M2 => "e5m2",
            Self::E5M3 => "e5m3",
        }
    }
}

impl fmt::Display for QuantVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Launch description ────────────────────────────────────────────────

/// Everything a quantize launch is decided from. Computed per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchDescriptor {
    pub element_count: usize,
    pub variant: QuantVariant,
    pub format: NumericFormat,
    pub stochastic: bool,
    /// Largest power of two dividing the input address (capped).
    pub alignment_bytes: usize,
    /// Smallest source exponent field still representable in the requested
    /// narrow exponent width. Not used to gate anything yet.
    pub exp_low_cutoff: i32,
    /// `None` when there is nothing to launch.
    pub launch: Option<LaunchConfig>,
}

/// `source bias - narrow bias + 1` for the requested exponent width.
pub fn exp_low_cutoff(source_exponent_bits: u32, exponent_width: u32) -> i32 {
    let source_bias = (1i32 << (source_exponent_bits - 1)) - 1;
    let narrow_bias = (1i32 << (exponent_width.clamp(1, 31) - 1)) - 1;
    source_bias - narrow_bias + 1
}

/// Validate a quantize request and describe the launch it would issue.
///
/// # Errors
///
/// [`KernelError::UnsupportedFormat`] for an unsupported width pair, even
/// when `input` is empty.
pub fn describe_quantize<T: SourceFloat>(
    ctx: &ExecutionContext,
    input: &[T],
    exponent_width: u32,
    mantissa_width: u32,
    stochastic: bool,
) -> Result<LaunchDescriptor> {
    let variant = QuantVariant::select(exponent_width, mantissa_width, T::BITS)?;
    let element_count = input.len();
    let launch = if element_count == 0 {
        None
    } else {
        Some(LaunchConfig::for_elements(element_count, ctx.config().work_group_size)?)
    };

    Ok(LaunchDescriptor {
        element_count,
        variant,
        format: variant.format(),
        stochastic,
        alignment_bytes: alignment_of(input),
        exp_low_cutoff: exp_low_cutoff(T::EXPONENT_BITS, exponent_width),
        launch,
    })
}

// ── Forward / backward ────────────────────────────────────────────────

/// Quantize `input` to the requested narrow format and write the decoded
/// values to `output`.
///
/// `stochastic` selects dithered rounding seeded by `seed`; the same seed
/// and input always give the same output. `dynamic` is accepted for
/// interface compatibility and has no effect.
///
/// # Errors
///
/// - [`KernelError::InvalidArguments`] if the buffer lengths differ.
/// - [`KernelError::UnsupportedFormat`] for an unsupported width pair.
/// - Launch errors from the execution context.
#[allow(clippy::too_many_arguments)]
pub fn quantize_forward<T: SourceFloat>(
    ctx: &ExecutionContext,
    input: &[T],
    output: &mut [T],
    exponent_width: u32,
    mantissa_width: u32,
    stochastic: bool,
    dynamic: bool,
    seed: u32,
) -> Result<()> {
    check_lengths("quantize_forward", input.len(), &[("output", output.len())])?;
    let desc = describe_quantize(ctx, input, exponent_width, mantissa_width, stochastic)?;

    let Some(cfg) = desc.launch else {
        return Ok(());
    };

    if T::BITS == 32 {
        ctx.diagnostics().warn(
            WIDE_SOURCE_WARNING,
            "quantize_forward called with 32-bit source elements; \
             16-bit sources are the tuned path",
        );
    }

    log::debug!(
        "quantize_forward<{}>: n={} variant={} stochastic={} align={} exp_low_cutoff={}",
        T::NAME,
        desc.element_count,
        desc.variant,
        desc.stochastic,
        desc.alignment_bytes,
        desc.exp_low_cutoff
    );
    if dynamic {
        log::trace!("quantize_forward: dynamic range adaptation requested; ignored");
    }

    match desc.variant {
        QuantVariant::E4M1 => quantize_kernel::<T, 4, 1>(ctx, cfg, input, output, stochastic, seed),
        QuantVariant::E4M2 => quantize_kernel::<T, 4, 2>(ctx, cfg, input, output, stochastic, seed),
        QuantVariant::E4M3 => quantize_kernel::<T, 4, 3>(ctx, cfg, input, output, stochastic, seed),
        QuantVariant::E5M1 => quantize_kernel::<T, 5, 1>(ctx, cfg, input, output, stochastic, seed),
        QuantVariant::E5M2 => quantize_kernel::<T, 5, 2>(ctx, cfg, input, output, stochastic, seed),
        QuantVariant::E5M3 => quantize_kernel::<T, 5, 3>(ctx, cfg, input, output, stochastic, seed),
    }
}

fn quantize_kernel<T: SourceFloat, const WE: u32, const WM: u32>(
    ctx: &ExecutionContext,
    cfg: LaunchConfig,
    input: &[T],
    output: &mut [T],
    stochastic: bool,
    seed: u32,
) -> Result<()> {
    let format = NumericFormat::from_parts(WE, WM, true);
    let n = input.len();
    let out = DeviceSliceMut::new(output);

    ctx.launch("quantize_forward", cfg, |tid| {
        let i = tid.global();
        if i >= n {
            return;
        }
        let x = input[i];
        let rng = stochastic.then(|| dither(i as u32, seed, x.to_raw(), T::BITS));
        // Safety: thread `i` is the only writer of index `i`.
        unsafe { out.write(i, quantize_value(x, format, rng)) };
    })
}

/// Straight-through gradient of [`quantize_forward`]: copies `input` to `output`.
///
/// # Errors
///
/// [`KernelError::InvalidArguments`] if the buffer lengths differ.
pub fn quantize_backward<T: Element>(
    ctx: &ExecutionContext,
    input: &[T],
    output: &mut [T],
) -> Result<()> {
    check_lengths("quantize_backward", input.len(), &[("output", output.len())])?;
    let n = input.len();
    if n == 0 {
        return Ok(());
    }

    let cfg = LaunchConfig::for_elements(n, ctx.config().work_group_size)?;
    log::debug!("quantize_backward<{}>: n={n} grid={}", T::NAME, cfg.grid_dim);

    let out = DeviceSliceMut::new(output);
    ctx.launch("quantize_backward", cfg, |tid| {
        let i = tid.global();
        if i < n {
            // Safety: thread `i` is the only writer of index `i`.
            unsafe { out.write(i, input[i]) };
        }
    })
}
