//! Relu gradient for binary16 buffers, 2-wide and 8-wide.
//!
//! `backprop[i] = feature[i] > 0 ? gradient[i] : 0`
//!
//! Two code paths share one contract and are chosen from the buffer
//! addresses:
//!
//! - **Vectorized**: all three buffers are 16-byte aligned. Each thread
//!   loads eight halves at once as a [`Half8`], processes them as four
//!   2-wide lanes, and stores eight results. The first `N % 8` threads then
//!   handle the scalar tail.
//! - **Grid-stride**: otherwise. Each thread processes one 2-wide lane per
//!   step, striding by the total thread count over a grid capped at
//!   `max_resident_groups`. For odd `N` the thread whose stride ends exactly
//!   at `N / 2` handles the last element.
//!
//! A 2-wide lane is a `u32` holding two raw halves. With native half2
//! support the lane mask is computed directly on the bits; otherwise both
//! features are widened to `f32` for the comparison. Either way the
//! gradient's original bits are selected, so every path is bit-identical
//! to the scalar reference.

use bytemuck::{Pod, Zeroable};
use half::f16;
use narrowfp_common::{KernelError, Result};

use crate::device::{alignment_of, check_lengths, DeviceSliceMut, ExecutionContext, LaunchConfig};

/// Required alignment for the vectorized path, in bytes.
pub const VECTOR_ALIGNMENT: usize = 16;
/// Elements per vectorized load.
pub const VECTOR_WIDTH: usize = 8;

/// Eight halves as four 2-wide lanes, loaded and stored as one 16-byte unit.
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Half8(pub [u32; 4]);

/// Which implementation a Relu gradient launch uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReluGradPath {
    Vectorized,
    GridStride,
}

impl ReluGradPath {
    /// Vectorized iff every buffer starts on a 16-byte boundary.
    pub fn select(gradients: &[f16], features: &[f16], backprops: &[f16]) -> Self {
        let aligned = [alignment_of(gradients), alignment_of(features), alignment_of(backprops)]
            .iter()
            .all(|&a| a >= VECTOR_ALIGNMENT);
        if aligned { Self::Vectorized } else { Self::GridStride }
    }
}

/// Relu gradient over binary16 buffers, choosing the path from alignment.
pub fn relu_grad_half(
    ctx: &ExecutionContext,
    gradients: &[f16],
    features: &[f16],
    backprops: &mut [f16],
) -> Result<()> {
    let path = ReluGradPath::select(gradients, features, backprops);
    relu_grad_half_via(ctx, path, gradients, features, backprops)
}

/// Relu gradient over binary16 buffers on an explicit path.
///
/// # Errors
///
/// - [`KernelError::InvalidArguments`] on length mismatch, or when
///   `Vectorized` is requested for buffers that are not 16-byte aligned.
/// - Launch errors from the execution context.
pub fn relu_grad_half_via(
    ctx: &ExecutionContext,
    path: ReluGradPath,
    gradients: &[f16],
    features: &[f16],
    backprops: &mut [f16],
) -> Result<()> {
    let n = gradients.len();
    check_lengths(
        "relu_grad_half",
        n,
        &[("features", features.len()), ("backprops", backprops.len())],
    )?;
    if n == 0 {
        return Ok(());
    }

    log::trace!("relu_grad_half: n={n} path={path:?}");
    let native = ctx.config().native_half2;
    match path {
        ReluGradPath::Vectorized => vectorized(ctx, native, gradients, features, backprops),
        ReluGradPath::GridStride => grid_stride(ctx, native, gradients, features, backprops),
    }
}

// ── Lane math ────────────────────────────────────────────────────────

/// 0xFFFF for a half strictly greater than zero, else 0.
#[inline]
fn positive_mask(bits: u32) -> u32 {
    // sign clear, non-zero, not NaN: 1..=0x7C00
    if (bits & 0xFFFF).wrapping_sub(1) < 0x7C00 { 0xFFFF } else { 0 }
}

#[inline]
fn lane_native(gradient: u32, feature: u32) -> u32 {
    let mask = positive_mask(feature) | (positive_mask(feature >> 16) << 16);
    gradient & mask
}

#[inline]
fn lane_widened(gradient: u32, feature: u32) -> u32 {
    let pick = |shift: u32| {
        let f = f16::from_bits((feature >> shift) as u16).to_f32();
        if f > 0.0 { gradient & (0xFFFF << shift) } else { 0 }
    };
    pick(0) | pick(16)
}

#[inline]
fn lane(native: bool, gradient: u32, feature: u32) -> u32 {
    if native { lane_native(gradient, feature) } else { lane_widened(gradient, feature) }
}

#[inline]
fn scalar(gradient: f16, feature: f16) -> f16 {
    if feature.to_f32() > 0.0 { gradient } else { f16::ZERO }
}

#[inline]
fn pack2(lo: f16, hi: f16) -> u32 {
    u32::from(lo.to_bits()) | (u32::from(hi.to_bits()) << 16)
}

// ── Vectorized path ──────────────────────────────────────────────────

fn vectorized(
    ctx: &ExecutionContext,
    native: bool,
    gradients: &[f16],
    features: &[f16],
    backprops: &mut [f16],
) -> Result<()> {
    let n = gradients.len();
    let half8_count = n / VECTOR_WIDTH;
    let body = half8_count * VECTOR_WIDTH;

    let misaligned = |what: &str, e: bytemuck::PodCastError| KernelError::InvalidArguments {
        reason: format!("relu_grad_half: {what} not usable for 16-byte vector access: {e:?}"),
    };
    let g8: &[Half8] =
        bytemuck::try_cast_slice(&gradients[..body]).map_err(|e| misaligned("gradients", e))?;
    let f8: &[Half8] =
        bytemuck::try_cast_slice(&features[..body]).map_err(|e| misaligned("features", e))?;
    let (out_body, out_tail) = backprops.split_at_mut(body);
    let out8: &mut [Half8] =
        bytemuck::try_cast_slice_mut(out_body).map_err(|e| misaligned("backprops", e))?;

    let out8 = DeviceSliceMut::new(out8);
    let out_tail = DeviceSliceMut::new(out_tail);
    let tail_len = out_tail.len();

    // Small groups may have fewer threads than there are tail elements.
    let threads = n.div_ceil(VECTOR_WIDTH).max(tail_len);
    let cfg = LaunchConfig::for_elements(threads, ctx.config().relu_grad_group_size)?;
    log::debug!(
        "relu_grad_half vectorized: n={n} half8={half8_count} tail={tail_len} grid={} block={}",
        cfg.grid_dim,
        cfg.block_dim
    );

    ctx.launch("relu_grad_half_vector", cfg, |tid| {
        let index = tid.global();
        if index < half8_count {
            let (g, f) = (g8[index].0, f8[index].0);
            let mut out = Half8::default();
            for k in 0..4 {
                out.0[k] = lane(native, g[k], f[k]);
            }
            // Safety: thread `index` owns vector `index`.
            unsafe { out8.write(index, out) };
        }
        if index < tail_len {
            let i = body + index;
            // Safety: thread `index` owns tail element `index`.
            unsafe { out_tail.write(index, scalar(gradients[i], features[i])) };
        }
    })
}

// ── Grid-stride path ─────────────────────────────────────────────────

fn grid_stride(
    ctx: &ExecutionContext,
    native: bool,
    gradients: &[f16],
    features: &[f16],
    backprops: &mut [f16],
) -> Result<()> {
    let n = gradients.len();
    let half2_count = n / 2;
    let cfg = LaunchConfig::grid_stride(
        n.div_ceil(2),
        ctx.config().relu_grad_group_size,
        ctx.config().max_resident_groups,
    );
    log::debug!(
        "relu_grad_half grid-stride: n={n} half2={half2_count} grid={} block={}",
        cfg.grid_dim,
        cfg.block_dim
    );

    let out = DeviceSliceMut::new(backprops);
    ctx.launch("relu_grad_half", cfg, |tid| {
        let mut index = tid.global();
        let stride = tid.grid_threads();
        while index < half2_count {
            let (lo, hi) = (2 * index, 2 * index + 1);
            let r = lane(
                native,
                pack2(gradients[lo], gradients[hi]),
                pack2(features[lo], features[hi]),
            );
            // Safety: lane `index` is visited by exactly one thread.
            unsafe {
                out.write(lo, f16::from_bits(r as u16));
                out.write(hi, f16::from_bits((r >> 16) as u16));
            }
            index += stride;
        }
        if n % 2 == 1 && index == half2_count {
            // Safety: exactly one thread's stride ends on `half2_count`.
            unsafe { out.write(n - 1, scalar(gradients[n - 1], features[n - 1])) };
        }
    })
}
