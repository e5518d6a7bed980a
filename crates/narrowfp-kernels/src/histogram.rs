//! Exponent-field histogram as a parallel reduction.
//!
//! # Kernel strategy
//!
//! The histogram has one bucket per exponent field value: 32 for binary16,
//! 256 for binary32.
//!
//! 1. Each thread of a group walks its elements with a grid stride and
//!    counts exponent fields into private buckets.
//! 2. The group combines its private buckets with an xor butterfly over
//!    `group_width` lanes: in round `s` lane `t` and lane `t ^ s` exchange
//!    and add, for `s = 1, 2, 4, ...`. After `log2(group_width)` rounds
//!    every lane holds the group total.
//! 3. Lane `t` publishes buckets `t, t + group_width, ...` with one atomic
//!    add per bucket, so each bucket is added exactly once per group.
//!
//! Integer addition is associative, so the result does not depend on the
//! grid geometry or on the order groups finish in.
//!
//! Nothing in this crate consumes the histogram yet; it is meant to feed
//! range-aware quantization.

use std::sync::atomic::{AtomicU64, Ordering};

use narrowfp_common::{KernelError, Result, MAX_WORK_GROUP_SIZE};

use crate::device::{ExecutionContext, LaunchConfig};
use crate::element::SourceFloat;

/// Target elements per lane when the grid is sized from the config; the
/// butterfly costs `buckets * log2(width)` per lane, so lanes need enough
/// elements to amortize it.
const ELEMENTS_PER_LANE: usize = 256;

/// Number of buckets for source type `T`.
pub fn bucket_count<T: SourceFloat>() -> usize {
    1 << T::EXPONENT_BITS
}

/// Count the exponent fields of `input` into `counts`, sizing the grid from
/// the context configuration.
///
/// `counts` must hold exactly [`bucket_count`] entries and is overwritten.
///
/// # Errors
///
/// [`KernelError::InvalidArguments`] if `counts` has the wrong length.
pub fn exponent_histogram<T: SourceFloat>(
    ctx: &ExecutionContext,
    input: &[T],
    counts: &mut [u64],
) -> Result<()> {
    let width = ctx.config().histogram_group_width;
    let groups = input
        .len()
        .div_ceil(width as usize * ELEMENTS_PER_LANE)
        .clamp(1, ctx.config().max_resident_groups as usize);
    exponent_histogram_with(ctx, input, counts, groups as u32, width)
}

/// [`exponent_histogram`] with an explicit grid of `groups` groups of
/// `group_width` lanes.
///
/// # Errors
///
/// [`KernelError::InvalidArguments`] if `counts` has the wrong length,
/// `groups` is zero, or `group_width` is not a power of two no larger than
/// the work-group limit. Launch errors from the execution context.
pub fn exponent_histogram_with<T: SourceFloat>(
    ctx: &ExecutionContext,
    input: &[T],
    counts: &mut [u64],
    groups: u32,
    group_width: u32,
) -> Result<()> {
    let buckets = bucket_count::<T>();
    if counts.len() != buckets {
        return Err(KernelError::InvalidArguments {
            reason: format!(
                "exponent_histogram<{}>: counts has {} entries, expected {buckets}",
                T::NAME,
                counts.len()
            ),
        }
        .into());
    }
    if groups == 0 || !group_width.is_power_of_two() || group_width > MAX_WORK_GROUP_SIZE {
        return Err(KernelError::InvalidArguments {
            reason: format!(
                "exponent_histogram: invalid geometry {groups} groups x {group_width} lanes"
            ),
        }
        .into());
    }

    counts.fill(0);
    let n = input.len();
    if n == 0 {
        return Ok(());
    }

    let cfg = LaunchConfig { grid_dim: groups, block_dim: group_width };
    log::debug!(
        "exponent_histogram<{}>: n={n} buckets={buckets} grid={} block={}",
        T::NAME,
        cfg.grid_dim,
        cfg.block_dim
    );

    let global: Vec<AtomicU64> = (0..buckets).map(|_| AtomicU64::new(0)).collect();
    let width = group_width as usize;
    let stride = cfg.total_threads();

    ctx.launch_groups("exponent_histogram", cfg, |block| {
        let base = block as usize * width;

        // 1. private counts, one row per lane
        let mut lanes = vec![0u64; width * buckets];
        for (t, row) in lanes.chunks_exact_mut(buckets).enumerate() {
            let mut i = base + t;
            while i < n {
                row[T::exponent_field(input[i].to_raw()) as usize] += 1;
                i += stride;
            }
        }

        // 2. xor butterfly
        let mut s = 1;
        while s < width {
            for t in 0..width {
                let partner = t ^ s;
                if partner > t {
                    let (lo, hi) = lanes.split_at_mut(partner * buckets);
                    let a = &mut lo[t * buckets..(t + 1) * buckets];
                    let b = &mut hi[..buckets];
                    for (x, y) in a.iter_mut().zip(b.iter_mut()) {
                        let sum = *x + *y;
                        *x = sum;
                        *y = sum;
                    }
                }
            }
            s <<= 1;
        }

        // 3. one atomic add per bucket, spread across lanes
        for t in 0..width {
            let row = &lanes[t * buckets..(t + 1) * buckets];
            for j in (t..buckets).step_by(width) {
                if row[j] != 0 {
                    global[j].fetch_add(row[j], Ordering::Relaxed);
                }
            }
        }
    })?;

    for (c, g) in counts.iter_mut().zip(&global) {
        *c = g.load(Ordering::Relaxed);
    }
    Ok(())
}
