//! Relu over signed 8-bit buffers, four lanes per packed 32-bit word.

use narrowfp_common::Result;

use crate::device::{check_lengths, DeviceSliceMut, ExecutionContext, LaunchConfig};

/// Relu of four packed `i8` lanes: negative bytes become zero.
#[inline]
pub fn relu_int8x4(word: u32) -> u32 {
    // 0x7f in every lane whose sign bit is clear, 0 elsewhere
    let mut signs = (!word) & 0x8080_8080;
    signs >>= 7;
    signs |= signs << 1;
    signs |= signs << 2;
    signs |= signs << 4;
    signs &= 0x7f7f_7f7f;
    word & signs
}

/// `output[i] = max(input[i], 0)`.
///
/// Whole words go through [`relu_int8x4`]; the thread that owns the last,
/// partial word handles its `N % 4` elements one by one.
pub fn relu_int8(ctx: &ExecutionContext, input: &[i8], output: &mut [i8]) -> Result<()> {
    let n = input.len();
    check_lengths("relu_int8", n, &[("output", output.len())])?;
    if n == 0 {
        return Ok(());
    }

    let words = n / 4;
    let vect_count = n.div_ceil(4);
    let (head, tail) = output.split_at_mut(words * 4);
    let in_words: &[[i8; 4]] = bytemuck::cast_slice(&input[..words * 4]);
    let in_tail = &input[words * 4..];
    let out_words = DeviceSliceMut::new(bytemuck::cast_slice_mut::<i8, [i8; 4]>(head));
    let out_tail = DeviceSliceMut::new(tail);

    let cfg = LaunchConfig::grid_stride(
        vect_count,
        ctx.config().relu_grad_group_size,
        ctx.config().max_resident_groups,
    );
    log::debug!(
        "relu_int8: n={n} words={vect_count} grid={} block={}",
        cfg.grid_dim,
        cfg.block_dim
    );

    ctx.launch("relu_int8x4", cfg, |tid| {
        let mut index = tid.global();
        while index < vect_count {
            if index < words {
                let packed: u32 = bytemuck::cast(in_words[index]);
                // Safety: word `index` is visited by exactly one thread.
                unsafe { out_words.write(index, bytemuck::cast(relu_int8x4(packed))) };
            } else {
                for (k, &x) in in_tail.iter().enumerate() {
                    // Safety: only the owner of the partial word touches the tail.
                    unsafe { out_tail.write(k, x.max(0)) };
                }
            }
            index += tid.grid_threads();
        }
    })
}
