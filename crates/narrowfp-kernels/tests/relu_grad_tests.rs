//! Relu gradient tests across paths, lengths and element types.
//!
//! The binary16 kernel has two implementations chosen by buffer alignment;
//! both must match the scalar reference bit for bit, for every length and
//! with or without native half2 lanes.

use std::sync::OnceLock;

use half::{bf16, f16};
use narrowfp_common::KernelConfig;
use narrowfp_kernels::activation::{relu_grad_half, relu_grad_half_via, Half8};
use narrowfp_kernels::{relu_backward, ExecutionContext, ReluGradPath};
use proptest::prelude::*;

/// Small groups and a low resident-group cap so the grid-stride loop and the
/// vectorized tail both get exercised at modest lengths.
fn contexts() -> &'static [ExecutionContext; 2] {
    static CTXS: OnceLock<[ExecutionContext; 2]> = OnceLock::new();
    CTXS.get_or_init(|| {
        [true, false].map(|native_half2| {
            ExecutionContext::new(KernelConfig {
                worker_threads: 3,
                relu_grad_group_size: 8,
                max_resident_groups: 3,
                native_half2,
                ..Default::default()
            })
            .unwrap()
        })
    })
}

fn reference(gradients: &[f16], features: &[f16]) -> Vec<u16> {
    gradients
        .iter()
        .zip(features)
        .map(|(g, f)| if *f > f16::ZERO { g.to_bits() } else { 0 })
        .collect()
}

/// 16-byte aligned backing store with room for an offset of one element.
fn backing(values: &[f16]) -> Vec<Half8> {
    let mut store = vec![Half8::default(); values.len().div_ceil(8) + 1];
    bytemuck::cast_slice_mut::<Half8, f16>(&mut store)[..values.len()].copy_from_slice(values);
    store
}

fn shifted(values: &[f16]) -> Vec<Half8> {
    let mut store = vec![Half8::default(); values.len().div_ceil(8) + 1];
    bytemuck::cast_slice_mut::<Half8, f16>(&mut store)[1..values.len() + 1].copy_from_slice(values);
    store
}

fn bits(values: &[f16]) -> Vec<u16> {
    values.iter().map(|v| v.to_bits()).collect()
}

fn halves(max_len: usize) -> impl Strategy<Value = (Vec<f16>, Vec<f16>)> {
    (0..max_len).prop_flat_map(|n| {
        (
            prop::collection::vec(any::<u16>().prop_map(f16::from_bits), n),
            prop::collection::vec(any::<u16>().prop_map(f16::from_bits), n),
        )
    })
}

proptest! {
    #[test]
    fn vectorized_path_matches_reference((g, f) in halves(300)) {
        let n = g.len();
        let expected = reference(&g, &f);
        let (gs, fs) = (backing(&g), backing(&f));
        for ctx in contexts() {
            let mut out = vec![Half8([u32::MAX; 4]); n.div_ceil(8) + 1];
            let gradients = &bytemuck::cast_slice::<Half8, f16>(&gs[..])[..n];
            let features = &bytemuck::cast_slice::<Half8, f16>(&fs[..])[..n];
            let backprops = &mut bytemuck::cast_slice_mut::<Half8, f16>(&mut out[..])[..n];
            prop_assert_eq!(
                ReluGradPath::select(gradients, features, backprops),
                ReluGradPath::Vectorized
            );
            relu_grad_half(ctx, gradients, features, backprops).unwrap();
            prop_assert_eq!(bits(backprops), expected.clone());
        }
    }

    #[test]
    fn grid_stride_path_matches_reference((g, f) in halves(300)) {
        let n = g.len();
        let expected = reference(&g, &f);
        let (gs, fs) = (shifted(&g), shifted(&f));
        for ctx in contexts() {
            let mut out = vec![Half8([u32::MAX; 4]); n.div_ceil(8) + 1];
            let gradients = &bytemuck::cast_slice::<Half8, f16>(&gs[..])[1..n + 1];
            let features = &bytemuck::cast_slice::<Half8, f16>(&fs[..])[1..n + 1];
            let backprops = &mut bytemuck::cast_slice_mut::<Half8, f16>(&mut out[..])[1..n + 1];
            prop_assert_eq!(
                ReluGradPath::select(gradients, features, backprops),
                ReluGradPath::GridStride
            );
            relu_grad_half(ctx, gradients, features, backprops).unwrap();
            prop_assert_eq!(bits(backprops), expected.clone());
        }
    }

    /// Aligned buffers may still be pushed down the grid-stride path.
    #[test]
    fn paths_agree_on_aligned_buffers((g, f) in halves(200)) {
        let n = g.len();
        let (gs, fs) = (backing(&g), backing(&f));
        let gradients = &bytemuck::cast_slice::<Half8, f16>(&gs[..])[..n];
        let features = &bytemuck::cast_slice::<Half8, f16>(&fs[..])[..n];
        for ctx in contexts() {
            let mut a = vec![Half8::default(); n.div_ceil(8) + 1];
            let mut b = vec![Half8::default(); n.div_ceil(8) + 1];
            let out_a = &mut bytemuck::cast_slice_mut::<Half8, f16>(&mut a[..])[..n];
            relu_grad_half_via(ctx, ReluGradPath::Vectorized, gradients, features, out_a).unwrap();
            let out_b = &mut bytemuck::cast_slice_mut::<Half8, f16>(&mut b[..])[..n];
            relu_grad_half_via(ctx, ReluGradPath::GridStride, gradients, features, out_b).unwrap();
            prop_assert_eq!(a, b);
        }
    }

    #[test]
    fn wide_types_match_reference(
        values in prop::collection::vec((-10.0f32..10.0, -10.0f32..10.0), 0..500),
    ) {
        let ctx = &contexts()[0];
        let (g, f): (Vec<f32>, Vec<f32>) = values.iter().copied().unzip();

        let mut out = vec![f32::NAN; g.len()];
        relu_backward(ctx, &g, &f, &mut out).unwrap();
        for i in 0..g.len() {
            prop_assert_eq!(out[i], if f[i] > 0.0 { g[i] } else { 0.0 });
        }

        let gd: Vec<f64> = g.iter().map(|&x| f64::from(x)).collect();
        let fd: Vec<f64> = f.iter().map(|&x| f64::from(x)).collect();
        let mut out = vec![f64::NAN; g.len()];
        relu_backward(ctx, &gd, &fd, &mut out).unwrap();
        for i in 0..g.len() {
            prop_assert_eq!(out[i], if fd[i] > 0.0 { gd[i] } else { 0.0 });
        }

        let gb: Vec<bf16> = g.iter().map(|&x| bf16::from_f32(x)).collect();
        let fb: Vec<bf16> = f.iter().map(|&x| bf16::from_f32(x)).collect();
        let mut out = vec![bf16::NAN; g.len()];
        relu_backward(ctx, &gb, &fb, &mut out).unwrap();
        for i in 0..g.len() {
            let expected = if fb[i] > bf16::ZERO { gb[i] } else { bf16::ZERO };
            prop_assert_eq!(out[i].to_bits(), expected.to_bits());
        }
    }
}

#[test]
fn lengths_around_the_vector_width() {
    for ctx in contexts() {
        for n in [0usize, 1, 2, 3, 7, 8, 9, 15, 16, 17, 63, 64, 65, 1001] {
            let g: Vec<f16> = (0..n).map(|i| f16::from_f32(i as f32 + 0.5)).collect();
            let f: Vec<f16> =
                (0..n).map(|i| f16::from_f32(if i % 3 == 1 { -1.0 } else { 2.0 })).collect();
            let expected = reference(&g, &f);

            let (gs, fs) = (backing(&g), backing(&f));
            let mut out = vec![Half8([u32::MAX; 4]); n.div_ceil(8) + 1];
            let backprops = &mut bytemuck::cast_slice_mut::<Half8, f16>(&mut out[..])[..n];
            relu_grad_half_via(
                ctx,
                ReluGradPath::Vectorized,
                &bytemuck::cast_slice::<Half8, f16>(&gs[..])[..n],
                &bytemuck::cast_slice::<Half8, f16>(&fs[..])[..n],
                backprops,
            )
            .unwrap();
            assert_eq!(bits(backprops), expected, "vectorized n = {n}");

            let mut out = vec![f16::NAN; n];
            relu_grad_half_via(ctx, ReluGradPath::GridStride, &g, &f, &mut out).unwrap();
            assert_eq!(bits(&out), expected, "grid-stride n = {n}");
        }
    }
}

#[test]
fn special_features_block_the_gradient() {
    let ctx = &contexts()[1];
    let f = [
        f16::NAN,
        f16::NEG_ZERO,
        f16::ZERO,
        f16::INFINITY,
        f16::NEG_INFINITY,
        f16::MIN_POSITIVE_SUBNORMAL,
    ];
    let g = [f16::ONE; 6];
    let mut out = [f16::NAN; 6];
    relu_grad_half(ctx, &g, &f, &mut out).unwrap();
    assert_eq!(bits(&out), [0, 0, 0, 0x3C00, 0, 0x3C00]);
}

#[test]
fn forcing_vectorized_on_misaligned_buffers_fails() {
    let ctx = &contexts()[0];
    let g = shifted(&[f16::ONE; 16]);
    let gradients = &bytemuck::cast_slice::<Half8, f16>(&g[..])[1..17];
    let features = [f16::ONE; 16];
    let mut out = [f16::ZERO; 16];
    let err = relu_grad_half_via(ctx, ReluGradPath::Vectorized, gradients, &features, &mut out)
        .unwrap_err();
    assert!(err.to_string().contains("16-byte"), "{err}");
}
