//! Criterion benchmarks for the narrow-float kernels
//!
//! Covers quantization (deterministic and stochastic, both source widths),
//! the binary16 Relu gradient on each path, packed int8 Relu and the
//! exponent histogram.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use half::f16;
use narrowfp_kernels::activation::{relu_grad_half_via, Half8};
use narrowfp_kernels::{
    exponent_histogram, quantize_forward, relu_int8, ExecutionContext, KernelConfig, QuantVariant,
    ReluGradPath,
};

const SIZES: [usize; 3] = [4096, 65536, 1 << 20];

struct BenchmarkData;

impl BenchmarkData {
    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| (i as f32 / len as f32) * 64.0 - 32.0).collect()
    }

    fn halves(len: usize) -> Vec<f16> {
        Self::ramp(len).into_iter().map(f16::from_f32).collect()
    }

    /// 16-byte aligned storage holding `len` halves.
    fn aligned_halves(len: usize) -> Vec<Half8> {
        let mut store = vec![Half8::default(); len.div_ceil(8)];
        let values = Self::halves(len);
        bytemuck::cast_slice_mut::<Half8, f16>(&mut store)[..len].copy_from_slice(&values);
        store
    }
}

fn context() -> ExecutionContext {
    ExecutionContext::new(KernelConfig::default()).expect("execution context")
}

fn bench_quantize(c: &mut Criterion) {
    let ctx = context();
    let mut group = c.benchmark_group("quantize_forward");

    for size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        let wide = BenchmarkData::ramp(size);
        let narrow = BenchmarkData::halves(size);
        let mut wide_out = vec![0.0f32; size];
        let mut narrow_out = vec![f16::ZERO; size];

        for variant in [QuantVariant::E4M3, QuantVariant::E5M2] {
            for stochastic in [false, true] {
                let mode = if stochastic { "stochastic" } else { "nearest" };
                let (we, wm) = (variant.exponent_bits(), variant.mantissa_bits());

                group.bench_with_input(
                    BenchmarkId::new(format!("f16-{variant}-{mode}"), size),
                    &size,
                    |b, _| {
                        b.iter(|| {
                            quantize_forward(
                                &ctx,
                                black_box(&narrow),
                                black_box(&mut narrow_out),
                                we,
                                wm,
                                stochastic,
                                false,
                                black_box(7),
                            )
                            .unwrap();
                        });
                    },
                );

                group.bench_with_input(
                    BenchmarkId::new(format!("f32-{variant}-{mode}"), size),
                    &size,
                    |b, _| {
                        b.iter(|| {
                            quantize_forward(
                                &ctx,
                                black_box(&wide),
                                black_box(&mut wide_out),
                                we,
                                wm,
                                stochastic,
                                false,
                                black_box(7),
                            )
                            .unwrap();
                        });
                    },
                );
            }
        }
    }

    group.finish();
}

fn bench_relu_grad_half(c: &mut Criterion) {
    let ctx = context();
    let mut group = c.benchmark_group("relu_grad_half");

    for size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        let g = BenchmarkData::aligned_halves(size);
        let f = BenchmarkData::aligned_halves(size);
        let mut out = vec![Half8::default(); size.div_ceil(8)];

        for path in [ReluGradPath::Vectorized, ReluGradPath::GridStride] {
            group.bench_with_input(BenchmarkId::new(format!("{path:?}"), size), &size, |b, &n| {
                let gradients = &bytemuck::cast_slice::<Half8, f16>(&g)[..n];
                let features = &bytemuck::cast_slice::<Half8, f16>(&f)[..n];
                let backprops = &mut bytemuck::cast_slice_mut::<Half8, f16>(&mut out)[..n];
                b.iter(|| {
                    relu_grad_half_via(
                        &ctx,
                        path,
                        black_box(gradients),
                        black_box(features),
                        black_box(&mut *backprops),
                    )
                    .unwrap();
                });
            });
        }
    }

    group.finish();
}

fn bench_relu_int8(c: &mut Criterion) {
    let ctx = context();
    let mut group = c.benchmark_group("relu_int8");

    for size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        let input: Vec<i8> = (0..size).map(|i| ((i % 256) as i32 - 128) as i8).collect();
        let mut output = vec![0i8; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| relu_int8(&ctx, black_box(&input), black_box(&mut output)).unwrap());
        });
    }

    group.finish();
}

fn bench_histogram(c: &mut Criterion) {
    let ctx = context();
    let mut group = c.benchmark_group("exponent_histogram");

    for size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        let wide = BenchmarkData::ramp(size);
        let narrow = BenchmarkData::halves(size);
        let mut wide_counts = vec![0u64; 256];
        let mut narrow_counts = vec![0u64; 32];

        group.bench_with_input(BenchmarkId::new("f32", size), &size, |b, _| {
            b.iter(|| {
                exponent_histogram(&ctx, black_box(&wide), black_box(&mut wide_counts)).unwrap()
            });
        });
        group.bench_with_input(BenchmarkId::new("f16", size), &size, |b, _| {
            b.iter(|| {
                exponent_histogram(&ctx, black_box(&narrow), black_box(&mut narrow_counts)).unwrap()
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_quantize, bench_relu_grad_half, bench_relu_int8, bench_histogram);
criterion_main!(benches);
