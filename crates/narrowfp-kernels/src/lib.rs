//! Narrow floating-point quantization and activation kernels
//!
//! Elementwise kernels written against a SIMT-style execution context:
//! narrow-float quantization with optional stochastic rounding, the Relu
//! family plus Elu, Selu and Gelu with their gradients, an alignment-aware
//! binary16 Relu gradient, and an exponent histogram reduction.
//!
//! All kernels borrow caller-owned buffers and never allocate them.

pub mod activation;
pub mod device;
pub mod element;
pub mod histogram;
pub mod quant;

pub use activation::{
    elu_backward, elu_forward, gelu_backward, gelu_forward, leaky_relu_backward,
    leaky_relu_forward, relu6_backward, relu6_forward, relu_backward, relu_forward, relu_int8,
    selu_backward, selu_forward, Activation, ReluGradPath,
};
pub use device::{alignment_of, ExecutionContext, LaunchConfig, ThreadIdx};
pub use element::{Compute, Element, SourceFloat};
pub use histogram::{bucket_count, exponent_histogram, exponent_histogram_with};
pub use quant::{
    cast_from_narrow, cast_to_narrow, describe_quantize, quantize_backward, quantize_forward,
    LaunchDescriptor, NarrowCode, NumericFormat, QuantVariant,
};

pub use narrowfp_common::{KernelConfig, KernelError, NarrowFpError, Result};
