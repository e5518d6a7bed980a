//! Activation kernels and their gradients.
//!
//! Every function here is one elementwise launch over pre-allocated
//! buffers: one thread per element, `work_group_size` threads per group.
//! Backward kernels take the incoming gradients plus the saved tensor the
//! formula is defined on (the features for Relu, Relu6, LeakyRelu and
//! Gelu; the forward outputs for Elu and Selu). For Relu either works.
//!
//! The binary16 Relu gradient dispatches to the alignment-aware kernel in
//! [`relu_grad_half`]; signed 8-bit Relu has its own packed kernel in
//! [`relu_int8`].

pub mod functors;
pub mod relu_grad_half;
pub mod relu_int8;

pub use relu_grad_half::{relu_grad_half, relu_grad_half_via, Half8, ReluGradPath};
pub use relu_int8::{relu_int8, relu_int8x4};

use narrowfp_common::Result;

use crate::device::{check_lengths, DeviceSliceMut, ExecutionContext, LaunchConfig};
use crate::element::Element;

// ── Activation selector ─────────────────────────────────────────────

/// Supported activation functions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    /// max(x, 0)
    Relu,
    /// min(max(x, 0), 6)
    Relu6,
    /// x if x > 0, else alpha * x; alpha is rounded to the compute type
    LeakyRelu(f64),
    /// x if x >= 0, else exp(x) - 1
    Elu,
    /// Scaled ELU with the self-normalizing constants
    Selu,
    /// GELU, tanh approximation
    Gelu,
}

impl Activation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Relu => "relu",
            Self::Relu6 => "relu6",
            Self::LeakyRelu(_) => "leaky_relu",
            Self::Elu => "elu",
            Self::Selu => "selu",
            Self::Gelu => "gelu",
        }
    }

    /// True when [`Activation::backward`] expects the forward outputs
    /// rather than the forward inputs.
    pub fn backward_uses_outputs(&self) -> bool {
        matches!(self, Self::Elu | Self::Selu)
    }

    /// Scalar forward value.
    #[inline]
    pub fn apply<E: Element>(&self, x: E) -> E {
        match *self {
            Self::Relu => functors::relu(x),
            Self::Relu6 => functors::relu6(x),
            Self::LeakyRelu(alpha) => functors::leaky_relu(x, alpha),
            Self::Elu => functors::elu(x),
            Self::Selu => functors::selu(x),
            Self::Gelu => functors::gelu(x),
        }
    }

    /// Scalar gradient given the incoming gradient and the saved value.
    #[inline]
    pub fn grad<E: Element>(&self, gradient: E, saved: E) -> E {
        match *self {
            Self::Relu => functors::relu_grad(gradient, saved),
            Self::Relu6 => functors::relu6_grad(gradient, saved),
            Self::LeakyRelu(alpha) => functors::leaky_relu_grad(gradient, saved, alpha),
            Self::Elu => functors::elu_grad(gradient, saved),
            Self::Selu => functors::selu_grad(gradient, saved),
            Self::Gelu => functors::gelu_grad(gradient, saved),
        }
    }

    /// Launch the forward kernel.
    pub fn forward<E: Element>(
        &self,
        ctx: &ExecutionContext,
        features: &[E],
        activations: &mut [E],
    ) -> Result<()> {
        let act = *self;
        unary_kernel(ctx, self.name(), features, activations, move |x| act.apply(x))
    }

    /// Launch the backward kernel. `saved` holds the forward outputs when
    /// [`Activation::backward_uses_outputs`] is true, the inputs otherwise.
    pub fn backward<E: Element>(
        &self,
        ctx: &ExecutionContext,
        gradients: &[E],
        saved: &[E],
        backprops: &mut [E],
    ) -> Result<()> {
        if *self == Self::Relu {
            return E::relu_grad(ctx, gradients, saved, backprops);
        }
        let act = *self;
        binary_kernel(ctx, self.name(), gradients, saved, backprops, move |g, s| act.grad(g, s))
    }
}

// ── Per-function entry points ───────────────────────────────────────

pub fn relu_forward<E: Element>(
    ctx: &ExecutionContext,
    features: &[E],
    activations: &mut [E],
) -> Result<()> {
    Activation::Relu.forward(ctx, features, activations)
}

/// `backprops[i] = features[i] > 0 ? gradients[i] : 0`; the forward
/// outputs may be passed in place of the features.
pub fn relu_backward<E: Element>(
    ctx: &ExecutionContext,
    gradients: &[E],
    features: &[E],
    backprops: &mut [E],
) -> Result<()> {
    Activation::Relu.backward(ctx, gradients, features, backprops)
}

pub fn relu6_forward<E: Element>(
    ctx: &ExecutionContext,
    features: &[E],
    activations: &mut [E],
) -> Result<()> {
    Activation::Relu6.forward(ctx, features, activations)
}

pub fn relu6_backward<E: Element>(
    ctx: &ExecutionContext,
    gradients: &[E],
    features: &[E],
    backprops: &mut [E],
) -> Result<()> {
    Activation::Relu6.backward(ctx, gradients, features, backprops)
}

pub fn leaky_relu_forward<E: Element>(
    ctx: &ExecutionContext,
    alpha: f64,
    features: &[E],
    activations: &mut [E],
) -> Result<()> {
    Activation::LeakyRelu(alpha).forward(ctx, features, activations)
}

pub fn leaky_relu_backward<E: Element>(
    ctx: &ExecutionContext,
    alpha: f64,
    gradients: &[E],
    features: &[E],
    backprops: &mut [E],
) -> Result<()> {
    Activation::LeakyRelu(alpha).backward(ctx, gradients, features, backprops)
}

pub fn elu_forward<E: Element>(
    ctx: &ExecutionContext,
    features: &[E],
    activations: &mut [E],
) -> Result<()> {
    Activation::Elu.forward(ctx, features, activations)
}

/// Takes the forward outputs, not the inputs.
pub fn elu_backward<E: Element>(
    ctx: &ExecutionContext,
    gradients: &[E],
    activations: &[E],
    backprops: &mut [E],
) -> Result<()> {
    Activation::Elu.backward(ctx, gradients, activations, backprops)
}

pub fn selu_forward<E: Element>(
    ctx: &ExecutionContext,
    features: &[E],
    activations: &mut [E],
) -> Result<()> {
    Activation::Selu.forward(ctx, features, activations)
}

/// Takes the forward outputs, not the inputs.
pub fn selu_backward<E: Element>(
    ctx: &ExecutionContext,
    gradients: &[E],
    activations: &[E],
    backprops: &mut [E],
) -> Result<()> {
    Activation::Selu.backward(ctx, gradients, activations, backprops)
}

pub fn gelu_forward<E: Element>(
    ctx: &ExecutionContext,
    features: &[E],
    activations: &mut [E],
) -> Result<()> {
    Activation::Gelu.forward(ctx, features, activations)
}

pub fn gelu_backward<E: Element>(
    ctx: &ExecutionContext,
    gradients: &[E],
    features: &[E],
    backprops: &mut [E],
) -> Result<()> {
    Activation::Gelu.backward(ctx, gradients, features, backprops)
}

/// Generic Relu gradient, one thread per element.
pub(crate) fn relu_grad_elementwise<E: Element>(
    ctx: &ExecutionContext,
    gradients: &[E],
    features: &[E],
    backprops: &mut [E],
) -> Result<()> {
    binary_kernel(ctx, "relu", gradients, features, backprops, functors::relu_grad)
}

// ── Launch helpers ──────────────────────────────────────────────────

fn unary_kernel<E, F>(
    ctx: &ExecutionContext,
    name: &str,
    input: &[E],
    output: &mut [E],
    op: F,
) -> Result<()>
where
    E: Element,
    F: Fn(E) -> E + Sync,
{
    let n = input.len();
    check_lengths(name, n, &[("output", output.len())])?;
    if n == 0 {
        return Ok(());
    }

    let cfg = LaunchConfig::for_elements(n, ctx.config().work_group_size)?;
    log::debug!("{name}<{}>: n={n} grid={} block={}", E::NAME, cfg.grid_dim, cfg.block_dim);

    let out = DeviceSliceMut::new(output);
    ctx.launch(name, cfg, |tid| {
        let i = tid.global();
        if i < n {
            // Safety: thread `i` is the only writer of index `i`.
            unsafe { out.write(i, op(input[i])) };
        }
    })
}

fn binary_kernel<E, F>(
    ctx: &ExecutionContext,
    name: &str,
    gradients: &[E],
    saved: &[E],
    backprops: &mut [E],
    op: F,
) -> Result<()>
where
    E: Element,
    F: Fn(E, E) -> E + Sync,
{
    let n = gradients.len();
    let kernel = format!("{name}_grad");
    check_lengths(&kernel, n, &[("saved", saved.len()), ("backprops", backprops.len())])?;
    if n == 0 {
        return Ok(());
    }

    let cfg = LaunchConfig::for_elements(n, ctx.config().work_group_size)?;
    log::debug!("{kernel}<{}>: n={n} grid={} block={}", E::NAME, cfg.grid_dim, cfg.block_dim);

    let out = DeviceSliceMut::new(backprops);
    ctx.launch(&kernel, cfg, |tid| {
        let i = tid.global();
        if i < n {
            // Safety: thread `i` is the only writer of index `i`.
            unsafe { out.write(i, op(gradients[i], saved[i])) };
        }
    })
}
