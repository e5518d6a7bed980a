//! Per-element activation math.
//!
//! Forward functions take the input features. Backward functions take the
//! incoming gradient plus either the features or the forward outputs,
//! whichever the formula is defined on; they select rather than multiply,
//! so a masked-out gradient is exactly zero even when it is NaN or infinite.

use crate::element::{Compute, Element};

// SELU constants (Klambauer et al., 2017)
pub const SELU_SCALE: f64 = 1.050_700_987_355_480_493_419_334_985_294_6;
pub const SELU_SCALE_ALPHA: f64 = 1.758_099_340_847_376_859_940_217_520_812_3;

// tanh approximation of GELU: sqrt(2/pi) and 0.044715 * sqrt(2/pi)
pub const GELU_P1: f64 = 0.797_884_560_802_865_4;
pub const GELU_P3: f64 = 0.044_715 * 0.797_884_560_802_865_4;

pub const RELU6_CAP: f64 = 6.0;

// ── Relu family ─────────────────────────────────────────────────────

/// max(x, 0), preserving NaN.
#[inline]
pub fn relu<E: Element>(x: E) -> E {
    if x.is_nan() || x.widen() > E::Compute::ZERO { x } else { E::ZERO }
}

/// `feature > 0 ? gradient : 0`.
#[inline]
pub fn relu_grad<E: Element>(gradient: E, feature: E) -> E {
    if feature.widen() > E::Compute::ZERO { gradient } else { E::ZERO }
}

/// min(max(x, 0), 6), preserving NaN.
#[inline]
pub fn relu6<E: Element>(x: E) -> E {
    let v = x.widen();
    let cap = E::Compute::lit(RELU6_CAP);
    if x.is_nan() || (v > E::Compute::ZERO && v < cap) {
        x
    } else if v >= cap {
        E::narrow(cap)
    } else {
        E::ZERO
    }
}

#[inline]
pub fn relu6_grad<E: Element>(gradient: E, feature: E) -> E {
    let v = feature.widen();
    if v > E::Compute::ZERO && v < E::Compute::lit(RELU6_CAP) { gradient } else { E::ZERO }
}

#[inline]
pub fn leaky_relu<E: Element>(x: E, alpha: f64) -> E {
    let v = x.widen();
    if v > E::Compute::ZERO { x } else { E::narrow(E::Compute::lit(alpha) * v) }
}

#[inline]
pub fn leaky_relu_grad<E: Element>(gradient: E, feature: E, alpha: f64) -> E {
    if feature.widen() > E::Compute::ZERO {
        gradient
    } else {
        E::narrow(E::Compute::lit(alpha) * gradient.widen())
    }
}

// ── Exponential units ───────────────────────────────────────────────

/// `x >= 0 ? x : exp(x) - 1`
#[inline]
pub fn elu<E: Element>(x: E) -> E {
    let v = x.widen();
    if v < E::Compute::ZERO { E::narrow(v.exp() - E::Compute::ONE) } else { x }
}

/// Defined on the forward output `a`: `a < 0 ? g * (a + 1) : g`.
#[inline]
pub fn elu_grad<E: Element>(gradient: E, activation: E) -> E {
    let a = activation.widen();
    if a < E::Compute::ZERO {
        E::narrow(gradient.widen() * (a + E::Compute::ONE))
    } else {
        gradient
    }
}

#[inline]
pub fn selu<E: Element>(x: E) -> E {
    let v = x.widen();
    if v < E::Compute::ZERO {
        E::narrow(E::Compute::lit(SELU_SCALE_ALPHA) * (v.exp() - E::Compute::ONE))
    } else {
        E::narrow(E::Compute::lit(SELU_SCALE) * v)
    }
}

/// Defined on the forward output `a`.
#[inline]
pub fn selu_grad<E: Element>(gradient: E, activation: E) -> E {
    let a = activation.widen();
    let g = gradient.widen();
    if a < E::Compute::ZERO {
        E::narrow(g * (a + E::Compute::lit(SELU_SCALE_ALPHA)))
    } else {
        E::narrow(g * E::Compute::lit(SELU_SCALE))
    }
}

// ── GELU ────────────────────────────────────────────────────────────

/// `0.5 * x * (1 + tanh(p1 * x + p3 * x^3))`
#[inline]
pub fn gelu<E: Element>(x: E) -> E {
    let v = x.widen();
    let p1 = E::Compute::lit(GELU_P1);
    let p3 = E::Compute::lit(GELU_P3);
    let half = E::Compute::lit(0.5);
    E::narrow(half * v * (E::Compute::ONE + (p1 * v + p3 * v * v * v).tanh()))
}

/// Derivative of the tanh approximation, evaluated at the input feature.
#[inline]
pub fn gelu_grad<E: Element>(gradient: E, feature: E) -> E {
    let x = feature.widen();
    let g = gradient.widen();
    let p1 = E::Compute::lit(GELU_P1);
    let p3 = E::Compute::lit(GELU_P3);
    let three = E::Compute::lit(3.0);
    let z = p1 * x + p3 * x * x * x;
    let sech = z.cosh().recip();
    let d = E::Compute::ONE + z.tanh() + x * (p1 + three * p3 * x * x) * sech * sech;
    E::narrow(g * E::Compute::lit(0.5) * d)
}
