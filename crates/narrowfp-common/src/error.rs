//! Error types for the narrowfp kernels.
//!
//! The taxonomy follows the three failure classes a kernel caller can see:
//!
//! - configuration errors (bad format widths, bad config values) detected
//!   before anything is launched,
//! - fatal launch errors raised by the execution context,
//! - argument errors for mismatched or undersized buffers.
//!
//! Degenerate input (zero elements) is never an error.

use thiserror::Error;

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, NarrowFpError>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum NarrowFpError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Format error: {0}")]
    Format(#[from] FormatError),
}

impl NarrowFpError {
    /// True for errors the caller caused by asking for something this
    /// library cannot do (as opposed to a device failure).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Format(_)
                | Self::Kernel(KernelError::UnsupportedFormat { .. })
        )
    }

    /// True for fatal launch/execution failures of the execution context.
    pub fn is_fatal_launch(&self) -> bool {
        matches!(
            self,
            Self::Kernel(KernelError::LaunchFailed { .. } | KernelError::ExecutionFailed { .. })
        )
    }
}

/// Errors raised by kernel dispatch and launch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KernelError {
    #[error("Invalid kernel arguments: {reason}")]
    InvalidArguments { reason: String },

    #[error(
        "Unsupported narrow format: exponent width {exponent_width}, mantissa width \
         {mantissa_width} for {source_bits}-bit source elements"
    )]
    UnsupportedFormat { exponent_width: u32, mantissa_width: u32, source_bits: u32 },

    #[error("Kernel launch failed ({kernel}): {reason}")]
    LaunchFailed { kernel: String, reason: String },

    #[error("Kernel execution failed ({kernel}): {reason}")]
    ExecutionFailed { kernel: String, reason: String },
}

/// Violations of the narrow format invariants
/// `1 <= we <= 8`, `wm <= 7`, `we + wm + 1 <= source width`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("exponent width {0} outside 1..=8")]
    ExponentWidth(u32),

    #[error("mantissa width {0} outside 0..=7")]
    MantissaWidth(u32),

    #[error("format needs {needed} bits but the source element has {source_bits}")]
    TooWide { needed: u32, source_bits: u32 },
}
