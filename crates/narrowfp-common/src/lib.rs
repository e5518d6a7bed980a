//! Common types for the narrowfp kernels
//!
//! Error handling, kernel configuration and the diagnostics sink shared by
//! every kernel crate in the workspace.

pub mod config;
pub mod diagnostics;
pub mod error;

pub use config::{ConfigError, KernelConfig, MAX_WORK_GROUP_SIZE};
pub use diagnostics::{DiagnosticSink, NullSink, RateLimitedSink};
pub use error::*;
