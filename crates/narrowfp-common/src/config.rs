//! Kernel configuration.
//!
//! Loads [`KernelConfig`] from a TOML file (`narrowfp.toml`) or string, with
//! environment variable overrides via `NARROWFP_*` prefixed variables.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::NarrowFpError;

/// Largest work-group size the execution context accepts.
pub const MAX_WORK_GROUP_SIZE: u32 = 1024;

/// Launch geometry and device behaviour for the kernels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Group size for one-thread-per-element kernels.
    /// Override: `NARROWFP_WORK_GROUP_SIZE`
    pub work_group_size: u32,

    /// Group size for the half-precision Relu gradient and packed int8 Relu.
    /// Override: `NARROWFP_RELU_GRAD_GROUP_SIZE`
    pub relu_grad_group_size: u32,

    /// Lanes that take part in the histogram's intra-group reduction.
    /// Override: `NARROWFP_HISTOGRAM_GROUP_WIDTH`
    pub histogram_group_width: u32,

    /// Grid cap for grid-stride kernels (groups resident at once).
    /// Override: `NARROWFP_MAX_RESIDENT_GROUPS`
    pub max_resident_groups: u32,

    /// Hard limit on the number of groups in one launch.
    /// Override: `NARROWFP_MAX_GRID_DIM`
    pub max_grid_dim: u32,

    /// Worker threads backing the device (0 = one per core).
    /// Override: `NARROWFP_WORKER_THREADS`
    pub worker_threads: usize,

    /// Whether packed 2-wide half-precision lanes are available.
    /// Override: `NARROWFP_NATIVE_HALF2`
    pub native_half2: bool,

    /// How many 32-bit-source quantization warnings reach WARN level per session.
    /// Override: `NARROWFP_WIDE_SOURCE_WARN_LIMIT`
    pub wide_source_warn_limit: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            work_group_size: 256,
            relu_grad_group_size: 512,
            histogram_group_width: 64,
            max_resident_groups: 65_535,
            max_grid_dim: i32::MAX as u32,
            worker_threads: 0,
            native_half2: true,
            wide_source_warn_limit: 10,
        }
    }
}

/// Errors that can occur when loading or validating a [`KernelConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invalid environment override {key}={value}: {reason}")]
    EnvOverride { key: String, value: String, reason: String },
}

impl From<ConfigError> for NarrowFpError {
    fn from(err: ConfigError) -> Self {
        NarrowFpError::Config(err.to_string())
    }
}

impl KernelConfig {
    /// Serialize the default configuration as TOML.
    pub fn default_toml() -> Result<String, ConfigError> {
        toml::to_string_pretty(&Self::default())
            .map_err(|e| ConfigError::Validation(format!("default config does not serialize: {e}")))
    }

    /// Load configuration from a TOML file, apply environment overrides and
    /// validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load from a TOML string; missing fields take their defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let mut cfg: KernelConfig = toml::from_str(toml_str)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Start from defaults and apply environment overrides only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, size) in [
            ("work_group_size", self.work_group_size),
            ("relu_grad_group_size", self.relu_grad_group_size),
            ("histogram_group_width", self.histogram_group_width),
        ] {
            validate_group_size(name, size)?;
        }
        if self.max_resident_groups == 0 {
            return Err(ConfigError::Validation("max_resident_groups must be > 0".into()));
        }
        if self.max_grid_dim == 0 {
            return Err(ConfigError::Validation("max_grid_dim must be > 0".into()));
        }
        if self.max_resident_groups > self.max_grid_dim {
            return Err(ConfigError::Validation(format!(
                "max_resident_groups ({}) must not exceed max_grid_dim ({})",
                self.max_resident_groups, self.max_grid_dim
            )));
        }
        Ok(())
    }

    /// Apply `NARROWFP_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        override_parsed("NARROWFP_WORK_GROUP_SIZE", &mut self.work_group_size)?;
        override_parsed("NARROWFP_RELU_GRAD_GROUP_SIZE", &mut self.relu_grad_group_size)?;
        override_parsed("NARROWFP_HISTOGRAM_GROUP_WIDTH", &mut self.histogram_group_width)?;
        override_parsed("NARROWFP_MAX_RESIDENT_GROUPS", &mut self.max_resident_groups)?;
        override_parsed("NARROWFP_MAX_GRID_DIM", &mut self.max_grid_dim)?;
        override_parsed("NARROWFP_WORKER_THREADS", &mut self.worker_threads)?;
        override_parsed("NARROWFP_WIDE_SOURCE_WARN_LIMIT", &mut self.wide_source_warn_limit)?;

        if let Ok(val) = std::env::var("NARROWFP_NATIVE_HALF2") {
            self.native_half2 = match val.to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::EnvOverride {
                        key: "NARROWFP_NATIVE_HALF2".into(),
                        value: val,
                        reason: "expected a boolean".into(),
                    });
                }
            };
        }

        Ok(())
    }
}

fn validate_group_size(name: &str, size: u32) -> Result<(), ConfigError> {
    if size == 0 {
        return Err(ConfigError::Validation(format!("{name} must be > 0")));
    }
    if !size.is_power_of_two() {
        return Err(ConfigError::Validation(format!(
            "{name} must be a power of two, got {size}"
        )));
    }
    if size > MAX_WORK_GROUP_SIZE {
        return Err(ConfigError::Validation(format!(
            "{name} must be <= {MAX_WORK_GROUP_SIZE}, got {size}"
        )));
    }
    Ok(())
}

fn override_parsed<T>(key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(val) = std::env::var(key) {
        *slot = val.parse::<T>().map_err(|e| ConfigError::EnvOverride {
            key: key.into(),
            value: val.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}
