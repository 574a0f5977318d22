//! CPU backend configuration.
//!
//! Values come from three places, later ones overriding earlier ones:
//! defaults, environment variables ([`CpuConfig::from_env`]) and the
//! parameter string passed to the registry (`"CPU:async=immediate"`).

use bon::bon;
use kiln_device::error::InvalidParamsSnafu;
use kiln_device::{CpuBufferType, Result};

/// When asynchronous transfers run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AsyncMode {
    /// Queue transfers and run them on `synchronize`.
    #[default]
    Deferred,

    /// Run transfers before the `_async` call returns.
    Immediate,
}

impl AsyncMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "deferred" | "DEFERRED" => Some(Self::Deferred),
            "immediate" | "IMMEDIATE" => Some(Self::Immediate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuConfig {
    pub async_mode: AsyncMode,
    /// Alignment of tensor offsets in buffers of this backend. Power of two.
    pub alignment: usize,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self { async_mode: AsyncMode::default(), alignment: CpuBufferType::DEFAULT_ALIGNMENT }
    }
}

#[bon]
impl CpuConfig {
    #[builder]
    pub fn builder(
        #[builder(default)] async_mode: AsyncMode,
        #[builder(default = CpuBufferType::DEFAULT_ALIGNMENT)] alignment: usize,
    ) -> Self {
        Self { async_mode, alignment }
    }

    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// * `KILN_CPU_ASYNC` - `deferred` (default) or `immediate`
    /// * `KILN_CPU_ALIGNMENT` - Buffer alignment in bytes (default: 64)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let async_mode =
            std::env::var("KILN_CPU_ASYNC").ok().and_then(|s| AsyncMode::parse(&s)).unwrap_or_default();
        let alignment = std::env::var("KILN_CPU_ALIGNMENT")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|a| a.is_power_of_two())
            .unwrap_or(CpuBufferType::DEFAULT_ALIGNMENT);

        Self { async_mode, alignment }
    }

    /// Apply a comma separated `key=value` list on top of `self`.
    ///
    /// Recognized keys are `async` and `alignment`. An empty string leaves
    /// the configuration unchanged.
    pub fn with_params(mut self, params: &str) -> Result<Self> {
        for pair in params.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let Some((key, value)) = pair.split_once('=') else {
                return invalid(params, format!("expected key=value, got '{pair}'"));
            };
            match key.trim() {
                "async" => match AsyncMode::parse(value.trim()) {
                    Some(mode) => self.async_mode = mode,
                    None => return invalid(params, format!("unknown async mode '{}'", value.trim())),
                },
                "alignment" => match value.trim().parse::<usize>() {
                    Ok(alignment) if alignment.is_power_of_two() => self.alignment = alignment,
                    _ => return invalid(params, format!("alignment '{}' is not a power of two", value.trim())),
                },
                other => return invalid(params, format!("unknown key '{other}'")),
            }
        }
        Ok(self)
    }

    /// Environment configuration overridden by `params`.
    pub fn from_params(params: &str) -> Result<Self> {
        Self::from_env().with_params(params)
    }
}

fn invalid<T>(params: &str, reason: String) -> Result<T> {
    InvalidParamsSnafu { backend: "CPU", params, reason }.fail()
}
