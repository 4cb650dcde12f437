//! Bridge configuration.
//!
//! Loaded from TOML or from the environment, then handed to
//! [`crate::session::initialize`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

/// Environment variable selecting the copy policy (`wrap` or `copy`)
pub const ENV_COPY_POLICY: &str = "MXPY_COPY_POLICY";

/// Environment variable overriding the wrap threshold (element count)
pub const ENV_WRAP_THRESHOLD: &str = "MXPY_WRAP_THRESHOLD";

/// Arrays with fewer elements than this are always copied
pub const DEFAULT_WRAP_THRESHOLD: usize = 1000;

/// Blocked sweeps tolerated, once the object side has let go, before a
/// cached alias is force-detached
pub const DEFAULT_MAX_RELEASE_ATTEMPTS: u32 = 16;

/// How dense arrays cross the host boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyPolicy {
    /// Alias the existing bytes when the array is large and contiguous
    Wrap,
    /// Always duplicate; the buffer cache is not used at all
    Copy,
}

impl Default for CopyPolicy {
    fn default() -> Self {
        CopyPolicy::Wrap
    }
}

impl CopyPolicy {
    /// Get the policy name
    pub fn name(&self) -> &'static str {
        match self {
            CopyPolicy::Wrap => "wrap",
            CopyPolicy::Copy => "copy",
        }
    }
}

impl FromStr for CopyPolicy {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wrap" => Ok(CopyPolicy::Wrap),
            "copy" => Ok(CopyPolicy::Copy),
            other => Err(BridgeError::conversion_failed(
                other,
                "CopyPolicy",
                "expected 'wrap' or 'copy'",
            )),
        }
    }
}

impl fmt::Display for CopyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Configuration for a bridge session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Wrap or copy dense arrays
    pub copy_policy: CopyPolicy,

    /// Minimum element count for a zero-copy wrap
    pub wrap_threshold: usize,

    /// Blocked sweeps after the object side let go before a cached alias
    /// is copied and detached
    pub max_release_attempts: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            copy_policy: CopyPolicy::Wrap,
            wrap_threshold: DEFAULT_WRAP_THRESHOLD,
            max_release_attempts: DEFAULT_MAX_RELEASE_ATTEMPTS,
        }
    }
}

impl BridgeConfig {
    /// Parse a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> BridgeResult<Self> {
        let config: BridgeConfig = toml::from_str(source)
            .map_err(|e| BridgeError::conversion_failed("toml", "BridgeConfig", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> BridgeResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| BridgeError::conversion_failed("BridgeConfig", "toml", e.to_string()))
    }

    /// Defaults overlaid with `MXPY_COPY_POLICY` / `MXPY_WRAP_THRESHOLD`.
    pub fn from_env() -> BridgeResult<Self> {
        Self::default().with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from a variable lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> BridgeResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(policy) = lookup(ENV_COPY_POLICY) {
            self.copy_policy = policy.parse()?;
        }
        if let Some(threshold) = lookup(ENV_WRAP_THRESHOLD) {
            self.wrap_threshold = threshold.trim().parse().map_err(|_| {
                BridgeError::conversion_failed(
                    threshold.clone(),
                    "wrap_threshold",
                    "expected a non-negative element count",
                )
            })?;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> BridgeResult<()> {
        if self.max_release_attempts == 0 {
            return Err(BridgeError::conversion_failed(
                "0",
                "max_release_attempts",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}
