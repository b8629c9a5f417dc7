//! Configuration management for Quarry.
//!
//! Provides runtime configuration for drivers, page sizing and the memory
//! accountant ("breaker").

use common_error::{QuarryError, QuarryResult};
use serde::{Deserialize, Serialize};

/// Default number of positions per page produced by sources and blocking
/// operators.
pub const DEFAULT_PAGE_SIZE: usize = 8192;

/// Default number of loop iterations a driver runs before yielding.
pub const DEFAULT_MAX_ITERATIONS: usize = 10_000;

/// Global Quarry configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarryConfig {
    /// Execution configuration.
    pub execution: ExecutionConfig,
    /// Memory accountant configuration.
    pub breaker: BreakerConfig,
}

impl QuarryConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> QuarryResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that parse but cannot be honoured.
    pub fn validate(&self) -> QuarryResult<()> {
        self.breaker.validate()
    }

    /// Serialize the configuration as pretty JSON.
    pub fn to_json_string(&self) -> QuarryResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Driver execution configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Target number of positions per emitted page.
    pub page_size: usize,
    /// Number of drivers to run per partitioned source (None = one per core).
    pub parallelism: Option<usize>,
    /// Loop iterations a driver runs before yielding back to the scheduler.
    pub max_iterations_per_slice: usize,
    /// Collect per-operator metrics.
    pub collect_metrics: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            parallelism: None,
            max_iterations_per_slice: DEFAULT_MAX_ITERATIONS,
            collect_metrics: true,
        }
    }
}

/// Memory accountant flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BreakerKind {
    /// Track usage but never refuse an allocation.
    #[default]
    Unlimited,
    /// Refuse allocations past `limit_bytes`.
    Limited,
}

/// Memory accountant configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Accountant flavour.
    pub kind: BreakerKind,
    /// Byte budget, only read for [`BreakerKind::Limited`].
    pub limit_bytes: Option<usize>,
}

impl BreakerConfig {
    /// A limited breaker with the given budget.
    pub fn limited(limit_bytes: usize) -> Self {
        Self {
            kind: BreakerKind::Limited,
            limit_bytes: Some(limit_bytes),
        }
    }

    /// A limited breaker needs a non-zero budget.
    pub fn validate(&self) -> QuarryResult<()> {
        match (self.kind, self.limit_bytes) {
            (BreakerKind::Limited, None | Some(0)) => Err(QuarryError::invalid_argument(
                "breaker kind [limited] requires a positive limit_bytes",
            )),
            _ => Ok(()),
        }
    }

    /// The effective limit in bytes, 0 meaning unlimited.
    pub fn effective_limit(&self) -> usize {
        match self.kind {
            BreakerKind::Unlimited => 0,
            BreakerKind::Limited => self.limit_bytes.unwrap_or(0),
        }
    }
}
