//! Engine configuration.
//!
//! A `Builder` with `Option<T>` fields and sensible defaults, consumed once via `build()` into an
//! immutable, validated configuration value.

use std::num::NonZeroUsize;

use snafu::{ensure, Snafu};

use crate::item::Layout;

/// The minimum compliant admission policy: at most one item in flight at a time.
pub fn minimum_admission_policy() -> NonZeroUsize {
    NonZeroUsize::new(1).expect("1 is nonzero")
}

#[derive(Debug, Snafu)]
pub enum ConfigBuildError {
    #[snafu(display(
        "`default_data_pool_layout.primary_pool` must be a valid (non-negative) pool id"
    ))]
    InvalidDefaultLayout,
}

/// Immutable engine configuration.
///
/// Derives `serde::{Serialize, Deserialize}` so it can be loaded as a fragment of the host
/// metadata server's own configuration, the way `Layout` and `SnapContext` are in `item.rs`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EngineConfig {
    /// Upper bound on concurrently in-flight items. The design calls out that the minimum
    /// compliant policy is 1; larger values trade memory and object-store load for throughput.
    pub(crate) max_in_flight: NonZeroUsize,

    /// The layout a fresh journal is bootstrapped with by [`crate::lifecycle::Lifecycle::create`]
    /// when no journal yet exists for this metadata pool (the "legacy filesystem" bootstrap case
    /// noted in the design's open questions).
    pub(crate) default_data_pool_layout: Layout,
}

impl EngineConfig {
    pub fn max_in_flight(&self) -> NonZeroUsize {
        self.max_in_flight
    }

    pub fn default_data_pool_layout(&self) -> &Layout {
        &self.default_data_pool_layout
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    max_in_flight: Option<NonZeroUsize>,
    default_data_pool_layout: Layout,
}

impl EngineConfigBuilder {
    pub fn new(default_data_pool_layout: Layout) -> Self {
        Self {
            max_in_flight: None,
            default_data_pool_layout,
        }
    }

    /// Sets the maximum number of items allowed in flight at once.
    ///
    /// Defaults to 1, the minimum compliant admission policy.
    pub fn max_in_flight(mut self, amount: NonZeroUsize) -> Self {
        self.max_in_flight = Some(amount);
        self
    }

    pub fn build(self) -> Result<EngineConfig, ConfigBuildError> {
        ensure!(
            self.default_data_pool_layout.primary_pool >= 0,
            InvalidDefaultLayoutSnafu
        );

        Ok(EngineConfig {
            max_in_flight: self.max_in_flight.unwrap_or_else(minimum_admission_policy),
            default_data_pool_layout: self.default_data_pool_layout,
        })
    }
}
