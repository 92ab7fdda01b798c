// packages/engine/src/runtime/resource_limiter.rs
//! Resource limiting for run containers
//!
//! Provides control over:
//! - Memory consumption (bytes, swap disabled)
//! - Network access (on/off)

use crate::utils::config::RunConfig;
use serde::{Deserialize, Serialize};

/// Smallest memory limit a request may ask for
pub const MIN_MEMORY_LIMIT: i64 = 4 * 1024 * 1024;

/// Resource limits for one container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in bytes
    pub memory_limit: i64,

    /// Disable networking inside the container
    pub network_disabled: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_limit: 64 * 1024 * 1024,
            network_disabled: true,
        }
    }
}

impl ResourceLimits {
    /// Memory + swap limit; equal to the memory limit so no swap is available
    pub fn memory_swap(&self) -> i64 {
        self.memory_limit
    }

    /// Validate resource limits
    pub fn validate(&self) -> Result<(), String> {
        if self.memory_limit < MIN_MEMORY_LIMIT {
            return Err(format!(
                "Memory limit cannot be less than {} bytes",
                MIN_MEMORY_LIMIT
            ));
        }
        Ok(())
    }
}

/// Resolves the limits each run gets
#[derive(Debug, Clone)]
pub struct ResourceLimiter {
    /// Default limits, also the ceiling for per-request overrides
    default_limits: ResourceLimits,
}

impl ResourceLimiter {
    pub fn new(default_limits: ResourceLimits) -> Self {
        Self { default_limits }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(ResourceLimits {
            memory_limit: config.memory_limit,
            network_disabled: config.network_disabled,
        })
    }

    pub fn default_limits(&self) -> &ResourceLimits {
        &self.default_limits
    }

    /// Limits for a run, honouring a requested memory limit
    ///
    /// Requests can lower the memory limit down to [`MIN_MEMORY_LIMIT`] but
    /// never raise it above the configured default.
    pub fn limits_for(&self, requested_memory: Option<i64>) -> ResourceLimits {
        let mut limits = self.default_limits;

        if let Some(requested) = requested_memory.filter(|m| *m > 0) {
            limits.memory_limit = requested
                .max(MIN_MEMORY_LIMIT)
                .min(self.default_limits.memory_limit);
        }

        limits
    }
}

impl Default for ResourceLimiter {
    fn default() -> Self {
        Self::new(ResourceLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.memory_limit, 67_108_864);
        assert_eq!(limits.memory_swap(), limits.memory_limit);
        assert!(limits.network_disabled);
    }

    #[test]
    fn test_validation() {
        assert!(ResourceLimits::default().validate().is_ok());

        let too_small = ResourceLimits {
            memory_limit: 1024,
            ..Default::default()
        };
        assert!(too_small.validate().is_err());
    }

    #[test]
    fn test_requested_memory_is_capped() {
        let limiter = ResourceLimiter::default();

        assert_eq!(limiter.limits_for(None).memory_limit, 64 * 1024 * 1024);
        assert_eq!(limiter.limits_for(Some(0)).memory_limit, 64 * 1024 * 1024);
        assert_eq!(
            limiter.limits_for(Some(32 * 1024 * 1024)).memory_limit,
            32 * 1024 * 1024
        );
        assert_eq!(
            limiter.limits_for(Some(1024 * 1024 * 1024)).memory_limit,
            64 * 1024 * 1024
        );
        assert_eq!(limiter.limits_for(Some(1)).memory_limit, MIN_MEMORY_LIMIT);
    }

    #[test]
    fn test_network_toggle_is_global() {
        let limiter = ResourceLimiter::new(ResourceLimits {
            network_disabled: false,
            ..Default::default()
        });
        assert!(!limiter.limits_for(Some(8 * 1024 * 1024)).network_disabled);
    }
}
