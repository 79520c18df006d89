//! Resource caps applied to sandbox containers at creation time.
//!
//! Docker enforces CPU limits through a period/quota pair; the fractional
//! CPU setting from configuration is multiplied out into integers here and
//! is non-negotiable once the container exists.

use serde::{Deserialize, Serialize};

/// CPU accounting period, in microseconds (100ms).
const CPU_PERIOD_MICROS: i64 = 100_000;

/// Resource caps for a single container.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceCaps {
    /// Memory limit in bytes.
    pub memory_bytes: i64,
    /// Fraction of one CPU (0, 1]. `None` leaves CPU unconstrained.
    pub cpu_fraction: Option<f64>,
}

impl ResourceCaps {
    /// Caps for a controller container.
    pub fn controller(memory_bytes: i64, cpu_fraction: f64) -> Self {
        Self {
            memory_bytes,
            cpu_fraction: Some(cpu_fraction),
        }
    }

    /// Caps for a managed node: memory only.
    pub fn node(memory_bytes: i64) -> Self {
        Self {
            memory_bytes,
            cpu_fraction: None,
        }
    }

    /// CPU accounting period in microseconds.
    pub fn cpu_period(&self) -> i64 {
        CPU_PERIOD_MICROS
    }

    /// CPU quota in microseconds per period.
    ///
    /// quota = period * fraction, e.g. 0.5 CPU = 50000 out of 100000.
    pub fn cpu_quota(&self) -> Option<i64> {
        self.cpu_fraction
            .map(|fraction| (self.cpu_period() as f64 * fraction) as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_multiplication() {
        let caps = ResourceCaps::controller(512 * 1024 * 1024, 0.5);
        assert_eq!(caps.cpu_period(), 100_000);
        assert_eq!(caps.cpu_quota(), Some(50_000));

        let caps = ResourceCaps::controller(1024, 1.0);
        assert_eq!(caps.cpu_quota(), Some(100_000));
    }

    #[test]
    fn test_node_caps_leave_cpu_unconstrained() {
        let caps = ResourceCaps::node(256 * 1024 * 1024);
        assert_eq!(caps.memory_bytes, 256 * 1024 * 1024);
        assert_eq!(caps.cpu_quota(), None);
    }
}
