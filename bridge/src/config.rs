//! Bridge configuration.

use serde::Deserialize;
use tessel_hostapi::HostLimits;

/// Configuration for one guest instance.
///
/// Controls memory and table limits, optional instruction fuel, and the
/// host-side resource limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Maximum linear memory pages (1 page = 64 KiB).
    /// Default: 256 pages = 16 MiB.
    pub max_memory_pages: u32,

    /// Maximum elements in any guest table.
    pub max_table_elements: u32,

    /// Wasmtime fuel limit (instruction metering). `None` disables metering.
    pub fuel_limit: Option<u64>,

    /// Host-side limits (handles, log lines).
    pub limits: HostLimits,

    /// Whether guest log lines are recorded in addition to being traced.
    pub enable_guest_logs: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            max_memory_pages: 256,       // 16 MiB
            max_table_elements: 65_536,
            fuel_limit: None,
            limits: HostLimits::default(),
            enable_guest_logs: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.max_memory_pages, 256);
        assert_eq!(config.fuel_limit, None);
        assert!(config.enable_guest_logs);
    }

    #[test]
    fn test_deserialize_nested_limits() {
        let config: BridgeConfig = serde_json::from_str(
            r#"{ "fuel_limit": 5000, "limits": { "max_log_lines": 8 } }"#,
        )
        .unwrap();
        assert_eq!(config.fuel_limit, Some(5000));
        assert_eq!(config.limits.max_log_lines, 8);
        assert_eq!(config.max_memory_pages, 256);
    }
}
