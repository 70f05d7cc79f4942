//! Host-side resource limits for one bridge instance.
//!
//! `HostLimits` bounds the host-owned state a guest can accumulate: live
//! handles and recorded log lines.

use serde::Deserialize;

/// Resource limits enforced by the host on behalf of one guest instance.
///
/// The guest cannot exceed them. Handle overflow is a marshalling error;
/// log overflow is silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HostLimits {
    /// Maximum number of slots the handle table may grow to.
    pub max_handles: u32,
    /// Maximum number of guest log lines kept per instance.
    pub max_log_lines: u32,
    /// Maximum length of a single guest log line in bytes.
    pub max_log_line_len: usize,
}

impl Default for HostLimits {
    fn default() -> Self {
        Self {
            max_handles: 1 << 20,
            max_log_lines: 1024,
            max_log_line_len: 4096,
        }
    }
}
