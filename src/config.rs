// SPDX-License-Identifier: GPL-3.0-only

//! Capture session configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for a capture session
///
/// Both fields are fixed once streaming starts; change them between
/// sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Kernel buffers to request; the driver may grant fewer
    pub buffer_count: u32,
    /// Upper bound for one readiness wait inside the capture loop; also
    /// bounds how promptly a stop request is observed
    pub timeout_secs: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        CaptureConfig {
            buffer_count: 16,
            timeout_secs: 5,
        }
    }
}

impl CaptureConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CaptureConfig::default();
        assert_eq!(config.buffer_count, 16);
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: CaptureConfig = serde_json::from_str(r#"{"buffer_count": 4}"#).unwrap();
        assert_eq!(config.buffer_count, 4);
        assert_eq!(config.timeout_secs, 5);
    }

    #[test]
    fn test_round_trip() {
        let config = CaptureConfig {
            buffer_count: 8,
            timeout_secs: 2,
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: CaptureConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
