//! Ledger engine configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// History page size used when the caller gives none.
    pub default_page_size: i64,
    /// Largest history page served.
    pub max_page_size: i64,
    /// Upper bound on a single operation, including its unit of work.
    pub operation_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 100,
            operation_timeout: None,
        }
    }
}

impl EngineConfig {
    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_page_size <= 0 {
            return Err("default_page_size must be positive".to_string());
        }
        if self.max_page_size < self.default_page_size {
            return Err("max_page_size must be at least default_page_size".to_string());
        }
        if let Some(timeout) = self.operation_timeout {
            if timeout.is_zero() {
                return Err("operation_timeout must be non-zero".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_page_sizes() {
        let config = EngineConfig {
            default_page_size: 50,
            max_page_size: 20,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let config = EngineConfig {
            operation_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
