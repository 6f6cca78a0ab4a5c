use serde::Deserialize;

use fleetwire_core::error::{FleetwireError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FabricConfig {
    pub version: u32,

    /// Request window used when a call passes no explicit timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Cap on an encoded payload before framing.
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            version: 1,
            request_timeout_ms: default_request_timeout_ms(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

impl FabricConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(FleetwireError::Config(format!(
                "unsupported config version: {}",
                self.version
            )));
        }
        if !(100..=120_000).contains(&self.request_timeout_ms) {
            return Err(FleetwireError::Config(
                "request_timeout_ms must be between 100 and 120000".into(),
            ));
        }
        if !(64..=16 * 1024 * 1024).contains(&self.max_payload_bytes) {
            return Err(FleetwireError::Config(
                "max_payload_bytes must be between 64 and 16777216".into(),
            ));
        }
        Ok(())
    }
}

fn default_request_timeout_ms() -> u64 {
    3_000
}

fn default_max_payload_bytes() -> usize {
    1024 * 1024
}
