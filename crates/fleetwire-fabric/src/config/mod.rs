//! Fabric config loader (strict parsing).

pub mod schema;

use std::fs;
use std::path::Path;

use fleetwire_core::error::{FleetwireError, Result};

pub use schema::FabricConfig;

pub fn load_from_file(path: impl AsRef<Path>) -> Result<FabricConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| FleetwireError::Config(format!("read config failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<FabricConfig> {
    let cfg: FabricConfig = serde_yaml::from_str(s)
        .map_err(|e| FleetwireError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
