//! Registry config loader (strict parsing).

pub mod schema;

use std::fs;

use metric_registry_core::{MetricsError, Result};

pub use schema::{RegistryConfig, ServerMode, ServerSection};

pub fn load_from_file(path: &str) -> Result<RegistryConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| MetricsError::Config(format!("read {path} failed: {e}")))?;
    load_from_str(&s)
}

pub fn load_from_str(s: &str) -> Result<RegistryConfig> {
    let cfg: RegistryConfig = serde_yaml::from_str(s)
        .map_err(|e| MetricsError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
