//! Configuration loading and validation
//!
//! All thresholds are static input at process start. Loading fails closed:
//! any out-of-range value rejects the whole config.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// Re-export component configs
pub use crate::detector::DetectorConfig;
pub use crate::orchestrator::OrchestratorConfig;
pub use crate::shaping::ShapingConfig;
pub use crate::wallet::WalletPoolConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub wallet_pool: WalletPoolConfig,

    #[serde(default)]
    pub shaping: ShapingConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    /// Fixed seed for all random sources; unset in production
    #[serde(default)]
    pub seed: Option<u64>,
}

impl CoreConfig {
    pub fn new(initial_profile: impl Into<String>) -> Self {
        Self {
            orchestrator: OrchestratorConfig::new(initial_profile),
            wallet_pool: WalletPoolConfig::default(),
            shaping: ShapingConfig::default(),
            detector: DetectorConfig::default(),
            seed: None,
        }
    }

    /// Validate every section; `Error::Config` on the first violation
    pub fn validate(&self) -> Result<()> {
        self.orchestrator.validate()?;
        self.wallet_pool.validate()?;
        self.shaping.validate()?;
        self.detector.validate()?;
        Ok(())
    }

    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_json(&content)
    }
}
