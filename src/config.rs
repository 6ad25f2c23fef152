//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Public API key for the billing provider
    #[serde(default)]
    pub api_key: String,

    /// Billing provider REST endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Entitlement that maps to the premium tier
    #[serde(default = "default_premium_entitlement")]
    pub premium_entitlement: String,

    /// Downgrade grace window in seconds
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// How long the HTTP client serves cached customer info
    #[serde(default = "default_customer_info_cache")]
    pub customer_info_cache_secs: u64,

    /// Where the last resolved tier is persisted (optional)
    #[serde(default)]
    pub tier_cache_path: Option<PathBuf>,

    /// Listener channel buffer
    #[serde(default = "default_channel_capacity")]
    pub update_channel_capacity: usize,

    /// Mark the store uninitialized when the local user signs out
    #[serde(default = "default_true")]
    pub revalidate_on_sign_out: bool,
}

// Defaults
fn default_base_url() -> String { "https://api.revenuecat.com".to_string() }
fn default_premium_entitlement() -> String { "premium".to_string() }
fn default_grace_period() -> u64 { 20 }
fn default_customer_info_cache() -> u64 { 300 } // 5 minutes
fn default_channel_capacity() -> usize { 64 }
fn default_true() -> bool { true }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            premium_entitlement: default_premium_entitlement(),
            grace_period_secs: default_grace_period(),
            customer_info_cache_secs: default_customer_info_cache(),
            tier_cache_path: None,
            update_channel_capacity: default_channel_capacity(),
            revalidate_on_sign_out: true,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file, falling back to defaults when it does not exist
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn customer_info_ttl(&self) -> Duration {
        Duration::from_secs(self.customer_info_cache_secs)
    }
}
