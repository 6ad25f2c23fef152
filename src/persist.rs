//! Tier persistence across process restarts
//!
//! Only the tier survives a restart, to avoid a flash of `Unknown` on cold
//! start. `initialized` and the grace window describe this session and are
//! never written.

use crate::error::Result;
use crate::tier::SubscriptionTier;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;

/// Storage for the last resolved tier
pub trait TierCache: Send + Sync {
    fn load(&self) -> Result<Option<SubscriptionTier>>;
    fn save(&self, tier: SubscriptionTier) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedTier {
    tier: SubscriptionTier,
}

/// JSON file cache, written through a temp file and rename
pub struct FileTierCache {
    path: PathBuf,
}

impl FileTierCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TierCache for FileTierCache {
    fn load(&self) -> Result<Option<SubscriptionTier>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let persisted: PersistedTier = serde_json::from_str(&content)?;
        match persisted.tier {
            SubscriptionTier::Unknown => Ok(None),
            tier => Ok(Some(tier)),
        }
    }

    fn save(&self, tier: SubscriptionTier) -> Result<()> {
        if tier == SubscriptionTier::Unknown {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(&PersistedTier { tier })?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-process cache, for hosts that persist elsewhere and for tests
#[derive(Default)]
pub struct MemoryTierCache {
    tier: Mutex<Option<SubscriptionTier>>,
}

impl MemoryTierCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tier(tier: SubscriptionTier) -> Self {
        Self {
            tier: Mutex::new(Some(tier)),
        }
    }
}

impl TierCache for MemoryTierCache {
    fn load(&self) -> Result<Option<SubscriptionTier>> {
        Ok(*self.tier.lock().unwrap_or_else(|e| e.into_inner()))
    }

    fn save(&self, tier: SubscriptionTier) -> Result<()> {
        if tier != SubscriptionTier::Unknown {
            *self.tier.lock().unwrap_or_else(|e| e.into_inner()) = Some(tier);
        }
        Ok(())
    }
}
