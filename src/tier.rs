//! Subscription tiers and grace-period resolution
//!
//! Converts raw entitlement snapshots into a discrete tier. A downgrade that
//! arrives shortly after a premium snapshot is held back for a grace window:
//! a live push can race a network blip reporting a stale inactive snapshot,
//! and flipping the UI to free and back within seconds is worse than
//! reflecting a genuine downgrade a little late.

use crate::billing::EntitlementSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Application-level subscription classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    /// No trustworthy snapshot yet; callers must not branch on billing here
    #[default]
    Unknown,
    Free,
    Premium,
}

impl SubscriptionTier {
    pub fn is_premium(&self) -> bool {
        matches!(self, SubscriptionTier::Premium)
    }

    /// Tier to gate behaviour on: `Unknown` is treated as `Free`
    pub fn conservative(&self) -> SubscriptionTier {
        match self {
            SubscriptionTier::Premium => SubscriptionTier::Premium,
            SubscriptionTier::Free | SubscriptionTier::Unknown => SubscriptionTier::Free,
        }
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionTier::Unknown => "unknown",
            SubscriptionTier::Free => "free",
            SubscriptionTier::Premium => "premium",
        };
        f.write_str(name)
    }
}

/// Last instant the resolved tier was premium (session-only, never persisted)
#[derive(Debug, Clone, Copy, Default)]
pub struct GraceState {
    last_premium_at: Option<Instant>,
}

impl GraceState {
    pub fn last_premium_at(&self) -> Option<Instant> {
        self.last_premium_at
    }
}

/// Snapshot → tier with downgrade debounce
#[derive(Debug)]
pub struct TierResolver {
    premium_entitlement: String,
    grace_period: Duration,
    grace: GraceState,
}

impl TierResolver {
    pub fn new(premium_entitlement: impl Into<String>, grace_period: Duration) -> Self {
        Self {
            premium_entitlement: premium_entitlement.into(),
            grace_period,
            grace: GraceState::default(),
        }
    }

    /// Seed the grace window from a tier restored at process start.
    ///
    /// A persisted premium tier counts as previously-observed premium, so a
    /// stale inactive snapshot right after a cold start does not flicker to
    /// free. Anything else leaves the window closed.
    pub fn with_restored_tier(mut self, tier: SubscriptionTier) -> Self {
        if tier.is_premium() {
            self.grace.last_premium_at = Some(Instant::now());
        }
        self
    }

    pub fn grace_state(&self) -> GraceState {
        self.grace
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn resolve(&mut self, snapshot: &EntitlementSnapshot) -> SubscriptionTier {
        self.resolve_at(snapshot, Instant::now())
    }

    pub fn resolve_at(&mut self, snapshot: &EntitlementSnapshot, now: Instant) -> SubscriptionTier {
        if snapshot.is_active(&self.premium_entitlement) {
            self.grace.last_premium_at = Some(now);
            return SubscriptionTier::Premium;
        }

        if let Some(last_premium_at) = self.grace.last_premium_at {
            let elapsed = now.saturating_duration_since(last_premium_at);
            if elapsed < self.grace_period {
                tracing::debug!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    grace_ms = self.grace_period.as_millis() as u64,
                    "Suppressing downgrade inside grace window"
                );
                return SubscriptionTier::Premium;
            }
        }

        SubscriptionTier::Free
    }
}
