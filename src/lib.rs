//! Entitlement Sync - subscription tier synchronization engine
//!
//! Keeps a user's subscription tier consistent between two independently
//! operated backends, the local auth identity provider and a third-party
//! billing/entitlement provider, and exposes it as a single reactive value
//! that never flickers between tiers because of stale caches or latency.
//!
//! # Architecture
//!
//! - **ConfigurationGate**: configures the billing client exactly once; every
//!   other operation awaits its readiness
//! - **EntitlementListener**: single consumer that resolves snapshots through
//!   the **TierResolver** (with a downgrade grace window) into the
//!   **EntitlementStore**
//! - **IdentitySyncer**: calls `log_in`/`log_out` only when local and remote
//!   identities diverge
//! - **SafeRefresh** / **ForegroundRefreshTrigger**: cache-then-network reads
//!   at startup and on every return to foreground
//!
//! # Example
//!
//! ```rust,ignore
//! use entitlement_sync::{EntitlementEngine, EngineConfig, MemoryTierCache};
//!
//! let engine = EntitlementEngine::new(config, billing, Arc::new(MemoryTierCache::new()));
//! engine.start(Some("user_42")).await?;
//!
//! let _sub = engine.on_change(|state| println!("tier is now {}", state.tier));
//! engine.sync_identity(None).await; // local sign-out
//! ```

// Billing provider surface
pub mod billing;

// Engine configuration
pub mod config;

// Composition root
pub mod engine;

// Error types
pub mod error;

pub mod gate;
pub mod identity;
pub mod listener;
pub mod persist;
pub mod refresh;
pub mod store;
pub mod tier;

pub use billing::{
    BillingClient, BillingIdentity, EntitlementSnapshot, EntitlementStatus, EntitlementUpdates,
    HttpBillingClient,
};
pub use config::EngineConfig;
pub use engine::EntitlementEngine;
pub use error::{Result, SyncError};
pub use gate::{ConfigurationGate, ConfigurationState};
pub use identity::{IdentitySyncOutcome, IdentitySyncer};
pub use listener::{EntitlementListener, ListenerHandle, SnapshotSource};
pub use persist::{FileTierCache, MemoryTierCache, TierCache};
pub use refresh::{AppLifecycle, ForegroundRefreshTrigger, SafeRefresh};
pub use store::{ChangeSubscription, EntitlementState, EntitlementStore};
pub use tier::{GraceState, SubscriptionTier, TierResolver};
