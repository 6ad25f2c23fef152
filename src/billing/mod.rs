//! Billing provider surface
//!
//! The billing SDK is an external collaborator: it answers asynchronously,
//! may serve stale cached data, and pushes entitlement changes on its own
//! schedule. Everything in this crate talks to it through [`BillingClient`].

mod http;
mod snapshot;

pub use http::HttpBillingClient;
pub use snapshot::{BillingIdentity, EntitlementSnapshot, EntitlementStatus, ANONYMOUS_ID_PREFIX};

use crate::error::{Result, SyncError};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Minimum billing SDK surface the engine depends on.
///
/// `configure` is documented by providers as call-once; the engine enforces
/// that through the configuration gate, implementations need not.
#[async_trait]
pub trait BillingClient: Send + Sync {
    /// One-time SDK configuration, optionally binding a local user id
    async fn configure(&self, api_key: &str, app_user_id: Option<&str>) -> Result<()>;

    /// Bind the remote identity to a local user id
    async fn log_in(&self, app_user_id: &str) -> Result<EntitlementSnapshot>;

    /// Drop the bound identity and fall back to an anonymous one
    async fn log_out(&self) -> Result<()>;

    /// Current customer info (may be served from cache)
    async fn get_customer_info(&self) -> Result<EntitlementSnapshot>;

    /// Force a network reconciliation of purchases
    async fn sync_purchases(&self) -> Result<()>;

    /// Purchase a product; backends that cannot purchase return `Purchase`
    async fn purchase(&self, product_id: &str) -> Result<EntitlementSnapshot> {
        Err(SyncError::Purchase(format!(
            "purchasing {} is not supported by this billing backend",
            product_id
        )))
    }

    /// Subscribe to pushed entitlement changes
    fn add_entitlement_update_listener(&self) -> EntitlementUpdates;
}

/// Push subscription returned by [`BillingClient::add_entitlement_update_listener`].
///
/// Dropping it unsubscribes.
pub struct EntitlementUpdates {
    rx: broadcast::Receiver<EntitlementSnapshot>,
}

impl EntitlementUpdates {
    pub fn new(rx: broadcast::Receiver<EntitlementSnapshot>) -> Self {
        Self { rx }
    }

    /// Next pushed snapshot, or `None` once the client is gone.
    ///
    /// A lagging subscriber skips ahead; only the latest snapshots matter.
    pub async fn next(&mut self) -> Option<EntitlementSnapshot> {
        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Entitlement listener lagged, skipping stale updates");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
