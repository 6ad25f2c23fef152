//! Identity reconciliation
//!
//! Keeps the billing provider's remote identity aligned with the local auth
//! user. `log_in`/`log_out` each cost a network round-trip and a fresh
//! entitlement fetch, so they are only issued when the two identities
//! actually diverge.
//!
//! Reconciliation is best effort: failures are logged and reported in the
//! outcome, never raised, and a tier still `Unknown` falls back to `Free`.
//! The next foreground or identity change retries.

use crate::billing::{BillingClient, BillingIdentity};
use crate::error::{Result, SyncError};
use crate::gate::ConfigurationGate;
use crate::listener::{ListenerHandle, SnapshotSource};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What a reconciliation did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentitySyncOutcome {
    /// Gate never started; nothing to sync yet
    NotConfigured,
    /// Remote identity already matched
    Unchanged,
    LoggedIn(String),
    LoggedOut,
    Failed(SyncError),
}

pub struct IdentitySyncer {
    billing: Arc<dyn BillingClient>,
    gate: Arc<ConfigurationGate>,
    listener: ListenerHandle,
    revalidate_on_sign_out: bool,
    /// Serializes reconciliations so two changes can't both see the old identity
    in_flight: Mutex<()>,
}

impl IdentitySyncer {
    pub fn new(
        billing: Arc<dyn BillingClient>,
        gate: Arc<ConfigurationGate>,
        listener: ListenerHandle,
    ) -> Self {
        Self {
            billing,
            gate,
            listener,
            revalidate_on_sign_out: false,
            in_flight: Mutex::new(()),
        }
    }

    /// Reset the entitlement store before logging out, so the snapshot that
    /// follows the logout re-initializes it
    pub fn with_revalidate_on_sign_out(mut self, enabled: bool) -> Self {
        self.revalidate_on_sign_out = enabled;
        self
    }

    /// Reconcile the remote identity with `local_user` (`None` = signed out)
    pub async fn sync_identity(&self, local_user: Option<&str>) -> IdentitySyncOutcome {
        if !self.gate.is_started() {
            debug!("Identity sync skipped, billing client not configured");
            return IdentitySyncOutcome::NotConfigured;
        }

        let _guard = self.in_flight.lock().await;
        match self.reconcile(local_user).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(user_id = ?local_user, error = %e, "Identity sync failed");
                self.listener.fallback_to_free().await;
                IdentitySyncOutcome::Failed(SyncError::IdentitySync(e.to_string()))
            }
        }
    }

    async fn reconcile(&self, local_user: Option<&str>) -> Result<IdentitySyncOutcome> {
        self.gate.wait_ready().await?;

        let remote = self.billing.get_customer_info().await?.original_app_user_id;

        match (local_user, &remote) {
            (None, BillingIdentity::Anonymous(_)) => {
                debug!("Already anonymous, skipping logout");
                Ok(IdentitySyncOutcome::Unchanged)
            }
            (None, BillingIdentity::Identified(remote_id)) => {
                info!(remote_id = %remote_id, "Local sign-out, logging out billing identity");
                if self.revalidate_on_sign_out {
                    self.listener.reset().await;
                }
                self.billing.log_out().await?;

                // Providers may not push after a logout; revalidate from here
                match self.billing.get_customer_info().await {
                    Ok(snapshot) => self.listener.submit(snapshot, SnapshotSource::Identity).await,
                    Err(e) => {
                        warn!(error = %e, "Customer info fetch after logout failed");
                        self.listener.fallback_to_free().await;
                    }
                }
                Ok(IdentitySyncOutcome::LoggedOut)
            }
            (Some(user_id), BillingIdentity::Identified(remote_id)) if remote_id == user_id => {
                debug!(user_id, "Billing identity already matches");
                Ok(IdentitySyncOutcome::Unchanged)
            }
            (Some(user_id), _) => {
                info!(user_id, remote = %remote, "Logging in billing identity");
                let snapshot = self.billing.log_in(user_id).await?;
                self.listener.submit(snapshot, SnapshotSource::Identity).await;
                Ok(IdentitySyncOutcome::LoggedIn(user_id.to_string()))
            }
        }
    }
}
