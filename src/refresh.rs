//! Cache-then-network refresh
//!
//! Reads return the billing client's cached customer info immediately, so
//! nothing waits on the network, while a forced reconciliation runs in the
//! background and feeds its result through the listener. The store is
//! eventually consistent with the provider; reads are never blocked.
//!
//! Refreshes are automatic, so they fail closed: a failure that leaves no
//! trustworthy tier behind falls back to `Free` instead of `Unknown`.

use crate::billing::{BillingClient, EntitlementSnapshot};
use crate::error::{Result, SyncError};
use crate::gate::ConfigurationGate;
use crate::listener::{ListenerHandle, SnapshotSource};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Host application lifecycle transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Foreground,
    Background,
}

pub struct SafeRefresh {
    billing: Arc<dyn BillingClient>,
    gate: Arc<ConfigurationGate>,
    listener: ListenerHandle,
}

impl SafeRefresh {
    pub fn new(
        billing: Arc<dyn BillingClient>,
        gate: Arc<ConfigurationGate>,
        listener: ListenerHandle,
    ) -> Self {
        Self {
            billing,
            gate,
            listener,
        }
    }

    /// Return cached entitlements now; reconcile with the network in the background
    pub async fn safe_refresh(&self) -> Result<EntitlementSnapshot> {
        let (cached, _reconciliation) = self.refresh_with_handle().await?;
        Ok(cached)
    }

    /// [`safe_refresh`](Self::safe_refresh), also returning the background
    /// reconciliation task so callers can wait on it.
    pub async fn refresh_with_handle(&self) -> Result<(EntitlementSnapshot, JoinHandle<()>)> {
        self.gate.wait_ready().await?;

        let cached = match self.billing.get_customer_info().await {
            Ok(cached) => cached,
            Err(e) => {
                self.listener.fallback_to_free().await;
                return Err(SyncError::Refresh(e.to_string()));
            }
        };
        self.listener
            .submit(cached.clone(), SnapshotSource::Refresh)
            .await;

        let reconciliation = self.spawn_reconciliation();
        Ok((cached, reconciliation))
    }

    fn spawn_reconciliation(&self) -> JoinHandle<()> {
        let billing = self.billing.clone();
        let listener = self.listener.clone();
        tokio::spawn(async move {
            if let Err(e) = billing.sync_purchases().await {
                // The cached value stays authoritative until the next success
                warn!(error = %e, "Background purchase sync failed");
                listener.fallback_to_free().await;
                return;
            }
            match billing.get_customer_info().await {
                Ok(fresh) => listener.submit(fresh, SnapshotSource::Refresh).await,
                Err(e) => {
                    warn!(error = %e, "Customer info fetch after sync failed");
                    listener.fallback_to_free().await;
                }
            }
        })
    }
}

/// Runs a safe refresh once at configuration and on every return to foreground
pub struct ForegroundRefreshTrigger;

impl ForegroundRefreshTrigger {
    pub fn spawn(
        refresher: Arc<SafeRefresh>,
        lifecycle: Option<mpsc::Receiver<AppLifecycle>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            Self::refresh(&refresher, "initial").await;

            let Some(mut lifecycle) = lifecycle else {
                debug!("No lifecycle events provided, foreground refresh disabled");
                return;
            };

            // Configuration happens while the app is active
            let mut previous = AppLifecycle::Foreground;
            while let Some(current) = lifecycle.recv().await {
                if previous == AppLifecycle::Background && current == AppLifecycle::Foreground {
                    Self::refresh(&refresher, "foreground").await;
                }
                previous = current;
            }
            debug!("Lifecycle stream closed");
        })
    }

    async fn refresh(refresher: &SafeRefresh, reason: &'static str) {
        match refresher.safe_refresh().await {
            Ok(_) => info!(reason, "Entitlements refreshed from cache"),
            Err(e) => warn!(reason, error = %e, "Entitlement refresh failed"),
        }
    }
}
