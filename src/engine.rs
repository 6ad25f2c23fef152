//! Entitlement engine
//!
//! Composition root that owns the configuration gate, the listener, the
//! identity syncer and the refresher, and exposes the only sanctioned read
//! path for the subscription tier.

use crate::billing::{BillingClient, EntitlementSnapshot};
use crate::config::EngineConfig;
use crate::error::{Result, SyncError};
use crate::gate::{ConfigurationGate, ConfigurationState};
use crate::identity::{IdentitySyncOutcome, IdentitySyncer};
use crate::listener::{EntitlementListener, ListenerHandle, SnapshotSource};
use crate::persist::TierCache;
use crate::refresh::{AppLifecycle, ForegroundRefreshTrigger, SafeRefresh};
use crate::store::{ChangeSubscription, EntitlementState, EntitlementStore};
use crate::tier::{SubscriptionTier, TierResolver};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

type TaskList = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// Entitlement synchronization engine
///
/// # Example
///
/// ```rust,ignore
/// use entitlement_sync::{EngineConfig, EntitlementEngine, HttpBillingClient, FileTierCache};
///
/// let config = EngineConfig::from_file("entitlement-sync.toml")?;
/// let billing = Arc::new(HttpBillingClient::from_config(&config));
/// let cache = Arc::new(FileTierCache::new("/data/tier.json"));
///
/// let engine = EntitlementEngine::new(config, billing, cache)
///     .with_lifecycle(lifecycle_rx);
///
/// // Configure once, bound to the signed-in user
/// engine.start(Some("user_42")).await?;
///
/// if engine.read().tier.conservative().is_premium() {
///     // unlock premium features
/// }
/// ```
pub struct EntitlementEngine {
    config: EngineConfig,
    billing: Arc<dyn BillingClient>,
    gate: Arc<ConfigurationGate>,
    store: Arc<EntitlementStore>,
    listener: ListenerHandle,
    identity: Arc<IdentitySyncer>,
    refresher: Arc<SafeRefresh>,
    lifecycle: Mutex<Option<mpsc::Receiver<AppLifecycle>>>,
    tasks: TaskList,
}

impl EntitlementEngine {
    /// Build the engine and spawn its listener.
    ///
    /// Must be called from within a tokio runtime. The persisted tier (if
    /// any) is restored immediately so readers never see a cold-start flash
    /// of `Unknown`.
    pub fn new(
        config: EngineConfig,
        billing: Arc<dyn BillingClient>,
        cache: Arc<dyn TierCache>,
    ) -> Self {
        let restored = match cache.load() {
            Ok(tier) => tier.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Failed to load persisted tier");
                SubscriptionTier::Unknown
            }
        };
        if restored != SubscriptionTier::Unknown {
            info!(tier = %restored, "Restored persisted tier");
        }

        let store = Arc::new(EntitlementStore::restored(restored));
        let resolver = TierResolver::new(config.premium_entitlement.clone(), config.grace_period())
            .with_restored_tier(restored);
        let (listener, listener_handle) = EntitlementListener::new(
            resolver,
            store.clone(),
            cache,
            config.update_channel_capacity,
        );
        let listener_task = listener.spawn();

        let gate = Arc::new(ConfigurationGate::new(billing.clone(), config.api_key.clone()));
        let identity = Arc::new(
            IdentitySyncer::new(billing.clone(), gate.clone(), listener_handle.clone())
                .with_revalidate_on_sign_out(config.revalidate_on_sign_out),
        );
        let refresher = Arc::new(SafeRefresh::new(
            billing.clone(),
            gate.clone(),
            listener_handle.clone(),
        ));

        Self {
            config,
            billing,
            gate,
            store,
            listener: listener_handle,
            identity,
            refresher,
            lifecycle: Mutex::new(None),
            tasks: Arc::new(Mutex::new(vec![listener_task])),
        }
    }

    /// Foreground/background events from the host; consumed at `start`
    pub fn with_lifecycle(self, lifecycle: mpsc::Receiver<AppLifecycle>) -> Self {
        *lock(&self.lifecycle) = Some(lifecycle);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Configuration progress; configuring goes through [`start`](Self::start)
    pub fn configuration_state(&self) -> ConfigurationState {
        self.gate.state()
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    /// Configure the billing client once, then attach the push listener and
    /// start foreground refresh.
    ///
    /// On failure the tier falls back to `Free` and the error is returned;
    /// configuration is never retried.
    pub async fn start(&self, local_user: Option<&str>) -> Result<()> {
        let billing = self.billing.clone();
        let listener = self.listener.clone();
        let refresher = self.refresher.clone();
        let lifecycle = lock(&self.lifecycle).take();
        let tasks = self.tasks.clone();

        let result = self
            .gate
            .ensure_configured_with(local_user, move || {
                let push = listener.attach(billing.add_entitlement_update_listener());
                let trigger = ForegroundRefreshTrigger::spawn(refresher, lifecycle);
                lock(&tasks).extend([push, trigger]);
            })
            .await;

        if let Err(e) = &result {
            warn!(error = %e, "Entitlement engine failed to start, assuming free");
            self.listener.fallback_to_free().await;
        }
        result
    }

    /// Current tier and initialization flag
    pub fn read(&self) -> EntitlementState {
        self.store.read()
    }

    pub fn subscribe(&self) -> watch::Receiver<EntitlementState> {
        self.store.subscribe()
    }

    pub fn on_change<F>(&self, callback: F) -> ChangeSubscription
    where
        F: Fn(EntitlementState) + Send + 'static,
    {
        self.store.on_change(callback)
    }

    /// Reconcile the billing identity with the local auth user
    pub async fn sync_identity(&self, local_user: Option<&str>) -> IdentitySyncOutcome {
        self.identity.sync_identity(local_user).await
    }

    /// Follow a local-auth identity stream, reconciling on every change
    pub fn follow_identity(&self, mut local_user: watch::Receiver<Option<String>>) {
        let identity = self.identity.clone();
        let task = tokio::spawn(async move {
            while local_user.changed().await.is_ok() {
                let current = local_user.borrow_and_update().clone();
                identity.sync_identity(current.as_deref()).await;
            }
        });
        lock(&self.tasks).push(task);
    }

    /// Cached entitlements now, network reconciliation in the background
    pub async fn safe_refresh(&self) -> Result<EntitlementSnapshot> {
        self.refresher.safe_refresh().await
    }

    /// User-initiated "Restore Purchases"; failures propagate
    pub async fn request_manual_restore(&self) -> Result<()> {
        self.gate
            .wait_ready()
            .await
            .map_err(|e| SyncError::Restore(e.to_string()))?;

        self.billing
            .sync_purchases()
            .await
            .map_err(|e| SyncError::Restore(e.to_string()))?;
        let snapshot = self
            .billing
            .get_customer_info()
            .await
            .map_err(|e| SyncError::Restore(e.to_string()))?;

        self.listener.submit(snapshot, SnapshotSource::Restore).await;
        self.listener.flush().await;
        info!(tier = %self.read().tier, "Purchases restored");
        Ok(())
    }

    /// User-initiated purchase; failures propagate
    pub async fn purchase(&self, product_id: &str) -> Result<SubscriptionTier> {
        self.gate
            .wait_ready()
            .await
            .map_err(|e| SyncError::Purchase(e.to_string()))?;

        let snapshot = self.billing.purchase(product_id).await.map_err(|e| {
            if matches!(e, SyncError::Purchase(_)) {
                e
            } else {
                SyncError::Purchase(e.to_string())
            }
        })?;

        self.listener.submit(snapshot, SnapshotSource::Purchase).await;
        self.listener.flush().await;
        Ok(self.read().tier)
    }

    /// Wait until every snapshot queued so far has reached the store
    pub async fn settle(&self) {
        self.listener.flush().await;
    }
}

impl Drop for EntitlementEngine {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
