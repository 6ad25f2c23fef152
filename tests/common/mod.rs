//! In-memory billing client and helpers shared by integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};

use entitlement_sync::{
    BillingClient, BillingIdentity, EntitlementEngine, EntitlementSnapshot, EntitlementState,
    EntitlementUpdates, Result, SyncError,
};

pub const PREMIUM: &str = "premium";

#[derive(Default)]
struct FakeState {
    identity: Option<BillingIdentity>,
    /// Identities the "network" reports premium for
    premium: HashSet<String>,
    /// What `get_customer_info` serves until the next network fetch
    cached: Option<EntitlementSnapshot>,
}

/// Billing client that keeps entitlements in memory and counts calls
pub struct FakeBillingClient {
    state: Mutex<FakeState>,
    updates: broadcast::Sender<EntitlementSnapshot>,
    pub configure_calls: AtomicUsize,
    pub log_in_calls: AtomicUsize,
    pub log_out_calls: AtomicUsize,
    pub sync_calls: AtomicUsize,
    configure_delay: Duration,
    fail_configure: AtomicBool,
    fail_identity: AtomicBool,
    fail_sync: AtomicBool,
    fail_customer_info: AtomicBool,
    silent: AtomicBool,
    hold_sync: AtomicBool,
    sync_permits: Semaphore,
}

impl Default for FakeBillingClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBillingClient {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(32);
        Self {
            state: Mutex::new(FakeState::default()),
            updates,
            configure_calls: AtomicUsize::new(0),
            log_in_calls: AtomicUsize::new(0),
            log_out_calls: AtomicUsize::new(0),
            sync_calls: AtomicUsize::new(0),
            configure_delay: Duration::ZERO,
            fail_configure: AtomicBool::new(false),
            fail_identity: AtomicBool::new(false),
            fail_sync: AtomicBool::new(false),
            fail_customer_info: AtomicBool::new(false),
            silent: AtomicBool::new(false),
            hold_sync: AtomicBool::new(false),
            sync_permits: Semaphore::new(0),
        }
    }

    pub fn with_configure_delay(mut self, delay: Duration) -> Self {
        self.configure_delay = delay;
        self
    }

    pub fn failing_configure(self) -> Self {
        self.fail_configure.store(true, Ordering::SeqCst);
        self
    }

    /// Change what the network reports, leaving the cache stale
    pub fn set_premium(&self, identity: &str, premium: bool) {
        let mut state = self.state.lock().unwrap();
        if premium {
            state.premium.insert(identity.to_string());
        } else {
            state.premium.remove(identity);
        }
    }

    /// Pre-populate the SDK cache for `user` (kept if configure binds that user)
    pub fn seed_cache(&self, user: &str, premium: bool) {
        self.state.lock().unwrap().cached = Some(snapshot_for(user, premium));
    }

    pub fn fail_identity(&self, fail: bool) {
        self.fail_identity.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sync(&self, fail: bool) {
        self.fail_sync.store(fail, Ordering::SeqCst);
    }

    /// Make every customer info read fail, cached or not
    pub fn fail_customer_info(&self, fail: bool) {
        self.fail_customer_info.store(fail, Ordering::SeqCst);
    }

    /// Stop pushing updates to listeners
    pub fn silence_updates(&self) {
        self.silent.store(true, Ordering::SeqCst);
    }

    /// Block `sync_purchases` until `release_sync` is called
    pub fn hold_sync(&self) {
        self.hold_sync.store(true, Ordering::SeqCst);
    }

    pub fn release_sync(&self) {
        self.hold_sync.store(false, Ordering::SeqCst);
        self.sync_permits.add_permits(1);
    }

    pub fn identity(&self) -> Option<BillingIdentity> {
        self.state.lock().unwrap().identity.clone()
    }

    pub fn push(&self, snapshot: EntitlementSnapshot) {
        if self.silent.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.updates.send(snapshot);
    }

    pub fn identity_calls(&self) -> usize {
        self.log_in_calls.load(Ordering::SeqCst) + self.log_out_calls.load(Ordering::SeqCst)
    }

    fn current_identity(&self) -> Result<BillingIdentity> {
        self.state
            .lock()
            .unwrap()
            .identity
            .clone()
            .ok_or(SyncError::NotConfigured)
    }

    /// Fetch from the "network", refresh the cache, push on change
    fn fetch_fresh(&self) -> Result<EntitlementSnapshot> {
        let mut state = self.state.lock().unwrap();
        let identity = state.identity.clone().ok_or(SyncError::NotConfigured)?;
        let fresh = snapshot_for(identity.as_str(), state.premium.contains(identity.as_str()));
        let changed = state.cached.as_ref() != Some(&fresh);
        state.cached = Some(fresh.clone());
        drop(state);

        if changed && !self.silent.load(Ordering::SeqCst) {
            let _ = self.updates.send(fresh.clone());
        }
        Ok(fresh)
    }
}

#[async_trait]
impl BillingClient for FakeBillingClient {
    async fn configure(&self, _api_key: &str, app_user_id: Option<&str>) -> Result<()> {
        self.configure_calls.fetch_add(1, Ordering::SeqCst);
        if !self.configure_delay.is_zero() {
            tokio::time::sleep(self.configure_delay).await;
        }
        if self.fail_configure.load(Ordering::SeqCst) {
            return Err(SyncError::Configuration("invalid api key".into()));
        }

        let identity = match app_user_id {
            Some(id) => BillingIdentity::parse(id),
            None => BillingIdentity::new_anonymous(),
        };
        let mut state = self.state.lock().unwrap();
        if state.cached.as_ref().map(|c| &c.original_app_user_id) != Some(&identity) {
            state.cached = None;
        }
        state.identity = Some(identity);
        Ok(())
    }

    async fn log_in(&self, app_user_id: &str) -> Result<EntitlementSnapshot> {
        self.log_in_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_identity.load(Ordering::SeqCst) {
            return Err(SyncError::Billing("login rejected".into()));
        }
        self.state.lock().unwrap().identity = Some(BillingIdentity::parse(app_user_id));
        self.fetch_fresh()
    }

    async fn log_out(&self) -> Result<()> {
        self.log_out_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_identity.load(Ordering::SeqCst) {
            return Err(SyncError::Billing("logout rejected".into()));
        }
        self.state.lock().unwrap().identity = Some(BillingIdentity::new_anonymous());
        self.fetch_fresh().map(|_| ())
    }

    async fn get_customer_info(&self) -> Result<EntitlementSnapshot> {
        self.current_identity()?;
        if self.fail_customer_info.load(Ordering::SeqCst) {
            return Err(SyncError::Billing("customer info unavailable".into()));
        }
        if let Some(cached) = self.state.lock().unwrap().cached.clone() {
            return Ok(cached);
        }
        self.fetch_fresh()
    }

    async fn sync_purchases(&self) -> Result<()> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        if self.hold_sync.load(Ordering::SeqCst) {
            if let Ok(permit) = self.sync_permits.acquire().await {
                permit.forget();
            }
        }
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(SyncError::Billing("network unreachable".into()));
        }
        self.fetch_fresh().map(|_| ())
    }

    async fn purchase(&self, _product_id: &str) -> Result<EntitlementSnapshot> {
        let identity = self.current_identity()?;
        self.set_premium(identity.as_str(), true);
        self.fetch_fresh()
    }

    fn add_entitlement_update_listener(&self) -> EntitlementUpdates {
        EntitlementUpdates::new(self.updates.subscribe())
    }
}

pub fn snapshot_for(identity: &str, premium: bool) -> EntitlementSnapshot {
    EntitlementSnapshot::new(BillingIdentity::parse(identity)).with_entitlement(PREMIUM, premium)
}

/// Wait (bounded) until the engine state satisfies `predicate`
pub async fn wait_for_state<F>(engine: &EntitlementEngine, predicate: F) -> EntitlementState
where
    F: Fn(&EntitlementState) -> bool,
{
    let mut rx = engine.subscribe();
    let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| predicate(s)))
        .await
        .expect("timed out waiting for entitlement state")
        .expect("store dropped");
    *state
}

/// Poll `condition` (bounded) until it holds
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}
