//! Entitlement store
//!
//! The one reactive value the rest of the application reads the tier from.
//! Writes are equality-guarded so redundant snapshots never produce a
//! change notification.

use crate::tier::SubscriptionTier;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Externally visible entitlement state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EntitlementState {
    pub tier: SubscriptionTier,
    /// Set once the first snapshot-derived tier lands in this session
    pub initialized: bool,
}

/// Reactive holder of [`EntitlementState`]
///
/// Every mutation goes through `watch::Sender::send_if_modified`, which
/// serializes writers, so the equality guard holds under a multi-threaded
/// runtime too.
pub struct EntitlementStore {
    state: watch::Sender<EntitlementState>,
}

impl Default for EntitlementStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntitlementStore {
    pub fn new() -> Self {
        Self::restored(SubscriptionTier::Unknown)
    }

    /// Start from a tier persisted by a previous session (not yet initialized)
    pub fn restored(tier: SubscriptionTier) -> Self {
        let (state, _) = watch::channel(EntitlementState {
            tier,
            initialized: false,
        });
        Self { state }
    }

    pub fn read(&self) -> EntitlementState {
        *self.state.borrow()
    }

    /// Apply a snapshot-derived tier.
    ///
    /// Returns `true` when subscribers were notified: the tier changed, or
    /// this is the first write of the session.
    pub fn write(&self, tier: SubscriptionTier) -> bool {
        self.state.send_if_modified(|state| {
            if state.initialized && state.tier == tier {
                return false;
            }
            state.tier = tier;
            state.initialized = true;
            true
        })
    }

    /// Replace `Unknown` with `Free` without marking the session initialized
    pub fn fallback_to_free(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.tier != SubscriptionTier::Unknown {
                return false;
            }
            state.tier = SubscriptionTier::Free;
            true
        })
    }

    /// Explicitly mark the state as needing re-validation.
    ///
    /// The tier is kept so readers do not see a flash of `Unknown`.
    pub fn reset(&self) -> bool {
        self.state.send_if_modified(|state| {
            let was_initialized = state.initialized;
            state.initialized = false;
            was_initialized
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<EntitlementState> {
        self.state.subscribe()
    }

    /// Invoke `callback` on every change until the returned handle is dropped.
    ///
    /// Must be called from within a tokio runtime.
    pub fn on_change<F>(&self, callback: F) -> ChangeSubscription
    where
        F: Fn(EntitlementState) + Send + 'static,
    {
        let mut rx = self.subscribe();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = *rx.borrow_and_update();
                callback(state);
            }
        });
        ChangeSubscription { task }
    }
}

/// Handle for an [`EntitlementStore::on_change`] callback; dropping it unsubscribes
pub struct ChangeSubscription {
    task: JoinHandle<()>,
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_read_before_write_is_unknown() {
        let store = EntitlementStore::new();
        assert_eq!(store.read(), EntitlementState::default());
        assert_eq!(store.read().tier, SubscriptionTier::Unknown);
    }

    #[test]
    fn test_same_tier_twice_notifies_once() {
        let store = EntitlementStore::new();
        let rx = store.subscribe();

        assert!(store.write(SubscriptionTier::Premium));
        assert!(!store.write(SubscriptionTier::Premium));
        assert!(rx.has_changed().unwrap());
        assert_eq!(store.read().tier, SubscriptionTier::Premium);
    }

    #[test]
    fn test_initialized_flips_once() {
        let store = EntitlementStore::new();
        assert!(!store.read().initialized);

        store.write(SubscriptionTier::Free);
        assert!(store.read().initialized);
        store.write(SubscriptionTier::Premium);
        store.write(SubscriptionTier::Free);
        assert!(store.read().initialized);

        assert!(store.reset());
        assert!(!store.read().initialized);
        assert_eq!(store.read().tier, SubscriptionTier::Free);
        assert!(!store.reset());
    }

    #[test]
    fn test_restored_tier_first_write_confirms() {
        let store = EntitlementStore::restored(SubscriptionTier::Premium);
        assert_eq!(store.read().tier, SubscriptionTier::Premium);
        assert!(!store.read().initialized);

        // Same tier, but the session becomes initialized
        assert!(store.write(SubscriptionTier::Premium));
        assert!(store.read().initialized);
    }

    #[test]
    fn test_fallback_only_replaces_unknown() {
        let store = EntitlementStore::new();
        assert!(store.fallback_to_free());
        assert_eq!(store.read().tier, SubscriptionTier::Free);
        assert!(!store.read().initialized);

        let store = EntitlementStore::restored(SubscriptionTier::Premium);
        assert!(!store.fallback_to_free());
        assert_eq!(store.read().tier, SubscriptionTier::Premium);
    }

    #[tokio::test]
    async fn test_on_change_callback() {
        let store = EntitlementStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();

        let _subscription = store.on_change(move |state| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = seen_tx.send(state.tier);
        });

        store.write(SubscriptionTier::Premium);
        assert_eq!(seen_rx.recv().await, Some(SubscriptionTier::Premium));

        store.write(SubscriptionTier::Premium);
        store.write(SubscriptionTier::Free);
        assert_eq!(seen_rx.recv().await, Some(SubscriptionTier::Free));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
