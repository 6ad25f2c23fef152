//! Entitlement listener
//!
//! Single consumer that owns the grace state and is the only writer of the
//! entitlement store. Pushed snapshots, refresh results, identity-sync
//! results and purchases are all enqueued here, so the resolve-then-write
//! sequence never races itself.
//!
//! Snapshots are applied in arrival order, not in the order the provider
//! produced them. A stale network response that arrives after a fresher
//! push wins; the grace window is the mitigation for that, not an ordering
//! guarantee.

use crate::billing::{EntitlementSnapshot, EntitlementUpdates};
use crate::persist::TierCache;
use crate::store::EntitlementStore;
use crate::tier::TierResolver;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where a snapshot came from (for logs)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    Push,
    Refresh,
    Identity,
    Restore,
    Purchase,
}

enum ListenerMessage {
    Snapshot {
        snapshot: EntitlementSnapshot,
        source: SnapshotSource,
    },
    FallbackToFree,
    Reset,
    Flush(oneshot::Sender<()>),
}

/// Sending side of the listener queue
#[derive(Clone)]
pub struct ListenerHandle {
    tx: mpsc::Sender<ListenerMessage>,
}

impl ListenerHandle {
    pub async fn submit(&self, snapshot: EntitlementSnapshot, source: SnapshotSource) {
        if self
            .tx
            .send(ListenerMessage::Snapshot { snapshot, source })
            .await
            .is_err()
        {
            warn!(?source, "Entitlement listener stopped, dropping snapshot");
        }
    }

    /// Fail closed: replace `Unknown` with `Free`
    pub async fn fallback_to_free(&self) {
        let _ = self.tx.send(ListenerMessage::FallbackToFree).await;
    }

    /// Queue an explicit store reset; snapshots queued after it re-initialize
    pub async fn reset(&self) {
        let _ = self.tx.send(ListenerMessage::Reset).await;
    }

    /// Wait until everything queued before this call has been applied
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(ListenerMessage::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Forward a billing push subscription into the queue
    pub fn attach(&self, mut updates: EntitlementUpdates) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            while let Some(snapshot) = updates.next().await {
                handle.submit(snapshot, SnapshotSource::Push).await;
            }
            debug!("Entitlement push subscription closed");
        })
    }
}

/// Consumer that resolves snapshots and writes the store
pub struct EntitlementListener {
    rx: mpsc::Receiver<ListenerMessage>,
    resolver: TierResolver,
    store: Arc<EntitlementStore>,
    cache: Arc<dyn TierCache>,
}

impl EntitlementListener {
    pub fn new(
        resolver: TierResolver,
        store: Arc<EntitlementStore>,
        cache: Arc<dyn TierCache>,
        capacity: usize,
    ) -> (Self, ListenerHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let listener = Self {
            rx,
            resolver,
            store,
            cache,
        };
        (listener, ListenerHandle { tx })
    }

    /// Run until every handle is dropped
    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            match message {
                ListenerMessage::Snapshot { snapshot, source } => {
                    self.apply(&snapshot, source).await
                }
                ListenerMessage::FallbackToFree => {
                    if self.store.fallback_to_free() {
                        info!("No trustworthy entitlements, falling back to free");
                    }
                }
                ListenerMessage::Reset => {
                    if self.store.reset() {
                        info!("Entitlement state reset, awaiting revalidation");
                    }
                }
                ListenerMessage::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn apply(&mut self, snapshot: &EntitlementSnapshot, source: SnapshotSource) {
        let tier = self.resolver.resolve(snapshot);
        if !self.store.write(tier) {
            debug!(%tier, ?source, "Tier unchanged");
            return;
        }

        info!(
            %tier,
            ?source,
            identity = %snapshot.original_app_user_id,
            "Entitlement tier updated"
        );
        // File caches do blocking IO; awaited so saves land in queue order
        let cache = self.cache.clone();
        match tokio::task::spawn_blocking(move || cache.save(tier)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to persist tier"),
            Err(e) => warn!(error = %e, "Tier persistence task failed"),
        }
    }
}
