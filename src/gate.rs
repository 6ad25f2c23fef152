//! Configuration gate
//!
//! The billing SDK must be configured exactly once before any other call
//! against it is valid. The first `ensure_configured` caller starts the
//! configuration; every other caller, including ones racing the first,
//! waits on the same outcome. Waiters are coalesced on a watch channel the
//! way in-flight requests are coalesced in the delivery relay.

use crate::billing::BillingClient;
use crate::error::{Result, SyncError};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Lifecycle of the one-time configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationState {
    NotStarted,
    InProgress,
    Ready,
    /// Terminal: configure is call-once, so a failure is never retried
    Failed(SyncError),
}

/// Owns the call-once `configure` and the readiness signal everything else awaits
pub struct ConfigurationGate {
    billing: Arc<dyn BillingClient>,
    api_key: String,
    state: Arc<watch::Sender<ConfigurationState>>,
}

impl ConfigurationGate {
    pub fn new(billing: Arc<dyn BillingClient>, api_key: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ConfigurationState::NotStarted);
        Self {
            billing,
            api_key: api_key.into(),
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> ConfigurationState {
        self.state.borrow().clone()
    }

    pub fn is_started(&self) -> bool {
        !matches!(*self.state.borrow(), ConfigurationState::NotStarted)
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.state.borrow(), ConfigurationState::Ready)
    }

    /// Configure the billing client once, binding `local_user` at configure time
    pub async fn ensure_configured(&self, local_user: Option<&str>) -> Result<()> {
        self.ensure_configured_with(local_user, || {}).await
    }

    /// Like [`ensure_configured`](Self::ensure_configured), running `on_ready`
    /// after a successful configure and before any waiter is released.
    ///
    /// Only the first caller's `on_ready` runs. It must not await the gate.
    pub async fn ensure_configured_with<F>(&self, local_user: Option<&str>, on_ready: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let started = self.state.send_if_modified(|state| {
            if *state != ConfigurationState::NotStarted {
                return false;
            }
            *state = ConfigurationState::InProgress;
            true
        });

        if started {
            let billing = self.billing.clone();
            let api_key = self.api_key.clone();
            let local_user = local_user.map(str::to_string);
            let state = self.state.clone();

            // Detached so a cancelled first caller cannot strand the waiters
            tokio::spawn(async move {
                match billing.configure(&api_key, local_user.as_deref()).await {
                    Ok(()) => {
                        on_ready();
                        info!(user_id = ?local_user, "Billing client ready");
                        state.send_replace(ConfigurationState::Ready);
                    }
                    Err(e) => {
                        error!(error = %e, "Billing client configuration failed");
                        let failure = if matches!(e, SyncError::Configuration(_)) {
                            e
                        } else {
                            SyncError::Configuration(e.to_string())
                        };
                        state.send_replace(ConfigurationState::Failed(failure));
                    }
                }
            });
        }

        self.wait_ready().await
    }

    /// Wait for the outcome of a started configuration.
    ///
    /// Returns `NotConfigured` immediately if nobody has started it.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let outcome = rx
            .wait_for(|state| *state != ConfigurationState::InProgress)
            .await
            .map_err(|_| SyncError::Configuration("configuration gate dropped".into()))?
            .clone();

        match outcome {
            ConfigurationState::Ready => Ok(()),
            ConfigurationState::Failed(failure) => Err(failure),
            ConfigurationState::NotStarted | ConfigurationState::InProgress => {
                Err(SyncError::NotConfigured)
            }
        }
    }
}
