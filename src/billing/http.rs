//! REST-backed billing client
//!
//! Talks to a RevenueCat-style subscriber API:
//! - GET  {base}/v1/subscribers/{app_user_id}
//! - POST {base}/v1/subscribers/identify   (alias anonymous → user)
//!
//! Customer info is cached for a bounded time, and every fresh fetch that
//! differs from the cached value is pushed to update listeners, the same
//! way the mobile SDKs notify their delegates.

use super::{BillingClient, BillingIdentity, EntitlementSnapshot, EntitlementUpdates};
use crate::config::EngineConfig;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;

#[derive(Debug, Deserialize)]
struct SubscriberResponse {
    subscriber: Subscriber,
}

#[derive(Debug, Deserialize)]
struct Subscriber {
    original_app_user_id: String,
    #[serde(default)]
    entitlements: HashMap<String, EntitlementRecord>,
}

#[derive(Debug, Deserialize)]
struct EntitlementRecord {
    /// `None` for lifetime entitlements
    expires_date: Option<DateTime<Utc>>,
}

impl Subscriber {
    fn to_snapshot(&self, now: DateTime<Utc>) -> EntitlementSnapshot {
        let mut snapshot =
            EntitlementSnapshot::new(BillingIdentity::parse(self.original_app_user_id.clone()));
        for (name, record) in &self.entitlements {
            let active = record.expires_date.map_or(true, |expires| expires > now);
            snapshot = snapshot.with_entitlement(name.clone(), active);
        }
        snapshot
    }
}

#[derive(Default)]
struct HttpState {
    api_key: Option<String>,
    identity: Option<BillingIdentity>,
    cached: Option<(EntitlementSnapshot, Instant)>,
}

/// Billing client over the provider's REST API
pub struct HttpBillingClient {
    base_url: String,
    cache_ttl: Duration,
    http_client: reqwest::Client,
    state: RwLock<HttpState>,
    updates: broadcast::Sender<EntitlementSnapshot>,
}

impl HttpBillingClient {
    pub fn new(base_url: impl Into<String>, cache_ttl: Duration) -> Self {
        let (updates, _) = broadcast::channel(16);
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache_ttl,
            http_client: reqwest::Client::new(),
            state: RwLock::new(HttpState::default()),
            updates,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.base_url.clone(), config.customer_info_ttl())
    }

    async fn credentials(&self) -> Result<(String, BillingIdentity)> {
        let state = self.state.read().await;
        match (&state.api_key, &state.identity) {
            (Some(key), Some(identity)) => Ok((key.clone(), identity.clone())),
            _ => Err(SyncError::NotConfigured),
        }
    }

    /// Fetch from the network, update the cache, and notify listeners on change
    async fn fetch_fresh(&self) -> Result<EntitlementSnapshot> {
        let (api_key, identity) = self.credentials().await?;
        let url = format!(
            "{}/v1/subscribers/{}",
            self.base_url,
            urlencoding::encode(identity.as_str())
        );

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Billing(format!("HTTP {} - {}", status, body)));
        }

        let body: SubscriberResponse = response.json().await?;
        let snapshot = body.subscriber.to_snapshot(Utc::now());

        let mut state = self.state.write().await;
        // Identity switched while the request was in flight; don't cache it
        if state.identity.as_ref() != Some(&identity) {
            tracing::debug!(identity = %identity, "Discarding customer info for stale identity");
            return Ok(snapshot);
        }
        let changed = state
            .cached
            .as_ref()
            .map_or(true, |(previous, _)| previous != &snapshot);
        state.cached = Some((snapshot.clone(), Instant::now()));
        drop(state);

        if changed {
            // No receivers is fine
            let _ = self.updates.send(snapshot.clone());
        }

        Ok(snapshot)
    }

    async fn identify(&self, api_key: &str, anonymous: &BillingIdentity, user_id: &str) -> Result<()> {
        let url = format!("{}/v1/subscribers/identify", self.base_url);
        let body = serde_json::json!({
            "app_user_id": anonymous.as_str(),
            "new_app_user_id": user_id,
        });

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Billing(format!(
                "Failed to identify {}: HTTP {} - {}",
                user_id, status, body
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl BillingClient for HttpBillingClient {
    async fn configure(&self, api_key: &str, app_user_id: Option<&str>) -> Result<()> {
        if api_key.is_empty() {
            return Err(SyncError::Configuration("api_key is empty".into()));
        }

        let identity = match app_user_id {
            Some(id) => BillingIdentity::parse(id),
            None => BillingIdentity::new_anonymous(),
        };
        tracing::info!(identity = %identity, "Billing client configured");

        let mut state = self.state.write().await;
        state.api_key = Some(api_key.to_string());
        state.identity = Some(identity);
        state.cached = None;
        Ok(())
    }

    async fn log_in(&self, app_user_id: &str) -> Result<EntitlementSnapshot> {
        let (api_key, current) = self.credentials().await?;
        if current.user_id() == Some(app_user_id) {
            return self.get_customer_info().await;
        }

        if current.is_anonymous() {
            self.identify(&api_key, &current, app_user_id).await?;
        }

        {
            let mut state = self.state.write().await;
            state.identity = Some(BillingIdentity::Identified(app_user_id.to_string()));
            state.cached = None;
        }

        self.fetch_fresh().await
    }

    async fn log_out(&self) -> Result<()> {
        self.credentials().await?;
        {
            let mut state = self.state.write().await;
            state.identity = Some(BillingIdentity::new_anonymous());
            state.cached = None;
        }

        // The identity already switched; a failed fetch just means listeners hear later
        if let Err(e) = self.fetch_fresh().await {
            tracing::warn!(error = %e, "Customer info fetch after logout failed");
        }
        Ok(())
    }

    async fn get_customer_info(&self) -> Result<EntitlementSnapshot> {
        {
            let state = self.state.read().await;
            if let Some((snapshot, fetched_at)) = &state.cached {
                if fetched_at.elapsed() < self.cache_ttl {
                    return Ok(snapshot.clone());
                }
            }
        }
        self.fetch_fresh().await
    }

    async fn sync_purchases(&self) -> Result<()> {
        self.fetch_fresh().await.map(|_| ())
    }

    fn add_entitlement_update_listener(&self) -> EntitlementUpdates {
        EntitlementUpdates::new(self.updates.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_to_snapshot() {
        let json = r#"{
            "subscriber": {
                "original_app_user_id": "user_42",
                "entitlements": {
                    "premium": { "expires_date": "2030-01-01T00:00:00Z", "product_identifier": "monthly" },
                    "legacy": { "expires_date": "2020-01-01T00:00:00Z" },
                    "lifetime": { "expires_date": null }
                }
            }
        }"#;

        let response: SubscriberResponse = serde_json::from_str(json).unwrap();
        let now = "2025-06-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let snapshot = response.subscriber.to_snapshot(now);

        assert_eq!(snapshot.original_app_user_id.user_id(), Some("user_42"));
        assert!(snapshot.is_active("premium"));
        assert!(!snapshot.is_active("legacy"));
        assert!(snapshot.is_active("lifetime"));
    }

    #[tokio::test]
    async fn test_calls_before_configure_fail() {
        let client = HttpBillingClient::new("http://localhost:1", Duration::from_secs(60));
        let err = client.get_customer_info().await.unwrap_err();
        assert_eq!(err, SyncError::NotConfigured);
    }

    #[tokio::test]
    async fn test_configure_rejects_empty_key() {
        let client = HttpBillingClient::new("http://localhost:1", Duration::from_secs(60));
        let err = client.configure("", None).await.unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }
}
