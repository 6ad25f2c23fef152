//! Entitlement snapshots and billing identities as delivered by the provider

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Prefix the billing provider uses for identities it minted itself
pub const ANONYMOUS_ID_PREFIX: &str = "$RCAnonymousID:";

/// Remote identity the billing provider currently scopes entitlements to.
///
/// Parsed once where the raw `originalAppUserId` string enters the crate,
/// so the rest of the code matches on the variant instead of re-checking
/// string prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BillingIdentity {
    /// Provider-minted identity (no local user bound)
    Anonymous(String),
    /// Identity bound to a local user id
    Identified(String),
}

impl BillingIdentity {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        if raw.starts_with(ANONYMOUS_ID_PREFIX) {
            BillingIdentity::Anonymous(raw)
        } else {
            BillingIdentity::Identified(raw)
        }
    }

    /// Mint a fresh anonymous identity
    pub fn new_anonymous() -> Self {
        BillingIdentity::Anonymous(format!(
            "{}{}",
            ANONYMOUS_ID_PREFIX,
            uuid::Uuid::new_v4().simple()
        ))
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, BillingIdentity::Anonymous(_))
    }

    /// The local user id this identity is bound to, if any
    pub fn user_id(&self) -> Option<&str> {
        match self {
            BillingIdentity::Identified(id) => Some(id),
            BillingIdentity::Anonymous(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BillingIdentity::Anonymous(id) | BillingIdentity::Identified(id) => id,
        }
    }
}

impl From<String> for BillingIdentity {
    fn from(raw: String) -> Self {
        Self::parse(raw)
    }
}

impl From<BillingIdentity> for String {
    fn from(identity: BillingIdentity) -> Self {
        match identity {
            BillingIdentity::Anonymous(id) | BillingIdentity::Identified(id) => id,
        }
    }
}

impl fmt::Display for BillingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Activation status of a single entitlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntitlementStatus {
    Active,
    Inactive,
}

/// Immutable view of a customer's entitlements at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementSnapshot {
    pub original_app_user_id: BillingIdentity,
    #[serde(default)]
    pub entitlements: BTreeMap<String, EntitlementStatus>,
}

impl EntitlementSnapshot {
    pub fn new(original_app_user_id: BillingIdentity) -> Self {
        Self {
            original_app_user_id,
            entitlements: BTreeMap::new(),
        }
    }

    pub fn with_entitlement(mut self, name: impl Into<String>, active: bool) -> Self {
        let status = if active {
            EntitlementStatus::Active
        } else {
            EntitlementStatus::Inactive
        };
        self.entitlements.insert(name.into(), status);
        self
    }

    /// Whether the named entitlement is present and active
    pub fn is_active(&self, entitlement: &str) -> bool {
        matches!(
            self.entitlements.get(entitlement),
            Some(EntitlementStatus::Active)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_parse() {
        let anon = BillingIdentity::parse("$RCAnonymousID:8f2c1d");
        assert!(anon.is_anonymous());
        assert_eq!(anon.user_id(), None);

        let user = BillingIdentity::parse("user_42");
        assert_eq!(user, BillingIdentity::Identified("user_42".into()));
        assert_eq!(user.user_id(), Some("user_42"));
    }

    #[test]
    fn test_new_anonymous_has_prefix() {
        let anon = BillingIdentity::new_anonymous();
        assert!(anon.is_anonymous());
        assert!(anon.as_str().starts_with(ANONYMOUS_ID_PREFIX));
        assert_ne!(anon, BillingIdentity::new_anonymous());
    }

    #[test]
    fn test_snapshot_json_shape() {
        let json = r#"{
            "originalAppUserId": "$RCAnonymousID:abc",
            "entitlements": { "premium": "active", "beta": "inactive" }
        }"#;

        let snapshot: EntitlementSnapshot = serde_json::from_str(json).unwrap();
        assert!(snapshot.original_app_user_id.is_anonymous());
        assert!(snapshot.is_active("premium"));
        assert!(!snapshot.is_active("beta"));
        assert!(!snapshot.is_active("missing"));

        let back = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(back["originalAppUserId"], "$RCAnonymousID:abc");
    }
}
