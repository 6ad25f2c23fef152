//! Error types for entitlement synchronization

use thiserror::Error;

/// Result type for sync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Sync error types
///
/// Background operations (identity sync, foreground refresh) log these and
/// carry on. User-initiated operations (purchase, restore) return them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// One-time billing SDK configuration failed
    #[error("Configuration failed: {0}")]
    Configuration(String),

    /// Operation requires the configuration gate, which was never started
    #[error("Billing client not configured")]
    NotConfigured,

    /// Billing provider call failed
    #[error("Billing error: {0}")]
    Billing(String),

    /// logIn/logOut failed during identity reconciliation
    #[error("Identity sync failed: {0}")]
    IdentitySync(String),

    /// Background network reconciliation failed
    #[error("Refresh failed: {0}")]
    Refresh(String),

    /// User-initiated purchase failed
    #[error("Purchase failed: {0}")]
    Purchase(String),

    /// User-initiated restore failed
    #[error("Restore failed: {0}")]
    Restore(String),

    /// Tier cache read/write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Configuration file error
    #[error("Config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Billing(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Persistence(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Config(err.to_string())
    }
}
