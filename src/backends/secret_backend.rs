use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::error::InspectionError;

/// Trait for secret stores holding deploy keys and access tokens (Vault, AWS Secrets Manager, etc.)
#[async_trait::async_trait]
pub trait SecretBackend: Send + Sync {
    /// Write a secret value, creating the secret if it does not exist yet
    async fn write_secret(&self, path: &str, value: &str) -> Result<()>;

    /// When the secret at `path` was last written.
    ///
    /// Must return [`InspectionError::NotFound`] when the secret does not exist so
    /// callers can tell a first rotation apart from a failing store.
    async fn last_updated(&self, path: &str) -> Result<DateTime<Utc>, InspectionError>;

    /// Get the backend type name for display purposes
    fn backend_type(&self) -> &'static str;
}
