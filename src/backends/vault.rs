use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

use super::secret_backend::SecretBackend;
use crate::error::InspectionError;

/// Data key under which the secret value is stored in the KV v2 entry
const VALUE_KEY: &str = "value";

/// HashiCorp Vault KV v2 HTTP client
#[derive(Clone)]
struct VaultClient {
    client: Client,
    address: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct SecretMetadata {
    updated_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct VaultResponse<T> {
    data: T,
}

#[derive(Debug, Serialize)]
struct VaultWriteRequest {
    data: HashMap<String, String>,
}

impl VaultClient {
    fn new(address: String, token: String) -> Result<Self> {
        let client = Client::builder()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            address: address.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn data_url(&self, mount: &str, path: &str) -> String {
        format!("{}/v1/{}/data/{}", self.address, mount, path.trim_start_matches('/'))
    }

    fn metadata_url(&self, mount: &str, path: &str) -> String {
        format!("{}/v1/{}/metadata/{}", self.address, mount, path.trim_start_matches('/'))
    }

    /// Write a secret to Vault KV v2
    async fn write_secret(
        &self,
        mount: &str,
        path: &str,
        data: HashMap<String, String>,
    ) -> Result<()> {
        let url = self.data_url(mount, path);
        debug!("Writing secret to: {}", url);

        let response = self
            .client
            .post(&url)
            .header("X-Vault-Token", &self.token)
            .json(&VaultWriteRequest { data })
            .send()
            .await
            .context("Failed to write secret to Vault")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Vault write failed with status {}: {}", status, body);
        }

        info!("Successfully wrote secret to {}/{}", mount, path);
        Ok(())
    }

    /// Read secret metadata. `Ok(None)` when no secret exists at the path.
    async fn read_metadata(&self, mount: &str, path: &str) -> Result<Option<SecretMetadata>> {
        let url = self.metadata_url(mount, path);
        debug!("Reading metadata from: {}", url);

        let response = self
            .client
            .get(&url)
            .header("X-Vault-Token", &self.token)
            .send()
            .await
            .context("Failed to read metadata from Vault")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "Vault metadata request failed with status {}: {}",
                status,
                body
            );
        }

        let vault_response: VaultResponse<SecretMetadata> = response
            .json()
            .await
            .context("Failed to parse Vault metadata response")?;

        Ok(Some(vault_response.data))
    }
}

/// Secret backend over a Vault KV v2 mount
pub struct VaultBackend {
    client: VaultClient,
    mount: String,
}

impl VaultBackend {
    /// Create a backend for the KV v2 engine mounted at `mount` on `address`
    pub fn new(address: String, token: String, mount: String) -> Result<Self> {
        Ok(Self {
            client: VaultClient::new(address, token)?,
            mount,
        })
    }
}

#[async_trait::async_trait]
impl SecretBackend for VaultBackend {
    async fn write_secret(&self, path: &str, value: &str) -> Result<()> {
        let mut data = HashMap::new();
        data.insert(VALUE_KEY.to_string(), value.to_string());
        self.client.write_secret(&self.mount, path, data).await
    }

    async fn last_updated(&self, path: &str) -> Result<DateTime<Utc>, InspectionError> {
        let metadata = self
            .client
            .read_metadata(&self.mount, path)
            .await?
            .ok_or_else(|| InspectionError::NotFound(path.to_string()))?;

        metadata.updated_time.ok_or_else(|| {
            InspectionError::Other(anyhow::anyhow!(
                "Vault metadata for '{}' has no updated_time",
                path
            ))
        })
    }

    fn backend_type(&self) -> &'static str {
        "HashiCorp Vault"
    }
}
