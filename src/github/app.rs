use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

use super::{DeployKey, KeyDirectory, TokenIssuer};
use crate::models::Repository;

const USER_AGENT: &str = concat!("deploy-key-rotator/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: usize = 100;

/// GitHub rejects app JWTs that live longer than ten minutes
const JWT_LIFETIME_SECS: i64 = 9 * 60;
/// Backdate `iat` to absorb clock drift between us and GitHub
const JWT_CLOCK_SKEW_SECS: i64 = 60;
/// Installation tokens are refreshed this long before they expire
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Deserialize)]
struct Installation {
    id: u64,
    account: Option<Account>,
}

#[derive(Debug, Deserialize)]
struct Account {
    login: String,
}

#[derive(Debug, Clone, Deserialize)]
struct InstallationToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// GitHub App client. Authenticates as the app to mint installation tokens and
/// as an installation to manage deploy keys.
pub struct GithubApp {
    client: Client,
    api_url: String,
    app_id: u64,
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    installations: Mutex<HashMap<String, u64>>,
    tokens: Mutex<HashMap<String, InstallationToken>>,
}

impl GithubApp {
    /// Create a client for the app `app_id` using its PEM encoded RSA private key
    pub fn new(api_url: &str, app_id: u64, private_key_pem: &[u8]) -> Result<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(private_key_pem)
            .context("Failed to parse GitHub App private key")?;
        Self::with_key(api_url, app_id, encoding_key, Algorithm::RS256)
    }

    fn with_key(
        api_url: &str,
        app_id: u64,
        encoding_key: EncodingKey,
        algorithm: Algorithm,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            app_id,
            algorithm,
            encoding_key,
            installations: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
        })
    }

    fn app_jwt(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AppClaims {
            iat: now - JWT_CLOCK_SKEW_SECS,
            exp: now + JWT_LIFETIME_SECS,
            iss: self.app_id.to_string(),
        };

        jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .context("Failed to sign GitHub App JWT")
    }

    fn request(&self, method: Method, path: &str, bearer: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .bearer_auth(bearer)
    }

    /// Look up the installation of this app for `owner`, listing all installations on first use
    async fn installation_id(&self, owner: &str) -> Result<u64> {
        let cached = lock(&self.installations)?.get(owner).copied();
        if let Some(id) = cached {
            return Ok(id);
        }

        let jwt = self.app_jwt()?;
        let mut found = HashMap::new();
        let mut page = 1;
        loop {
            debug!("Listing GitHub App installations (page {})", page);
            let response = self
                .request(Method::GET, "/app/installations", &jwt)
                .query(&[("per_page", PAGE_SIZE), ("page", page)])
                .send()
                .await
                .context("Failed to list GitHub App installations")?;
            let installations: Vec<Installation> = check_status(response)
                .await?
                .json()
                .await
                .context("Failed to parse GitHub App installations")?;

            let count = installations.len();
            for installation in installations {
                if let Some(account) = installation.account {
                    found.insert(account.login, installation.id);
                }
            }
            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        let mut installations = lock(&self.installations)?;
        installations.extend(found);
        installations
            .get(owner)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("GitHub App is not installed for owner '{}'", owner))
    }

    async fn create_installation_token(&self, owner: &str) -> Result<InstallationToken> {
        let id = self.installation_id(owner).await?;
        let jwt = self.app_jwt()?;

        let response = self
            .request(
                Method::POST,
                &format!("/app/installations/{}/access_tokens", id),
                &jwt,
            )
            .send()
            .await
            .with_context(|| format!("Failed to create installation token for '{}'", owner))?;
        let token: InstallationToken = check_status(response)
            .await?
            .json()
            .await
            .context("Failed to parse installation token")?;

        lock(&self.tokens)?.insert(owner.to_string(), token.clone());
        Ok(token)
    }

    /// An installation token for `owner` that is valid for at least the refresh margin
    async fn installation_token(&self, owner: &str) -> Result<String> {
        let cutoff = Utc::now() + Duration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        let cached = lock(&self.tokens)?
            .get(owner)
            .filter(|cached| cached.expires_at > cutoff)
            .map(|cached| cached.token.clone());
        if let Some(token) = cached {
            return Ok(token);
        }

        Ok(self.create_installation_token(owner).await?.token)
    }

    fn keys_path(repository: &Repository) -> String {
        format!("/repos/{}/{}/keys", repository.owner, repository.name)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<std::sync::MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| anyhow::anyhow!("GitHub client cache lock poisoned"))
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    anyhow::bail!("GitHub API request failed with status {}: {}", status, body)
}

#[async_trait::async_trait]
impl TokenIssuer for GithubApp {
    async fn mint_token(&self, owner: &str) -> Result<String> {
        info!("Minting access token for {}", owner);
        Ok(self.create_installation_token(owner).await?.token)
    }
}

#[async_trait::async_trait]
impl KeyDirectory for GithubApp {
    async fn list_keys(&self, repository: &Repository) -> Result<Vec<DeployKey>> {
        let token = self.installation_token(&repository.owner).await?;
        let path = Self::keys_path(repository);

        let mut keys = Vec::new();
        let mut page = 1;
        loop {
            let response = self
                .request(Method::GET, &path, &token)
                .query(&[("per_page", PAGE_SIZE), ("page", page)])
                .send()
                .await
                .with_context(|| format!("Failed to list deploy keys for {}", path))?;
            let batch: Vec<DeployKey> = check_status(response)
                .await?
                .json()
                .await
                .context("Failed to parse deploy keys")?;

            let count = batch.len();
            keys.extend(batch);
            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(keys)
    }

    async fn create_key(
        &self,
        repository: &Repository,
        title: &str,
        public_key: &str,
        read_only: bool,
    ) -> Result<()> {
        let token = self.installation_token(&repository.owner).await?;
        let path = Self::keys_path(repository);

        let response = self
            .request(Method::POST, &path, &token)
            .json(&json!({
                "title": title,
                "key": public_key,
                "read_only": read_only,
            }))
            .send()
            .await
            .with_context(|| format!("Failed to create deploy key on {}", path))?;
        check_status(response).await?;

        info!("Created deploy key '{}' on {}/{}", title, repository.owner, repository.name);
        Ok(())
    }

    async fn delete_key(&self, repository: &Repository, id: i64) -> Result<()> {
        let token = self.installation_token(&repository.owner).await?;
        let path = format!("{}/{}", Self::keys_path(repository), id);

        let response = self
            .request(Method::DELETE, &path, &token)
            .send()
            .await
            .with_context(|| format!("Failed to delete deploy key {}", path))?;
        check_status(response).await?;

        info!("Deleted deploy key {} on {}/{}", id, repository.owner, repository.name);
        Ok(())
    }
}
