//! Source-control host integration
//!
//! Deploy keys are managed per repository and access tokens are minted per
//! owner through a GitHub App installation.

mod app;

pub use app::GithubApp;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::Repository;

/// A public key attached to a repository, as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployKey {
    pub id: i64,
    pub title: String,
    /// Absent when the host does not report permissions for the key
    #[serde(default)]
    pub read_only: Option<bool>,
}

/// Mints access tokens for a repository owner
#[async_trait::async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn mint_token(&self, owner: &str) -> Result<String>;
}

/// Lists, creates and deletes the deploy keys of a repository
#[async_trait::async_trait]
pub trait KeyDirectory: Send + Sync {
    async fn list_keys(&self, repository: &Repository) -> Result<Vec<DeployKey>>;

    async fn create_key(
        &self,
        repository: &Repository,
        title: &str,
        public_key: &str,
        read_only: bool,
    ) -> Result<()>;

    async fn delete_key(&self, repository: &Repository, id: i64) -> Result<()>;
}
