use std::collections::HashSet;
use tracing::{debug, info};

use crate::backends::SecretBackend;
use crate::error::RotationError;
use crate::github::TokenIssuer;

/// Token paths that received a freshly minted owner access token during this run.
///
/// Keyed by the resolved token path, so an owner shared by several teams gets a
/// token under each team's path while repositories of one team share a single
/// mint. Created empty per run and dropped with it. A path is only recorded once
/// both the mint and the write succeeded.
#[derive(Debug, Default)]
pub struct TokenCache {
    written: HashSet<String>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, token_path: &str) -> bool {
        self.written.contains(token_path)
    }

    pub fn len(&self) -> usize {
        self.written.len()
    }

    pub fn is_empty(&self) -> bool {
        self.written.is_empty()
    }

    /// Record `token_path` without minting. Returns true the first time a path
    /// is seen, i.e. when a real run would mint and write here.
    pub fn plan(&mut self, token_path: &str) -> bool {
        self.written.insert(token_path.to_string())
    }

    /// Mint `owner`'s access token and store it at `token_path`, unless that
    /// path was already written this run
    pub async fn ensure_token(
        &mut self,
        owner: &str,
        token_path: &str,
        issuer: &dyn TokenIssuer,
        store: &dyn SecretBackend,
    ) -> Result<(), RotationError> {
        if self.contains(token_path) {
            debug!("Access token for {} already written to {} this run", owner, token_path);
            return Ok(());
        }

        let token = issuer
            .mint_token(owner)
            .await
            .map_err(RotationError::TokenMint)?;
        store
            .write_secret(token_path, &token)
            .await
            .map_err(RotationError::TokenWrite)?;

        info!("Wrote access token for {} to {}", owner, token_path);
        self.written.insert(token_path.to_string());
        Ok(())
    }
}
