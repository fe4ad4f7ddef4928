//! Failure taxonomy for a rotation run
//!
//! Every variant is scoped to a single repository. The orchestrator logs them
//! and moves on; none of them abort the batch.

use thiserror::Error;

use crate::template::TemplateError;

/// Failures that stop (or, for deletion, degrade) the processing of one repository
#[derive(Debug, Error)]
pub enum RotationError {
    #[error("failed to resolve {field} template: {source}")]
    TemplateResolution {
        field: &'static str,
        #[source]
        source: TemplateError,
    },

    #[error("failed to get access token: {0:#}")]
    TokenMint(#[source] anyhow::Error),

    #[error("failed to write access token: {0:#}")]
    TokenWrite(#[source] anyhow::Error),

    #[error("failed to list deploy keys: {0:#}")]
    KeyList(#[source] anyhow::Error),

    #[error("failed to generate new key pair: {0:#}")]
    KeyGeneration(#[source] anyhow::Error),

    #[error("failed to create deploy key: {0:#}")]
    KeyPublish(#[source] anyhow::Error),

    #[error("failed to write deploy key secret: {0:#}")]
    SecretPersist(#[source] anyhow::Error),

    #[error("failed to delete old deploy key {id}: {source:#}")]
    KeyDeletion {
        id: i64,
        #[source]
        source: anyhow::Error,
    },
}

/// Outcome of asking a secret store when a secret was last written
#[derive(Debug, Error)]
pub enum InspectionError {
    /// The secret does not exist yet. Expected on first rotation.
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl InspectionError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, InspectionError::NotFound(_))
    }
}
