use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::backends::SecretBackend;
use crate::github::DeployKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Skip,
    Rotate,
}

/// What to do with a repository, and which published key to retire afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationVerdict {
    pub action: Action,
    pub old_key: Option<DeployKey>,
}

impl RotationVerdict {
    fn rotate(old_key: Option<DeployKey>) -> Self {
        Self {
            action: Action::Rotate,
            old_key,
        }
    }

    pub fn should_rotate(&self) -> bool {
        self.action == Action::Rotate
    }
}

/// Decide whether the deploy key titled `title` has to be rotated.
///
/// Titles are compared exactly and the first match in host order is the old key;
/// duplicate titles beyond the first are ignored. A permission mismatch always
/// rotates. Otherwise the key is kept only while its secret at `key_path` was
/// written less than `max_age` before `now`.
pub async fn decide(
    desired_read_only: bool,
    title: &str,
    key_path: &str,
    keys: &[DeployKey],
    store: &dyn SecretBackend,
    max_age: Duration,
    now: DateTime<Utc>,
) -> RotationVerdict {
    let Some(existing) = keys.iter().find(|key| key.title == title) else {
        debug!("No deploy key titled '{}' found", title);
        return RotationVerdict::rotate(None);
    };
    let old_key = Some(existing.clone());

    if existing.read_only.is_some_and(|read_only| read_only != desired_read_only) {
        debug!(
            "Deploy key {} has read_only={:?}, want {}",
            existing.id, existing.read_only, desired_read_only
        );
        return RotationVerdict::rotate(old_key);
    }

    let updated = match store.last_updated(key_path).await {
        Ok(updated) => updated,
        Err(e) if e.is_not_found() => {
            debug!("No secret at {} for existing deploy key {}", key_path, existing.id);
            return RotationVerdict::rotate(old_key);
        }
        Err(e) => {
            // An unreadable timestamp still rotates the key.
            warn!("failed to get last updated for secret: {:#}", e);
            return RotationVerdict::rotate(old_key);
        }
    };

    // A window reaching past the representable range keeps every key
    let fresh = now
        .checked_sub_signed(max_age)
        .map_or(true, |cutoff| updated > cutoff);
    if fresh {
        debug!("Secret at {} updated {}, nothing to do", key_path, updated);
        return RotationVerdict {
            action: Action::Skip,
            old_key,
        };
    }

    RotationVerdict::rotate(old_key)
}
