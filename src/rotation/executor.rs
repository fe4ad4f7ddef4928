use std::time::Duration;
use tracing::{info, warn};

use crate::backends::SecretBackend;
use crate::error::RotationError;
use crate::github::{DeployKey, KeyDirectory};
use crate::keygen::KeyGenerator;
use crate::models::Repository;
use crate::template::ResolvedPaths;

/// How a rotation that got past persisting the new secret ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Rotated,
    /// The new key is live but the old one could not be deleted
    RotatedWithOrphan { old_key_id: i64 },
}

/// Replace the deploy key of `repository`.
///
/// The new key is published and its private half persisted before the old key
/// is touched, so the repository always keeps at least one usable key. Failures
/// up to and including the secret write abort the rotation. A failed delete of
/// the old key is logged and reported as [`Completion::RotatedWithOrphan`].
pub async fn execute(
    repository: &Repository,
    paths: &ResolvedPaths,
    old_key: Option<&DeployKey>,
    generator: &dyn KeyGenerator,
    directory: &dyn KeyDirectory,
    store: &dyn SecretBackend,
    grace_delay: Duration,
) -> Result<Completion, RotationError> {
    let key_pair = generator
        .generate_key_pair(&paths.title)
        .await
        .map_err(RotationError::KeyGeneration)?;

    directory
        .create_key(
            repository,
            &paths.title,
            &key_pair.public_key,
            repository.read_only.into(),
        )
        .await
        .map_err(RotationError::KeyPublish)?;

    store
        .write_secret(&paths.key_path, &key_pair.private_key)
        .await
        .map_err(RotationError::SecretPersist)?;

    let Some(old_key) = old_key else {
        info!("Created deploy key '{}'", paths.title);
        return Ok(Completion::Rotated);
    };

    // Someone may have fetched the old key just before the secret was replaced
    tokio::time::sleep(grace_delay).await;

    if let Err(source) = directory.delete_key(repository, old_key.id).await {
        let err = RotationError::KeyDeletion {
            id: old_key.id,
            source,
        };
        warn!("{}", err);
        return Ok(Completion::RotatedWithOrphan {
            old_key_id: old_key.id,
        });
    }

    info!("Rotated deploy key '{}' (retired key {})", paths.title, old_key.id);
    Ok(Completion::Rotated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BooleanString;
    use crate::rotation::fakes::{fakes, key, Call};
    use std::time::Instant;

    fn repository() -> Repository {
        Repository {
            name: "A".to_string(),
            owner: "O".to_string(),
            read_only: BooleanString(true),
        }
    }

    fn paths() -> ResolvedPaths {
        ResolvedPaths {
            token_path: "/concourse/T/O".to_string(),
            key_path: "/concourse/T/A".to_string(),
            title: "concourse-T-deploy-key".to_string(),
        }
    }

    #[tokio::test]
    async fn test_new_key_without_old_key() {
        let (store, host, generator, log) = fakes();

        let completion = execute(&repository(), &paths(), None, &generator, &host, &store, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(completion, Completion::Rotated);
        assert_eq!(
            log.calls(),
            vec![
                Call::Generate("concourse-T-deploy-key".to_string()),
                Call::CreateKey {
                    repository: "A".to_string(),
                    title: "concourse-T-deploy-key".to_string(),
                    public_key: "public-concourse-T-deploy-key".to_string(),
                    read_only: true,
                },
                Call::WriteSecret {
                    path: "/concourse/T/A".to_string(),
                    value: "private-concourse-T-deploy-key".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_old_key_deleted_last() {
        let (store, host, generator, log) = fakes();
        let old = key(9, "concourse-T-deploy-key", true);

        let completion = execute(&repository(), &paths(), Some(&old), &generator, &host, &store, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(completion, Completion::Rotated);
        let calls = log.calls();
        assert_eq!(
            calls.last(),
            Some(&Call::DeleteKey {
                repository: "A".to_string(),
                id: 9
            })
        );
        let persisted = log.position(|c| matches!(c, Call::WriteSecret { .. })).unwrap();
        let deleted = log.position(|c| matches!(c, Call::DeleteKey { .. })).unwrap();
        assert!(persisted < deleted);
    }

    #[tokio::test]
    async fn test_grace_delay_before_delete() {
        let (store, host, generator, _) = fakes();
        let old = key(9, "concourse-T-deploy-key", true);

        let started = Instant::now();
        execute(&repository(), &paths(), Some(&old), &generator, &host, &store, Duration::from_millis(50))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_generation_failure_stops_everything() {
        let (store, host, mut generator, log) = fakes();
        generator.fail = true;
        let old = key(9, "concourse-T-deploy-key", true);

        let err = execute(&repository(), &paths(), Some(&old), &generator, &host, &store, Duration::ZERO)
            .await
            .unwrap_err();

        assert!(matches!(err, RotationError::KeyGeneration(_)));
        assert_eq!(log.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_secret_and_old_key() {
        let (store, mut host, generator, log) = fakes();
        host.failing_creates.insert("A".to_string());
        let old = key(9, "concourse-T-deploy-key", true);

        let err = execute(&repository(), &paths(), Some(&old), &generator, &host, &store, Duration::ZERO)
            .await
            .unwrap_err();

        assert!(matches!(err, RotationError::KeyPublish(_)));
        assert_eq!(log.count(|c| matches!(c, Call::WriteSecret { .. })), 0);
        assert_eq!(log.count(|c| matches!(c, Call::DeleteKey { .. })), 0);
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_old_key() {
        let (mut store, host, generator, log) = fakes();
        store.failing_writes.insert("/concourse/T/A".to_string());
        let old = key(9, "concourse-T-deploy-key", true);

        let err = execute(&repository(), &paths(), Some(&old), &generator, &host, &store, Duration::ZERO)
            .await
            .unwrap_err();

        assert!(matches!(err, RotationError::SecretPersist(_)));
        assert_eq!(log.count(|c| matches!(c, Call::DeleteKey { .. })), 0);
    }

    #[tokio::test]
    async fn test_delete_failure_leaves_orphan() {
        let (store, mut host, generator, log) = fakes();
        host.failing_deletes.insert("A".to_string());
        let old = key(9, "concourse-T-deploy-key", true);

        let completion = execute(&repository(), &paths(), Some(&old), &generator, &host, &store, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(completion, Completion::RotatedWithOrphan { old_key_id: 9 });
        assert_eq!(log.count(|c| matches!(c, Call::WriteSecret { .. })), 1);
    }
}
