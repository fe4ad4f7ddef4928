//! Deploy key rotation
//!
//! A run walks every team and repository in order. Per repository it resolves
//! the secret paths and key title, makes sure the owner's access token was
//! written, decides whether the deploy key needs rotating and, if so, rotates
//! it. Failures are logged and confined to the repository they happened in;
//! the run itself never fails.

mod decision;
mod executor;
mod token_cache;

#[cfg(test)]
pub(crate) mod fakes;

pub use decision::{decide, Action, RotationVerdict};
pub use executor::{execute, Completion};
pub use token_cache::TokenCache;

use chrono::Utc;
use std::fmt;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};

use crate::backends::SecretBackend;
use crate::error::RotationError;
use crate::github::{KeyDirectory, TokenIssuer};
use crate::keygen::KeyGenerator;
use crate::models::{Repository, Team};
use crate::template::{ResolvedPaths, Templates};

pub const DEFAULT_MAX_AGE_DAYS: i64 = 7;
pub const DEFAULT_GRACE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RotationOptions {
    /// Secrets written more recently than this are left alone
    pub max_age: chrono::Duration,
    /// Wait between persisting a new key and deleting the old one
    pub grace_delay: Duration,
    /// Decide only; mint, write, generate, publish and delete nothing
    pub dry_run: bool,
}

impl Default for RotationOptions {
    fn default() -> Self {
        Self {
            max_age: chrono::Duration::days(DEFAULT_MAX_AGE_DAYS),
            grace_delay: DEFAULT_GRACE_DELAY,
            dry_run: false,
        }
    }
}

/// Terminal state of one repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Rotated,
    RotatedWithOrphan,
    WouldRotate,
}

/// Per-state repository counts for a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub skipped: usize,
    pub unchanged: usize,
    pub rotated: usize,
    pub rotated_with_orphan: usize,
    pub would_rotate: usize,
}

impl RunSummary {
    fn record(&mut self, result: &Result<Outcome, RotationError>) {
        match result {
            Err(_) => self.skipped += 1,
            Ok(Outcome::Unchanged) => self.unchanged += 1,
            Ok(Outcome::Rotated) => self.rotated += 1,
            Ok(Outcome::RotatedWithOrphan) => self.rotated_with_orphan += 1,
            Ok(Outcome::WouldRotate) => self.would_rotate += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.skipped + self.unchanged + self.rotated + self.rotated_with_orphan + self.would_rotate
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} repositories: {} rotated, {} rotated with orphaned key, {} unchanged, {} skipped",
            self.total(),
            self.rotated,
            self.rotated_with_orphan,
            self.unchanged,
            self.skipped
        )?;
        if self.would_rotate > 0 {
            write!(f, ", {} would rotate", self.would_rotate)?;
        }
        Ok(())
    }
}

/// Runs key rotation for batches of teams against one set of collaborators
pub struct Rotator<'a> {
    store: &'a dyn SecretBackend,
    issuer: &'a dyn TokenIssuer,
    directory: &'a dyn KeyDirectory,
    generator: &'a dyn KeyGenerator,
    templates: Templates,
    options: RotationOptions,
}

impl<'a> Rotator<'a> {
    pub fn new(
        store: &'a dyn SecretBackend,
        issuer: &'a dyn TokenIssuer,
        directory: &'a dyn KeyDirectory,
        generator: &'a dyn KeyGenerator,
        templates: Templates,
        options: RotationOptions,
    ) -> Self {
        Self {
            store,
            issuer,
            directory,
            generator,
            templates,
            options,
        }
    }

    /// Process every repository of every team, one at a time
    pub async fn run(&self, teams: &[Team]) -> RunSummary {
        let mut tokens = TokenCache::new();
        let mut summary = RunSummary::default();

        for team in teams {
            for repository in &team.repositories {
                let span = info_span!(
                    "repository",
                    team = %team.name,
                    repository = %repository.name,
                    owner = %repository.owner
                );
                let result = self
                    .process_repository(&mut tokens, team, repository)
                    .instrument(span.clone())
                    .await;

                if let Err(e) = &result {
                    span.in_scope(|| warn!("{}", e));
                }
                summary.record(&result);
            }
        }

        info!("Rotation run finished: {}", summary);
        summary
    }

    async fn process_repository(
        &self,
        tokens: &mut TokenCache,
        team: &Team,
        repository: &Repository,
    ) -> Result<Outcome, RotationError> {
        let paths = ResolvedPaths::resolve(team, repository, &self.templates)?;

        if self.options.dry_run {
            if tokens.plan(&paths.token_path) {
                info!(
                    "[DRY RUN] Would mint access token for {} and write it to {}",
                    repository.owner, paths.token_path
                );
            }
        } else {
            tokens
                .ensure_token(&repository.owner, &paths.token_path, self.issuer, self.store)
                .await?;
        }

        let keys = self
            .directory
            .list_keys(repository)
            .await
            .map_err(RotationError::KeyList)?;

        let verdict = decide(
            repository.read_only.into(),
            &paths.title,
            &paths.key_path,
            &keys,
            self.store,
            self.options.max_age,
            Utc::now(),
        )
        .await;

        if !verdict.should_rotate() {
            return Ok(Outcome::Unchanged);
        }

        if self.options.dry_run {
            info!(
                "[DRY RUN] Would rotate deploy key '{}'{}",
                paths.title,
                verdict
                    .old_key
                    .as_ref()
                    .map(|k| format!(" and retire key {}", k.id))
                    .unwrap_or_default()
            );
            return Ok(Outcome::WouldRotate);
        }

        let completion = execute(
            repository,
            &paths,
            verdict.old_key.as_ref(),
            self.generator,
            self.directory,
            self.store,
            self.options.grace_delay,
        )
        .await?;

        Ok(match completion {
            Completion::Rotated => Outcome::Rotated,
            Completion::RotatedWithOrphan { .. } => Outcome::RotatedWithOrphan,
        })
    }
}
