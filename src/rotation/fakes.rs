//! Recording in-memory collaborators for rotation tests

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};
use tracing::subscriber::DefaultGuard;

use crate::backends::SecretBackend;
use crate::error::InspectionError;
use crate::github::{DeployKey, KeyDirectory, TokenIssuer};
use crate::keygen::{KeyGenerator, KeyPair};
use crate::models::Repository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    MintToken(String),
    WriteSecret { path: String, value: String },
    LastUpdated(String),
    ListKeys(String),
    CreateKey {
        repository: String,
        title: String,
        public_key: String,
        read_only: bool,
    },
    DeleteKey { repository: String, id: i64 },
    Generate(String),
}

/// Shared, ordered log of every collaborator call
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| predicate(c)).count()
    }

    pub fn position(&self, predicate: impl Fn(&Call) -> bool) -> Option<usize> {
        self.calls().iter().position(predicate)
    }
}

/// Formatted log output captured for the current thread
#[derive(Debug, Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Route this thread's events at DEBUG and above into the buffer until the guard drops
    pub fn install(&self) -> DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.lines().iter().filter(|line| line.contains(needle)).count()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Freshness {
    At(DateTime<Utc>),
    NotFound,
    Broken,
}

#[derive(Default)]
pub struct FakeStore {
    pub log: CallLog,
    pub freshness: HashMap<String, Freshness>,
    pub failing_writes: HashSet<String>,
}

#[async_trait::async_trait]
impl SecretBackend for FakeStore {
    async fn write_secret(&self, path: &str, value: &str) -> Result<()> {
        self.log.push(Call::WriteSecret {
            path: path.to_string(),
            value: value.to_string(),
        });
        if self.failing_writes.contains(path) {
            anyhow::bail!("write to {} denied", path);
        }
        Ok(())
    }

    async fn last_updated(&self, path: &str) -> Result<DateTime<Utc>, InspectionError> {
        self.log.push(Call::LastUpdated(path.to_string()));
        match self.freshness.get(path) {
            Some(Freshness::At(at)) => Ok(*at),
            Some(Freshness::Broken) => Err(InspectionError::Other(anyhow::anyhow!("throttled"))),
            Some(Freshness::NotFound) | None => Err(InspectionError::NotFound(path.to_string())),
        }
    }

    fn backend_type(&self) -> &'static str {
        "fake"
    }
}

#[derive(Default)]
pub struct FakeHost {
    pub log: CallLog,
    /// Keys per repository name
    pub keys: HashMap<String, Vec<DeployKey>>,
    pub failing_mints: HashSet<String>,
    pub failing_lists: HashSet<String>,
    pub failing_creates: HashSet<String>,
    pub failing_deletes: HashSet<String>,
}

#[async_trait::async_trait]
impl TokenIssuer for FakeHost {
    async fn mint_token(&self, owner: &str) -> Result<String> {
        self.log.push(Call::MintToken(owner.to_string()));
        if self.failing_mints.contains(owner) {
            anyhow::bail!("installation not found for {}", owner);
        }
        Ok(format!("token-{}", owner))
    }
}

#[async_trait::async_trait]
impl KeyDirectory for FakeHost {
    async fn list_keys(&self, repository: &Repository) -> Result<Vec<DeployKey>> {
        self.log.push(Call::ListKeys(repository.name.clone()));
        if self.failing_lists.contains(&repository.name) {
            anyhow::bail!("502 bad gateway");
        }
        Ok(self.keys.get(&repository.name).cloned().unwrap_or_default())
    }

    async fn create_key(
        &self,
        repository: &Repository,
        title: &str,
        public_key: &str,
        read_only: bool,
    ) -> Result<()> {
        self.log.push(Call::CreateKey {
            repository: repository.name.clone(),
            title: title.to_string(),
            public_key: public_key.to_string(),
            read_only,
        });
        if self.failing_creates.contains(&repository.name) {
            anyhow::bail!("422 key is already in use");
        }
        Ok(())
    }

    async fn delete_key(&self, repository: &Repository, id: i64) -> Result<()> {
        self.log.push(Call::DeleteKey {
            repository: repository.name.clone(),
            id,
        });
        if self.failing_deletes.contains(&repository.name) {
            anyhow::bail!("404 not found");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeGenerator {
    pub log: CallLog,
    pub fail: bool,
}

#[async_trait::async_trait]
impl KeyGenerator for FakeGenerator {
    async fn generate_key_pair(&self, name: &str) -> Result<KeyPair> {
        self.log.push(Call::Generate(name.to_string()));
        if self.fail {
            anyhow::bail!("entropy source unavailable");
        }
        Ok(KeyPair {
            private_key: format!("private-{}", name).into(),
            public_key: format!("public-{}", name),
        })
    }
}

/// Store, host and generator sharing one call log
pub fn fakes() -> (FakeStore, FakeHost, FakeGenerator, CallLog) {
    let log = CallLog::default();
    (
        FakeStore {
            log: log.clone(),
            ..Default::default()
        },
        FakeHost {
            log: log.clone(),
            ..Default::default()
        },
        FakeGenerator {
            log: log.clone(),
            fail: false,
        },
        log,
    )
}

pub fn key(id: i64, title: &str, read_only: bool) -> DeployKey {
    DeployKey {
        id,
        title: title.to_string(),
        read_only: Some(read_only),
    }
}
