use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::rotation::{RotationOptions, DEFAULT_MAX_AGE_DAYS};

/// Upper bound for `rotation.max_age_days` (ten years)
pub const MAX_AGE_DAYS_LIMIT: i64 = 3650;
use crate::template::Templates;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Secret backend: "aws" or "vault"
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws: Option<AwsConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<VaultConfig>,
    pub github: GithubConfig,
    #[serde(default)]
    pub templates: TemplateConfig,
    #[serde(default)]
    pub rotation: RotationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    pub address: String,
    pub token: String,
    #[serde(default = "default_vault_mount")]
    pub mount: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    pub app_id: u64,
    /// PEM encoded App private key; takes precedence over `private_key_path`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,
    #[serde(default = "default_github_api_url")]
    pub api_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    #[serde(default = "default_token_path_template")]
    pub token_path: String,
    #[serde(default = "default_key_path_template")]
    pub key_path: String,
    #[serde(default = "default_title_template")]
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    #[serde(default = "default_max_age_days")]
    pub max_age_days: i64,
    #[serde(default = "default_grace_delay_secs")]
    pub grace_delay_secs: u64,
}

fn default_backend() -> String {
    "aws".to_string()
}

fn default_vault_mount() -> String {
    "secret".to_string()
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_token_path_template() -> String {
    "/concourse/{Team}/{Owner}".to_string()
}

fn default_key_path_template() -> String {
    "/concourse/{Team}/{Repository}".to_string()
}

fn default_title_template() -> String {
    "concourse-{Team}-deploy-key".to_string()
}

fn default_max_age_days() -> i64 {
    DEFAULT_MAX_AGE_DAYS
}

fn default_grace_delay_secs() -> u64 {
    1
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            token_path: default_token_path_template(),
            key_path: default_key_path_template(),
            title: default_title_template(),
        }
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
            grace_delay_secs: default_grace_delay_secs(),
        }
    }
}

impl GithubConfig {
    /// The App private key, read from disk when only a path is configured
    pub fn private_key_pem(&self) -> Result<Vec<u8>> {
        if let Some(ref pem) = self.private_key {
            return Ok(pem.as_bytes().to_vec());
        }
        let path = self
            .private_key_path
            .as_ref()
            .context("GitHub App private key not configured. Set private_key or private_key_path")?;
        fs::read(path).with_context(|| format!("Failed to read GitHub App private key: {:?}", path))
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Self = toml::from_str(&contents).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let env = |name: &str| std::env::var(name).ok();

        let backend = env("SECRET_BACKEND").unwrap_or_else(default_backend);

        let aws = env("AWS_REGION").map(|region| AwsConfig { region });

        let vault = match (env("VAULT_ADDR"), env("VAULT_TOKEN")) {
            (Some(address), Some(token)) => Some(VaultConfig {
                address,
                token,
                mount: env("VAULT_MOUNT").unwrap_or_else(default_vault_mount),
            }),
            _ => None,
        };

        let github = GithubConfig {
            app_id: env("GITHUB_APP_ID")
                .context("GITHUB_APP_ID environment variable not set")?
                .parse()
                .context("GITHUB_APP_ID must be a number")?,
            private_key: env("GITHUB_PRIVATE_KEY"),
            private_key_path: env("GITHUB_PRIVATE_KEY_PATH").map(PathBuf::from),
            api_url: env("GITHUB_API_URL").unwrap_or_else(default_github_api_url),
        };

        let templates = TemplateConfig {
            token_path: env("TOKEN_PATH_TEMPLATE").unwrap_or_else(default_token_path_template),
            key_path: env("KEY_PATH_TEMPLATE").unwrap_or_else(default_key_path_template),
            title: env("KEY_TITLE_TEMPLATE").unwrap_or_else(default_title_template),
        };

        let rotation = RotationConfig {
            max_age_days: match env("ROTATION_MAX_AGE_DAYS") {
                Some(days) => days
                    .parse()
                    .context("ROTATION_MAX_AGE_DAYS must be a number of days")?,
                None => default_max_age_days(),
            },
            grace_delay_secs: env("ROTATION_GRACE_DELAY_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or_else(default_grace_delay_secs),
        };

        let config = Self {
            backend,
            aws,
            vault,
            github,
            templates,
            rotation,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make rotation decisions meaningless
    pub fn validate(&self) -> Result<()> {
        let days = self.rotation.max_age_days;
        if !(1..=MAX_AGE_DAYS_LIMIT).contains(&days) {
            anyhow::bail!(
                "rotation.max_age_days must be between 1 and {}, got {}",
                MAX_AGE_DAYS_LIMIT,
                days
            );
        }
        Ok(())
    }

    /// Create a sample configuration file
    pub fn create_sample<P: AsRef<Path>>(path: P) -> Result<()> {
        let sample = Self {
            backend: default_backend(),
            aws: Some(AwsConfig {
                region: "eu-west-1".to_string(),
            }),
            vault: None,
            github: GithubConfig {
                app_id: 12345,
                private_key: None,
                private_key_path: Some(PathBuf::from("github-app.private-key.pem")),
                api_url: default_github_api_url(),
            },
            templates: TemplateConfig::default(),
            rotation: RotationConfig::default(),
        };

        let toml_string =
            toml::to_string_pretty(&sample).context("Failed to serialize sample config")?;
        fs::write(path.as_ref(), toml_string)
            .with_context(|| format!("Failed to write sample config to {:?}", path.as_ref()))?;

        Ok(())
    }

    pub fn templates(&self) -> Templates {
        Templates {
            token_path: self.templates.token_path.clone(),
            key_path: self.templates.key_path.clone(),
            title: self.templates.title.clone(),
        }
    }

    pub fn rotation_options(&self, dry_run: bool) -> RotationOptions {
        RotationOptions {
            max_age: chrono::Duration::days(self.rotation.max_age_days),
            grace_delay: Duration::from_secs(self.rotation.grace_delay_secs),
            dry_run,
        }
    }
}
