//! CLI parsing and command execution
//!
//! This module handles command-line argument parsing and routes commands to the appropriate handlers.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use tracing::info;

use crate::backends::{AwsSecretsClient, Backend, BackendType, VaultBackend};
use crate::config::Config;
use crate::github::GithubApp;
use crate::keygen::Ed25519Generator;
use crate::models::{self, Team};
use crate::rotation::Rotator;

#[derive(Parser)]
#[command(name = "dkr")]
#[command(about = "Rotates GitHub deploy keys and organisation access tokens for CI teams", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "ROTATOR_CONFIG")]
    pub config: Option<PathBuf>,

    /// Secret backend to use (vault or aws)
    #[arg(long, env = "SECRET_BACKEND")]
    pub backend: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a sample configuration file
    Init {
        /// Output path for the configuration file
        #[arg(short, long, default_value = "rotator-config.toml")]
        output: PathBuf,
    },

    /// Rotate deploy keys for the teams in a JSON document
    Rotate {
        /// File holding a team or a list of teams ("-" for stdin)
        #[arg(default_value = "-")]
        teams: String,

        /// Dry run - only show what would be rotated
        #[arg(long)]
        dry_run: bool,
    },
}

/// Execute a CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    let (teams, dry_run) = match cli.command {
        Commands::Init { output } => {
            Config::create_sample(&output)
                .with_context(|| format!("Failed to create sample config at {:?}", output))?;
            info!("Sample configuration created at {:?}", output);
            return Ok(());
        }
        Commands::Rotate { teams, dry_run } => (teams, dry_run),
    };

    let mut config = if let Some(config_path) = cli.config {
        Config::from_file(&config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        Config::from_env().context("Failed to load config from environment")?
    };

    if let Some(backend) = cli.backend {
        config.backend = backend.to_lowercase();
    }

    let teams = read_teams(&teams)?;
    let backend = create_backend(&config).await?;
    let github = GithubApp::new(
        &config.github.api_url,
        config.github.app_id,
        &config.github.private_key_pem()?,
    )?;
    let generator = Ed25519Generator;

    info!(
        "Rotating deploy keys for {} team(s) using {}",
        teams.len(),
        backend.backend_type()
    );

    let rotator = Rotator::new(
        backend.as_ref(),
        &github,
        &github,
        &generator,
        config.templates(),
        config.rotation_options(dry_run),
    );
    let summary = rotator.run(&teams).await;

    // Per-repository failures are only reported through the log
    if dry_run {
        println!("[DRY RUN] {}", summary);
    } else {
        println!("Rotation complete: {}", summary);
    }

    Ok(())
}

fn read_teams(source: &str) -> Result<Vec<Team>> {
    if source == "-" {
        return models::load_teams(io::stdin().lock());
    }
    let file = File::open(source).with_context(|| format!("Failed to open teams file {}", source))?;
    models::load_teams(BufReader::new(file)).with_context(|| format!("Failed to load teams from {}", source))
}

/// Create a backend instance based on configuration
async fn create_backend(config: &Config) -> Result<Backend> {
    let backend_type: BackendType = config
        .backend
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    match backend_type {
        BackendType::Aws => {
            let region = config.aws.as_ref().map(|aws| aws.region.clone());
            let aws_client = AwsSecretsClient::new(region)
                .await
                .context("Failed to create AWS Secrets Manager client")?;
            info!("Using AWS Secrets Manager in {}", aws_client.region());
            Ok(Box::new(aws_client))
        }
        BackendType::Vault => {
            let vault_config = config.vault.as_ref().ok_or_else(|| {
                anyhow::anyhow!("Vault configuration not found. Set VAULT_ADDR/VAULT_TOKEN or configure [vault] section")
            })?;
            let vault = VaultBackend::new(
                vault_config.address.clone(),
                vault_config.token.clone(),
                vault_config.mount.clone(),
            )
            .context("Failed to create Vault client")?;
            Ok(Box::new(vault))
        }
    }
}
