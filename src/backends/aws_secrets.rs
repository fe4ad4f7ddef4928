use anyhow::{Context, Result};
use aws_config::Region;
use aws_sdk_secretsmanager::primitives::DateTime as AwsDateTime;
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::secret_backend::SecretBackend;
use crate::error::InspectionError;

/// Every write stamps the secret description with this prefix and an RFC 3339 time
const DESCRIPTION_PREFIX: &str = "Github credentials for Concourse. Last updated: ";

/// AWS Secrets Manager client
pub struct AwsSecretsClient {
    client: SecretsManagerClient,
    region: String,
}

impl AwsSecretsClient {
    /// Create a new AWS Secrets Manager client
    pub async fn new(region: Option<String>) -> Result<Self> {
        let region_str = region.unwrap_or_else(|| {
            std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string())
        });

        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(region_str.clone()))
            .load()
            .await;
        let client = SecretsManagerClient::new(&config);

        Ok(Self {
            client,
            region: region_str,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

/// Description written alongside every secret value
fn description_for(updated: DateTime<Utc>) -> String {
    format!("{}{}", DESCRIPTION_PREFIX, updated.to_rfc3339())
}

/// Recover the write time from a description produced by [`description_for`]
fn parse_description(description: &str) -> Option<DateTime<Utc>> {
    let stamp = description.strip_prefix(DESCRIPTION_PREFIX)?;
    DateTime::parse_from_rfc3339(stamp.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn from_aws_datetime(value: &AwsDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value.secs(), value.subsec_nanos())
}

#[async_trait::async_trait]
impl SecretBackend for AwsSecretsClient {
    async fn write_secret(&self, path: &str, value: &str) -> Result<()> {
        debug!("Writing secret to AWS Secrets Manager: {}", path);

        let description = description_for(Utc::now());

        let exists = match self.client.describe_secret().secret_id(path).send().await {
            Ok(_) => true,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception()) =>
            {
                false
            }
            Err(e) => {
                return Err(anyhow::Error::new(e).context(format!(
                    "Failed to describe secret '{}' in AWS Secrets Manager",
                    path
                )))
            }
        };

        if exists {
            self.client
                .update_secret()
                .secret_id(path)
                .secret_string(value)
                .description(&description)
                .send()
                .await
                .with_context(|| {
                    format!("Failed to update secret '{}' in AWS Secrets Manager", path)
                })?;
            info!("Successfully updated secret '{}' in AWS Secrets Manager", path);
        } else {
            self.client
                .create_secret()
                .name(path)
                .secret_string(value)
                .description(&description)
                .send()
                .await
                .with_context(|| {
                    format!("Failed to create secret '{}' in AWS Secrets Manager", path)
                })?;
            info!("Successfully created secret '{}' in AWS Secrets Manager", path);
        }

        Ok(())
    }

    async fn last_updated(&self, path: &str) -> Result<DateTime<Utc>, InspectionError> {
        debug!("Describing secret in AWS Secrets Manager: {}", path);

        let response = match self.client.describe_secret().secret_id(path).send().await {
            Ok(response) => response,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception()) =>
            {
                return Err(InspectionError::NotFound(path.to_string()));
            }
            Err(e) => {
                return Err(InspectionError::Other(anyhow::Error::new(e).context(format!(
                    "Failed to describe secret '{}' in AWS Secrets Manager",
                    path
                ))))
            }
        };

        response
            .description()
            .and_then(parse_description)
            .or_else(|| response.last_changed_date().and_then(from_aws_datetime))
            .ok_or_else(|| {
                InspectionError::Other(anyhow::anyhow!(
                    "Secret '{}' has no last updated timestamp",
                    path
                ))
            })
    }

    fn backend_type(&self) -> &'static str {
        "AWS Secrets Manager"
    }
}
