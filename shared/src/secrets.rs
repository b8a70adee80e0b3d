//! AWS Secrets Manager integration.

use aws_sdk_secretsmanager::Client as SecretsClient;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;
use tokio::sync::RwLock;

use crate::{Config, Error, Result};

/// Cached secrets, kept for the lifetime of the Lambda execution environment.
static SECRETS_CACHE: OnceLock<RwLock<HashMap<String, String>>> = OnceLock::new();

fn get_cache() -> &'static RwLock<HashMap<String, String>> {
    SECRETS_CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Database credentials from Secrets Manager.
#[derive(Debug, Deserialize)]
pub struct DatabaseCredentials {
    pub username: String,
    pub password: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
}

/// Get a secret value from Secrets Manager with caching.
pub async fn get_secret(client: &SecretsClient, secret_arn: &str) -> Result<String> {
    {
        let cache = get_cache().read().await;
        if let Some(value) = cache.get(secret_arn) {
            return Ok(value.clone());
        }
    }

    let response = client
        .get_secret_value()
        .secret_id(secret_arn)
        .send()
        .await
        .map_err(|e| Error::Aws(format!("Failed to get secret: {}", e)))?;

    let secret_string = response
        .secret_string()
        .ok_or_else(|| Error::Aws("Secret has no string value".to_string()))?
        .to_string();

    {
        let mut cache = get_cache().write().await;
        cache.insert(secret_arn.to_string(), secret_string.clone());
    }

    Ok(secret_string)
}

/// Get database credentials from Secrets Manager.
pub async fn get_database_credentials(
    client: &SecretsClient,
    secret_arn: &str,
) -> Result<DatabaseCredentials> {
    let secret_string = get_secret(client, secret_arn).await?;

    serde_json::from_str(&secret_string)
        .map_err(|e| Error::Aws(format!("Failed to parse database credentials: {}", e)))
}

/// Resolve the OpenAI API key, preferring a key set directly in the environment.
pub async fn resolve_openai_api_key(config: &Config, client: &SecretsClient) -> Result<String> {
    if let Some(key) = &config.openai_api_key {
        return Ok(key.clone());
    }

    let secret_arn = config
        .openai_api_key_secret_arn
        .as_deref()
        .ok_or_else(|| Error::Config("No OpenAI API key configured".to_string()))?;

    let secret_string = get_secret(client, secret_arn).await?;
    api_key_from_secret(&secret_string)
}

/// The key secret is either the bare key or a JSON object carrying it.
fn api_key_from_secret(secret: &str) -> Result<String> {
    let trimmed = secret.trim();
    if !trimmed.starts_with('{') {
        return Ok(trimmed.to_string());
    }

    let fields: HashMap<String, serde_json::Value> = serde_json::from_str(trimmed)
        .map_err(|e| Error::Aws(format!("Failed to parse API key secret: {}", e)))?;

    ["api_key", "OPENAI_API_KEY", "apiKey"]
        .iter()
        .find_map(|name| fields.get(*name).and_then(|v| v.as_str()))
        .map(str::to_string)
        .ok_or_else(|| Error::Aws("API key secret has no api_key field".to_string()))
}
