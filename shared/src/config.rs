//! Configuration management for Lambda functions.

use std::env;
use std::time::Duration;

use crate::{Error, Result};

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_COMPLETION_MODEL: &str = "gpt-4o-mini";
const DEFAULT_COMPLETION_TIMEOUT_SECS: u64 = 60;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Full Postgres connection string, takes precedence over the host/secret pair
    pub database_url: Option<String>,
    /// Database host
    pub db_host: Option<String>,
    /// Database name
    pub db_name: String,
    /// ARN of the secret containing database credentials
    pub db_secret_arn: Option<String>,
    /// AWS region
    pub aws_region: String,
    /// OpenAI API key given directly in the environment
    pub openai_api_key: Option<String>,
    /// ARN of the secret holding the OpenAI API key
    pub openai_api_key_secret_arn: Option<String>,
    /// Base URL of the chat completion API
    pub openai_base_url: String,
    /// Model used for completions
    pub completion_model: String,
    /// Per-request timeout for the completion API
    pub completion_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let completion_timeout = match var("COMPLETION_TIMEOUT_SECS") {
            Some(raw) => raw.parse::<u64>().map_err(|e| {
                Error::Config(format!("COMPLETION_TIMEOUT_SECS must be an integer: {}", e))
            })?,
            None => DEFAULT_COMPLETION_TIMEOUT_SECS,
        };

        let config = Self {
            database_url: var("DATABASE_URL"),
            db_host: var("DB_HOST"),
            db_name: var("DB_NAME").unwrap_or_else(|| "postgres".to_string()),
            db_secret_arn: var("DB_SECRET_ARN"),
            aws_region: var("AWS_REGION").unwrap_or_else(|| "us-east-1".to_string()),
            openai_api_key: var("OPENAI_API_KEY"),
            openai_api_key_secret_arn: var("OPENAI_API_KEY_SECRET_ARN"),
            openai_base_url: var("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            completion_model: var("COMPLETION_MODEL")
                .unwrap_or_else(|| DEFAULT_COMPLETION_MODEL.to_string()),
            completion_timeout: Duration::from_secs(completion_timeout),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.database_url.is_none() && (self.db_host.is_none() || self.db_secret_arn.is_none()) {
            return Err(Error::Config(
                "set DATABASE_URL, or DB_HOST together with DB_SECRET_ARN".to_string(),
            ));
        }
        if self.openai_api_key.is_none() && self.openai_api_key_secret_arn.is_none() {
            return Err(Error::Config(
                "set OPENAI_API_KEY or OPENAI_API_KEY_SECRET_ARN".to_string(),
            ));
        }
        Ok(())
    }
}
