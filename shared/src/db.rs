//! Database connection management.

use aws_sdk_secretsmanager::Client as SecretsClient;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use crate::secrets::{get_database_credentials, DatabaseCredentials};
use crate::{Config, Error, Result};

/// Create a database connection pool from a connection string.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    Ok(pool)
}

/// Resolve the connection string, reading credentials from Secrets Manager when needed.
pub async fn resolve_database_url(config: &Config, secrets: &SecretsClient) -> Result<String> {
    if let Some(url) = &config.database_url {
        return Ok(url.clone());
    }

    let secret_arn = config
        .db_secret_arn
        .as_deref()
        .ok_or_else(|| Error::Config("DB_SECRET_ARN not set".to_string()))?;
    let creds = get_database_credentials(secrets, secret_arn).await?;

    database_url_from_credentials(config, &creds)
}

/// Connect using whichever database settings the configuration carries.
pub async fn connect(config: &Config, secrets: &SecretsClient) -> Result<PgPool> {
    let url = resolve_database_url(config, secrets).await?;
    create_pool(&url).await
}

fn database_url_from_credentials(config: &Config, creds: &DatabaseCredentials) -> Result<String> {
    let host = config
        .db_host
        .as_deref()
        .or(creds.host.as_deref())
        .ok_or_else(|| Error::Config("DB_HOST not set".to_string()))?;
    let db_name = creds.dbname.as_deref().unwrap_or(&config.db_name);

    Ok(format!(
        "postgres://{}:{}@{}:{}/{}",
        creds.username,
        creds.password,
        host,
        creds.port.unwrap_or(5432),
        db_name
    ))
}
