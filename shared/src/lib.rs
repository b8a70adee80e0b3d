//! Shared library for the project knowledge base Lambda functions.
//!
//! This crate provides configuration, error types, and the clients (database,
//! secrets, chat completion) that every Lambda in the workspace is built from.

pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod models;
pub mod secrets;

pub use completion::{ChatMessage, CompletionClient, CompletionError, CompletionRequest, EmbeddingRequest, OpenAiClient};
pub use config::Config;
pub use error::{Error, Result};
pub use http::ApiResponse;
pub use models::ConversationQuery;
pub use secrets::{get_secret, get_database_credentials, resolve_openai_api_key, DatabaseCredentials};
