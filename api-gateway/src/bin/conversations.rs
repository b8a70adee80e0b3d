//! Conversations Lambda - Answers questions about property projects.
//!
//! Endpoints:
//! - GET /conversations?userquery=... - Ask the project knowledge base

use knowledge_base::{KnowledgeBase, PgProjectSource, PipelineSettings, ProjectMatch, GENERIC_ERROR_MESSAGE};
use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use serde::Serialize;
use shared::http::{error_response, json_response};
use shared::{ApiResponse, Config, ConversationQuery, OpenAiClient};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use validator::Validate;

const MISSING_QUERY_MESSAGE: &str = "Validation Error - Search Criteria Missing";

/// Conversation response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConversationResponse {
    ai_response: String,
    matches: Vec<ProjectMatch>,
    chunks_failed: Vec<usize>,
}

/// Application state
struct AppState {
    knowledge_base: KnowledgeBase,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let secrets_client = aws_sdk_secretsmanager::Client::new(&aws_config);

        let db_pool = shared::db::connect(&config, &secrets_client).await?;
        let api_key = shared::resolve_openai_api_key(&config, &secrets_client).await?;
        let completion = OpenAiClient::from_config(&config, api_key)?;
        let settings = PipelineSettings::from_env()?;

        info!(
            model = %config.completion_model,
            chunk_size = settings.chunk_size,
            join_policy = ?settings.join_policy,
            "Conversations Lambda initialised"
        );

        let knowledge_base = KnowledgeBase::new(
            Arc::new(PgProjectSource::new(db_pool)),
            Arc::new(completion),
            config.completion_model.clone(),
            settings,
        )?;

        Ok(Self { knowledge_base })
    }
}

/// Validate the raw `userquery` parameter into a question.
fn parse_question(raw: Option<&str>) -> shared::Result<String> {
    let query = ConversationQuery::new(raw.unwrap_or_default());
    if query.userquery.is_empty() {
        return Err(shared::Error::Validation(MISSING_QUERY_MESSAGE.to_string()));
    }
    query.validate()?;
    Ok(query.userquery)
}

/// Status code and client-facing message for a rejected request.
fn rejection(err: shared::Error) -> (u16, String) {
    let status = err.status_code();
    match err {
        shared::Error::Validation(reason) => (status, reason),
        other => (status, other.to_string()),
    }
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let params = event.query_string_parameters();
    let question = match parse_question(params.first("userquery")) {
        Ok(question) => question,
        Err(e) => {
            warn!(error = %e, "Rejected conversation request");
            let (status, message) = rejection(e);
            return error_response(status, message);
        }
    };

    info!(question_chars = question.chars().count(), "Answering question");

    let response = match state.knowledge_base.answer(&question).await {
        Ok(answer) => ConversationResponse {
            ai_response: answer.text,
            matches: answer.matches,
            chunks_failed: answer.chunks_failed,
        },
        Err(e) => {
            error!(error = %e, "Failed to answer question");
            ConversationResponse {
                ai_response: GENERIC_ERROR_MESSAGE.to_string(),
                matches: Vec::new(),
                chunks_failed: Vec::new(),
            }
        }
    };

    json_response(200, &ApiResponse::success(response))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await?);
    let state_clone = state.clone();

    run(service_fn(move |event| {
        let state = state_clone.clone();
        async move { handler(state, event).await }
    }))
    .await
}
