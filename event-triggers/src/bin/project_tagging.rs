//! Project Tagging Lambda - Generates descriptive tags for untagged projects.
//!
//! This Lambda runs on an EventBridge schedule and:
//! 1. Selects a batch of projects that have no tags yet
//! 2. Asks the completion API for 15-20 tags per project
//! 3. Writes the tags back so the projects join the knowledge base
//! 4. Optionally stores an embedding of each project's tags
//! 5. Alerts the admin topic when any project could not be tagged or embedded

use aws_sdk_sns::Client as SnsClient;
use knowledge_base::tagging::{tag_projects, PgTaggingStore, TaggedProject, TaggingSettings, TaggingSummary};
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use serde::{Deserialize, Serialize};
use shared::{Config, OpenAiClient};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct ScheduledEvent {
    #[serde(default, rename = "detail-type")]
    detail_type: String,
}

#[derive(Debug, Serialize)]
struct TaggingResponse {
    projects_seen: u32,
    projects_tagged: u32,
    errors: u32,
    embedding_errors: u32,
    results: Vec<TaggedProject>,
}

impl From<TaggingSummary> for TaggingResponse {
    fn from(summary: TaggingSummary) -> Self {
        Self {
            projects_seen: summary.projects_seen,
            projects_tagged: summary.projects_tagged,
            errors: summary.errors,
            embedding_errors: summary.embedding_errors,
            results: summary.results,
        }
    }
}

struct AppState {
    store: PgTaggingStore,
    completion: OpenAiClient,
    settings: TaggingSettings,
    sns_client: SnsClient,
    admin_alert_topic_arn: Option<String>,
}

impl AppState {
    async fn new() -> Result<Self, Error> {
        let config = Config::from_env()?;
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let secrets_client = aws_sdk_secretsmanager::Client::new(&aws_config);
        let sns_client = SnsClient::new(&aws_config);

        let db_pool = shared::db::connect(&config, &secrets_client).await?;
        let api_key = shared::resolve_openai_api_key(&config, &secrets_client).await?;
        let completion = OpenAiClient::from_config(&config, api_key)?;

        let settings = TaggingSettings::from_env(config.completion_model.clone())?;
        let admin_alert_topic_arn = std::env::var("ADMIN_ALERT_TOPIC_ARN")
            .ok()
            .filter(|arn| !arn.trim().is_empty());

        Ok(Self {
            store: PgTaggingStore::new(db_pool),
            completion,
            settings,
            sns_client,
            admin_alert_topic_arn,
        })
    }
}

fn alert_message(summary: &TaggingSummary) -> serde_json::Value {
    serde_json::json!({
        "type": "project_tagging_failures",
        "projects_seen": summary.projects_seen,
        "projects_tagged": summary.projects_tagged,
        "errors": summary.errors,
        "embedding_errors": summary.embedding_errors,
        "failed_project_ids": summary.failed_ids,
    })
}

async fn publish_admin_alert(state: &AppState, summary: &TaggingSummary) -> Result<(), Error> {
    if let Some(topic_arn) = &state.admin_alert_topic_arn {
        state
            .sns_client
            .publish()
            .topic_arn(topic_arn)
            .subject("Project tagging failures")
            .message(serde_json::to_string(&alert_message(summary))?)
            .send()
            .await
            .map_err(|e| format!("Failed to publish to SNS: {}", e))?;
    }

    Ok(())
}

async fn handler(
    state: Arc<AppState>,
    event: LambdaEvent<ScheduledEvent>,
) -> Result<TaggingResponse, Error> {
    info!(detail_type = %event.payload.detail_type, "Starting project tagging");

    let summary = tag_projects(&state.store, &state.completion, &state.settings).await?;

    if summary.errors > 0 || summary.embedding_errors > 0 {
        if let Err(e) = publish_admin_alert(&state, &summary).await {
            warn!(error = %e, "Failed to publish admin alert");
        }
    }

    let response = TaggingResponse::from(summary);
    info!(
        projects_seen = response.projects_seen,
        projects_tagged = response.projects_tagged,
        errors = response.errors,
        "Project tagging complete"
    );

    Ok(response)
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduled_event_parses() {
        let event: ScheduledEvent = serde_json::from_value(serde_json::json!({
            "detail-type": "Scheduled Event",
            "source": "aws.events",
            "detail": {}
        }))
        .unwrap();
        assert_eq!(event.detail_type, "Scheduled Event");

        let bare: ScheduledEvent = serde_json::from_str("{}").unwrap();
        assert!(bare.detail_type.is_empty());
    }

    #[test]
    fn test_alert_lists_failed_projects() {
        let summary = TaggingSummary {
            projects_seen: 3,
            projects_tagged: 1,
            errors: 2,
            failed_ids: vec!["p-2".to_string(), "p-3".to_string()],
            embedding_errors: 1,
            results: vec![TaggedProject {
                id: "p-1".to_string(),
                tags: vec!["roof".to_string(), "Austin TX".to_string()],
            }],
            ..TaggingSummary::default()
        };

        let message = alert_message(&summary);
        assert_eq!(message["errors"], 2);
        assert_eq!(message["embedding_errors"], 1);
        assert_eq!(message["failed_project_ids"][1], "p-3");

        let body = serde_json::to_value(TaggingResponse::from(summary)).unwrap();
        assert_eq!(body["projects_tagged"], 1);
        assert_eq!(body["results"][0]["id"], "p-1");
        assert_eq!(body["results"][0]["tags"][1], "Austin TX");
    }
}
