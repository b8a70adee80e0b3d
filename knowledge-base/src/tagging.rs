//! Tag generation for projects that do not have tags yet.
//!
//! This is the producer side of the corpus: a project only becomes visible to
//! the question pipeline once it carries a non-empty tag list.

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{error, info, warn};

use shared::{ChatMessage, CompletionClient, CompletionRequest, EmbeddingRequest};

/// Projects tagged per scheduled run.
pub const DEFAULT_BATCH_SIZE: i64 = 40;

pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-ada-002";

const TAGGING_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Descriptive fields of a project awaiting tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, sqlx::FromRow)]
pub struct UntaggedProject {
    pub id: String,
    pub description: Option<String>,
    pub project_type: Option<String>,
    pub permit_category: Option<String>,
    pub file_date: Option<String>,
    pub address_city: Option<String>,
    pub address_county: Option<String>,
    pub address_state: Option<String>,
    pub address_zip: Option<String>,
    pub contact_id: Option<String>,
}

/// Tunables of one tagging run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggingSettings {
    /// Completion model that writes the tags
    pub model: String,
    pub batch_size: i64,
    /// Embedding model for tagged projects; `None` leaves embeddings off
    pub embedding_model: Option<String>,
}

impl TaggingSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            embedding_model: None,
        }
    }

    /// Load `TAGGING_BATCH_SIZE`, `TAGGING_EMBEDDINGS_ON` and `EMBEDDING_MODEL`.
    pub fn from_env(model: impl Into<String>) -> shared::Result<Self> {
        Self::from_lookup(model, |key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(model: impl Into<String>, lookup: F) -> shared::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let batch_size = match var("TAGGING_BATCH_SIZE") {
            Some(value) => value
                .parse::<i64>()
                .ok()
                .filter(|size| *size > 0)
                .ok_or_else(|| shared::Error::Config(format!("Invalid TAGGING_BATCH_SIZE: {}", value)))?,
            None => DEFAULT_BATCH_SIZE,
        };

        let embeddings_on = matches!(
            var("TAGGING_EMBEDDINGS_ON").map(|v| v.to_ascii_lowercase()).as_deref(),
            Some("1" | "true" | "yes" | "on")
        );
        let embedding_model = embeddings_on
            .then(|| var("EMBEDDING_MODEL").unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()));

        Ok(Self {
            model: model.into(),
            batch_size,
            embedding_model,
        })
    }
}

/// Storage for projects, their tag lists, and tag embeddings.
#[async_trait]
pub trait TaggingStore: Send + Sync {
    async fn untagged_projects(&self, limit: i64) -> shared::Result<Vec<UntaggedProject>>;
    async fn update_tags(&self, id: &str, tags: &[String]) -> shared::Result<()>;
    async fn insert_embedding(&self, id: &str, tags: &[String], embedding: &[f32]) -> shared::Result<()>;
}

/// Postgres-backed [`TaggingStore`] over the `project` and `project_embeddings` tables.
pub struct PgTaggingStore {
    pool: PgPool,
}

impl PgTaggingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// A jsonb parameter is assignable to a jsonb or text column.
const UPDATE_TAGS_SQL: &str = r#"
    UPDATE project
    SET project_tags = $2::jsonb,
        updated_at = $3
    WHERE id::text = $1
"#;

#[async_trait]
impl TaggingStore for PgTaggingStore {
    async fn untagged_projects(&self, limit: i64) -> shared::Result<Vec<UntaggedProject>> {
        let projects: Vec<UntaggedProject> = sqlx::query_as(
            r#"
            SELECT
                id::text AS id,
                description::text AS description,
                type::text AS project_type,
                permit_category::text AS permit_category,
                "fileDate"::text AS file_date,
                address_city::text AS address_city,
                address_county::text AS address_county,
                address_state::text AS address_state,
                address_zip::text AS address_zip,
                contact_id::text AS contact_id
            FROM project
            WHERE project_tags IS NULL
            AND type IS NOT NULL
            AND description IS NOT NULL
            ORDER BY id
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(projects)
    }

    async fn update_tags(&self, id: &str, tags: &[String]) -> shared::Result<()> {
        let payload = serde_json::to_string(tags)?;

        let result = sqlx::query(UPDATE_TAGS_SQL)
            .bind(id)
            .bind(payload)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(shared::Error::NotFound(format!("project {}", id)));
        }
        Ok(())
    }

    async fn insert_embedding(&self, id: &str, tags: &[String], embedding: &[f32]) -> shared::Result<()> {
        let payload = serde_json::to_string(tags)?;

        // Selecting the id from `project` keeps its native column type.
        let result = sqlx::query(
            r#"
            INSERT INTO project_embeddings (project_id, project_tags, embedding, updated_at)
            SELECT id, $2::jsonb, $3::vector, $4
            FROM project
            WHERE id::text = $1
            "#,
        )
        .bind(id)
        .bind(payload)
        .bind(vector_literal(embedding))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(shared::Error::NotFound(format!("project {}", id)));
        }
        Ok(())
    }
}

/// pgvector text form, `[0.1,0.2,...]`.
pub fn vector_literal(embedding: &[f32]) -> String {
    let values: Vec<String> = embedding.iter().map(f32::to_string).collect();
    format!("[{}]", values.join(","))
}

/// Outcome of one tagging run.
#[derive(Debug, Default, Serialize)]
pub struct TaggingSummary {
    pub projects_seen: u32,
    pub projects_tagged: u32,
    pub errors: u32,
    pub failed_ids: Vec<String>,
    pub embeddings_stored: u32,
    pub embedding_errors: u32,
    pub results: Vec<TaggedProject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaggedProject {
    pub id: String,
    pub tags: Vec<String>,
}

/// Build the tag request for one project. Missing fields render as empty text.
pub fn build_tagging_prompt(project: &UntaggedProject) -> String {
    let text = |value: &Option<String>| value.as_deref().unwrap_or("").trim().to_string();
    let permit_category = match text(&project.permit_category) {
        category if category == "Other" => String::new(),
        category => category,
    };
    let or_missing = |value: String| {
        if value.is_empty() {
            "No type provided".to_string()
        } else {
            value
        }
    };

    let description = text(&project.description);
    let description = if description.is_empty() {
        "No description provided".to_string()
    } else {
        description
    };

    format!(
        "Generate 15-20 comma separated, descriptive tags for the following project:\n\
         Project Description: {description}\n\
         Project Type: {project_type}\n\
         Project Permit Category: {permit_category}\n\
         Project Address: {county} {city} {state} {zip}\n\
         Contact ID: {contact_id}\n\
         Project Start Date: {file_date}\n\n\
         Tags should be relevant, concise, and describe what the project is all about. \
         Tags should include the project location, Month and Year of Start Date in month-year format and Contact ID. Tags:",
        project_type = or_missing(text(&project.project_type)),
        permit_category = or_missing(permit_category),
        county = text(&project.address_county),
        city = text(&project.address_city),
        state = text(&project.address_state),
        zip = text(&project.address_zip),
        contact_id = text(&project.contact_id),
        file_date = text(&project.file_date),
    )
}

/// Split a comma-separated completion into tags.
pub fn parse_tags(completion: &str) -> Vec<String> {
    completion
        .split(',')
        .map(|tag| tag.trim().trim_end_matches('.').trim())
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

/// Generate and store tags for up to `settings.batch_size` untagged projects, one at a time.
///
/// A failure for one project is logged and counted; the run continues. With an
/// embedding model set, each newly tagged project also gets a tag embedding. A
/// failed embedding is counted separately and leaves the stored tags in place.
pub async fn tag_projects(
    store: &dyn TaggingStore,
    completion: &dyn CompletionClient,
    settings: &TaggingSettings,
) -> shared::Result<TaggingSummary> {
    let projects = store.untagged_projects(settings.batch_size).await?;
    info!(
        count = projects.len(),
        embeddings = settings.embedding_model.is_some(),
        "Fetched untagged projects"
    );

    let mut summary = TaggingSummary::default();

    for project in projects {
        summary.projects_seen += 1;

        let request = CompletionRequest {
            model: settings.model.clone(),
            messages: vec![
                ChatMessage::system(TAGGING_SYSTEM_PROMPT),
                ChatMessage::user(build_tagging_prompt(&project)),
            ],
            max_tokens: 1000,
            temperature: None,
        };

        let tags = match completion.complete(&request).await {
            Ok(text) => parse_tags(&text),
            Err(e) => {
                error!(project_id = %project.id, error = %e, "Failed to generate tags");
                summary.errors += 1;
                summary.failed_ids.push(project.id);
                continue;
            }
        };

        // Leaving the column null keeps the project eligible for the next run.
        if tags.is_empty() {
            warn!(project_id = %project.id, "Completion produced no tags");
            summary.errors += 1;
            summary.failed_ids.push(project.id);
            continue;
        }

        if let Err(e) = store.update_tags(&project.id, &tags).await {
            error!(project_id = %project.id, error = %e, "Failed to update project tags");
            summary.errors += 1;
            summary.failed_ids.push(project.id);
            continue;
        }
        info!(project_id = %project.id, tags = tags.len(), "Updated project tags");
        summary.projects_tagged += 1;

        if let Some(model) = &settings.embedding_model {
            match embed_tags(store, completion, model, &project.id, &tags).await {
                Ok(()) => {
                    info!(project_id = %project.id, "Stored tag embedding");
                    summary.embeddings_stored += 1;
                }
                Err(e) => {
                    error!(project_id = %project.id, error = %e, "Failed to store tag embedding");
                    summary.embedding_errors += 1;
                }
            }
        }

        summary.results.push(TaggedProject {
            id: project.id,
            tags,
        });
    }

    info!(
        seen = summary.projects_seen,
        tagged = summary.projects_tagged,
        errors = summary.errors,
        embeddings = summary.embeddings_stored,
        embedding_errors = summary.embedding_errors,
        "Tagging run complete"
    );
    Ok(summary)
}

async fn embed_tags(
    store: &dyn TaggingStore,
    completion: &dyn CompletionClient,
    model: &str,
    id: &str,
    tags: &[String],
) -> shared::Result<()> {
    let request = EmbeddingRequest {
        model: model.to_string(),
        input: format!("{}: {}", id, tags.join(",")),
    };
    let embedding = completion
        .embed(&request)
        .await
        .map_err(|e| shared::Error::Http(e.to_string()))?;
    store.insert_embedding(id, tags, &embedding).await
}
