//! Question answering over the tagged project corpus.
//!
//! A question runs through fetch (or snapshot) -> chunk -> one completion per
//! chunk -> merge. [`KnowledgeBase`] wires the stages together from injected
//! clients so the Lambda binaries only build the clients and call it.

pub mod aggregator;
pub mod answer;
pub mod chunker;
pub mod corpus;
pub mod error;
pub mod fetcher;
pub mod settings;
pub mod snapshot;
pub mod synthesizer;
pub mod tagging;

use std::sync::Arc;

use shared::CompletionClient;
use tracing::{error, info};

pub use aggregator::{AggregatedAnswer, NO_CHUNKS_PROCESSED};
pub use answer::ProjectMatch;
pub use corpus::{Corpus, CorpusRecord};
pub use error::{MalformedAnswer, MalformedRecord, PipelineError, SnapshotError, SynthesisError};
pub use fetcher::{fetch_corpus, PgProjectSource, ProjectSource};
pub use settings::{JoinPolicy, PipelineSettings};
pub use snapshot::SnapshotCache;
pub use synthesizer::Synthesizer;
pub use tagging::{tag_projects, PgTaggingStore, TaggingSettings, TaggingStore, TaggingSummary};

/// The only text a caller sees when a question cannot be answered.
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred while processing your request.";

pub struct KnowledgeBase {
    source: Arc<dyn ProjectSource>,
    synthesizer: Synthesizer,
    snapshot: SnapshotCache,
    settings: PipelineSettings,
}

impl KnowledgeBase {
    pub fn new(
        source: Arc<dyn ProjectSource>,
        completion: Arc<dyn CompletionClient>,
        model: impl Into<String>,
        settings: PipelineSettings,
    ) -> Result<Self, PipelineError> {
        settings.validate()?;

        let synthesizer = Synthesizer::new(
            completion,
            model,
            settings.completion_max_tokens,
            settings.max_entries_per_prompt,
        );
        let snapshot =
            SnapshotCache::new(settings.snapshot_path.clone()).with_max_age(settings.snapshot_max_age);

        Ok(Self {
            source,
            synthesizer,
            snapshot,
            settings,
        })
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// The corpus from the snapshot if one is usable, otherwise a full fetch.
    pub async fn load_corpus(&self) -> Result<Corpus, PipelineError> {
        if let Some(corpus) = self.snapshot.load().await {
            if !corpus.is_empty() {
                info!(records = corpus.len(), "Using knowledge base snapshot");
                return Ok(corpus);
            }
        }

        let corpus = fetch_corpus(
            self.source.as_ref(),
            self.settings.page_size,
            self.settings.max_pages,
        )
        .await?;

        if let Err(e) = self.snapshot.save(&corpus).await {
            error!(
                path = %self.snapshot.path().display(),
                error = %e,
                "Failed to write knowledge base snapshot"
            );
        }

        Ok(corpus)
    }

    pub async fn answer(&self, question: &str) -> Result<AggregatedAnswer, PipelineError> {
        let corpus = self.load_corpus().await?;
        aggregator::aggregate(&self.synthesizer, question, &corpus, &self.settings).await
    }

    /// Answer text for `question`, or [`GENERIC_ERROR_MESSAGE`] on any failure.
    pub async fn handle_question(&self, question: &str) -> String {
        match self.answer(question).await {
            Ok(answer) => answer.text,
            Err(e) => {
                error!(error = %e, "Failed to answer question");
                GENERIC_ERROR_MESSAGE.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::ProjectRow;
    use crate::fetcher::tests::MemorySource;
    use crate::synthesizer::tests::RecordingClient;
    use async_trait::async_trait;
    use shared::{CompletionError, CompletionRequest};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    const ANSWER: &str = "```json\n{\"project-id\": \"p-00000\", \"location\": \"Austin, TX\"}\n```";

    fn settings(dir: &TempDir, chunk_size: usize, join_policy: JoinPolicy) -> PipelineSettings {
        PipelineSettings {
            chunk_size,
            join_policy,
            snapshot_path: dir.path().join("knowledgeBase.json"),
            ..PipelineSettings::default()
        }
    }

    /// Fails for the chunk whose prompt lists `p-00001`.
    struct SecondChunkFails;

    #[async_trait]
    impl CompletionClient for SecondChunkFails {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
            if request.messages[1].content.contains("project-id: p-00001\n") {
                Err(CompletionError::Http {
                    status: 500,
                    body: "upstream".to_string(),
                })
            } else {
                Ok(ANSWER.to_string())
            }
        }
    }

    #[tokio::test]
    async fn test_empty_corpus_short_circuits() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(RecordingClient::new(|| Ok(ANSWER.to_string())));
        let kb = KnowledgeBase::new(
            Arc::new(MemorySource::new(vec![])),
            client.clone(),
            "gpt-4o-mini",
            settings(&dir, 10, JoinPolicy::SettleAll),
        )
        .unwrap();

        assert_eq!(kb.handle_question("anything").await, NO_CHUNKS_PROCESSED);
        assert!(client.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_populates_snapshot_and_second_call_uses_it() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(MemorySource::tagged(5));
        let client = Arc::new(RecordingClient::new(|| Ok(ANSWER.to_string())));
        let kb = KnowledgeBase::new(
            source.clone(),
            client.clone(),
            "gpt-4o-mini",
            settings(&dir, 2, JoinPolicy::SettleAll),
        )
        .unwrap();

        let first = kb.answer("roofing in austin?").await.unwrap();
        assert_eq!(first.chunks_total, 3);
        assert!(dir.path().join("knowledgeBase.json").exists());
        let calls_after_fetch = source.calls.load(Ordering::SeqCst);

        let second = kb.answer("roofing in austin?").await.unwrap();
        assert_eq!(second.chunks_total, 3);
        assert_eq!(source.calls.load(Ordering::SeqCst), calls_after_fetch);
        assert_eq!(client.requests.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_snapshot_write_failure_does_not_abort() {
        let dir = TempDir::new().unwrap();
        let settings = PipelineSettings {
            snapshot_path: dir.path().join("missing").join("knowledgeBase.json"),
            ..PipelineSettings::default()
        };
        let kb = KnowledgeBase::new(
            Arc::new(MemorySource::tagged(3)),
            Arc::new(RecordingClient::new(|| Ok(ANSWER.to_string()))),
            "gpt-4o-mini",
            settings,
        )
        .unwrap();

        let answer = kb.answer("roofing?").await.unwrap();
        assert_eq!(answer.matches.len(), 1);
    }

    #[tokio::test]
    async fn test_one_failed_chunk_under_each_policy() {
        let dir = TempDir::new().unwrap();
        let fail_fast = KnowledgeBase::new(
            Arc::new(MemorySource::tagged(3)),
            Arc::new(SecondChunkFails),
            "gpt-4o-mini",
            settings(&dir, 1, JoinPolicy::FailFast),
        )
        .unwrap();
        assert_eq!(fail_fast.handle_question("roofing?").await, GENERIC_ERROR_MESSAGE);

        let settle_all = KnowledgeBase::new(
            Arc::new(MemorySource::tagged(3)),
            Arc::new(SecondChunkFails),
            "gpt-4o-mini",
            settings(&dir, 1, JoinPolicy::SettleAll),
        )
        .unwrap();
        let answer = settle_all.answer("roofing?").await.unwrap();
        assert_eq!(answer.chunks_total, 3);
        assert_eq!(answer.chunks_failed, vec![1]);
        assert_eq!(answer.matches.len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_record_does_not_stop_pipeline() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(RecordingClient::new(|| Ok(ANSWER.to_string())));
        let kb = KnowledgeBase::new(
            Arc::new(MemorySource::new(vec![
                ProjectRow::new("a", Some("not json")),
                ProjectRow::new("b", Some(r#"["deck","2023-07"]"#)),
            ])),
            client.clone(),
            "gpt-4o-mini",
            settings(&dir, 10, JoinPolicy::SettleAll),
        )
        .unwrap();

        let answer = kb.answer("decks?").await.unwrap();
        assert_eq!(answer.chunks_total, 1);
        let prompt = client.requests.lock().unwrap()[0].messages[1].content.clone();
        assert!(prompt.contains("project-id: b\n"));
        assert!(!prompt.contains("project-id: a\n"));
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let result = KnowledgeBase::new(
            Arc::new(MemorySource::new(vec![])),
            Arc::new(RecordingClient::new(|| Ok(String::new()))),
            "gpt-4o-mini",
            PipelineSettings {
                chunk_size: 0,
                ..PipelineSettings::default()
            },
        );
        assert!(matches!(result, Err(PipelineError::InvalidSettings(_))));
    }
}
