//! Prompt assembly and one completion call per chunk.

use std::sync::Arc;

use shared::{ChatMessage, CompletionClient, CompletionError, CompletionRequest};
use tracing::{debug, error, info, warn};

use crate::corpus::CorpusRecord;
use crate::error::SynthesisError;

pub const SYSTEM_PROMPT: &str = "Your name is Alexa. You are the Chief Data Scientist at VenVeo. \
You answer user's questions about the various properties and projects. \
The project_tags in the knowledge base has details on various projects done on any property. \
You always query the knowledge base to answer queries, never make stuff up. \
If no relevant data is returned then you return empty JSON.";

const ANSWER_SCHEMA: &str = r#"{
    "project-id": "project id from the knowledge base",
    "location": "location from the knowledge base",
    "contact-id": "contact id from the knowledge base",
    "otherDetails": "any additional relevant details"
}"#;

/// Raw completion text for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedAnswer {
    pub chunk: usize,
    pub text: String,
}

/// Asks the completion API one question about one chunk at a time.
pub struct Synthesizer {
    completion: Arc<dyn CompletionClient>,
    model: String,
    max_tokens: u32,
    max_entries: usize,
}

impl Synthesizer {
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        model: impl Into<String>,
        max_tokens: u32,
        max_entries: usize,
    ) -> Self {
        Self {
            completion,
            model: model.into(),
            max_tokens,
            max_entries,
        }
    }

    /// Records that fit in one prompt, and how many were left out.
    pub fn prompt_records<'a>(&self, records: &'a [CorpusRecord]) -> (&'a [CorpusRecord], usize) {
        let kept = records.len().min(self.max_entries);
        (&records[..kept], records.len() - kept)
    }

    /// Build the user prompt from the first `max_entries` records of `records`.
    pub fn build_prompt(&self, question: &str, records: &[CorpusRecord]) -> String {
        let (trimmed, _) = self.prompt_records(records);
        let entries: Vec<String> = trimmed
            .iter()
            .map(|entry| {
                format!(
                    "project-id: {}\nproject_tags: {}",
                    entry.id,
                    entry.project_tags.join(",")
                )
            })
            .collect();

        format!(
            "Answer this question:\n\nQuery: \"{question}\"\n\n\
             This is the Knowledge Base for projects done on any property. \
             The project_tags defines the date of project, type of project and the location of property:\n\
             {entries}\n\n\
             Provide the output in the format listed below. \
             Only provide the details listed below in JSON and nothing else:\n\
             {ANSWER_SCHEMA}",
            entries = entries.join("\n\n"),
        )
    }

    /// Answer `question` from one chunk of the corpus.
    pub async fn synthesize(
        &self,
        chunk: usize,
        question: &str,
        records: &[CorpusRecord],
    ) -> Result<SynthesizedAnswer, SynthesisError> {
        let (_, dropped) = self.prompt_records(records);
        if dropped > 0 {
            warn!(
                chunk,
                records = records.len(),
                dropped,
                max_entries = self.max_entries,
                "Chunk exceeds prompt entry limit; trailing records not sent"
            );
        }

        let prompt = self.build_prompt(question, records);
        debug!(chunk, prompt_chars = prompt.len(), "Built chunk prompt");

        let request = CompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
            max_tokens: self.max_tokens,
            temperature: None,
        };

        match self.completion.complete(&request).await {
            Ok(text) => {
                info!(chunk, answer_chars = text.len(), "Chunk answered");
                Ok(SynthesizedAnswer { chunk, text })
            }
            Err(source) => {
                log_failure(chunk, &source);
                Err(SynthesisError { chunk, source })
            }
        }
    }
}

fn log_failure(chunk: usize, err: &CompletionError) {
    match err {
        CompletionError::RateLimited => error!(chunk, status = 429, "Rate limit exceeded"),
        CompletionError::Unavailable => error!(chunk, status = 503, "Service unavailable"),
        CompletionError::Http { status, body } => {
            error!(chunk, status, body = %body, "Completion API error")
        }
        CompletionError::Transport(reason) => {
            error!(chunk, reason = %reason, "Completion request failed")
        }
        CompletionError::Empty => error!(chunk, "No completion found or completion was empty"),
        CompletionError::Unsupported(what) => error!(chunk, unsupported = what, "Completion client cannot serve request"),
    }
}
