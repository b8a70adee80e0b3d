//! Concurrent fan-out over chunks and merging of their answers.

use futures::{stream, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::answer::{clean_answer, has_signal, parse_answer, ProjectMatch};
use crate::chunker::chunk;
use crate::corpus::CorpusRecord;
use crate::error::{PipelineError, SynthesisError};
use crate::settings::{JoinPolicy, PipelineSettings};
use crate::synthesizer::{SynthesizedAnswer, Synthesizer};

/// Answer text when the corpus produced no chunks at all.
pub const NO_CHUNKS_PROCESSED: &str = "No chunks processed.";

/// Merged result of one question over the whole corpus.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedAnswer {
    /// Surviving cleaned answers joined with `",\n"`; not necessarily valid JSON
    pub text: String,
    pub chunks_total: usize,
    /// Indices of chunks whose completion call failed
    pub chunks_failed: Vec<usize>,
    /// Indices of chunks whose answer did not follow the schema
    pub malformed_chunks: Vec<usize>,
    pub matches: Vec<ProjectMatch>,
}

impl AggregatedAnswer {
    fn no_chunks() -> Self {
        Self {
            text: NO_CHUNKS_PROCESSED.to_string(),
            ..Self::default()
        }
    }
}

/// Ask `question` of every chunk of `corpus` concurrently and merge the answers.
pub async fn aggregate(
    synthesizer: &Synthesizer,
    question: &str,
    corpus: &[CorpusRecord],
    settings: &PipelineSettings,
) -> Result<AggregatedAnswer, PipelineError> {
    let chunks = chunk(corpus, settings.chunk_size)?;
    if chunks.is_empty() {
        info!("No chunks to process");
        return Ok(AggregatedAnswer::no_chunks());
    }

    let chunks_total = chunks.len();
    let concurrency = settings.max_concurrency.unwrap_or(chunks_total).max(1);
    info!(chunks = chunks_total, concurrency, "Divided knowledge base into chunks");

    let calls = stream::iter(chunks.into_iter().enumerate())
        .map(move |(index, records)| {
            info!(chunk = index + 1, records = records.len(), "Processing chunk");
            synthesizer.synthesize(index, question, records)
        })
        .buffered(concurrency)
        .boxed();

    let (answers, failed) = match settings.join_policy {
        JoinPolicy::FailFast => (calls.try_collect::<Vec<_>>().await?, Vec::new()),
        JoinPolicy::SettleAll => {
            let results: Vec<Result<SynthesizedAnswer, SynthesisError>> = calls.collect().await;
            let (answers, failures): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
            let answers: Vec<SynthesizedAnswer> = answers.into_iter().filter_map(Result::ok).collect();
            let failures: Vec<SynthesisError> = failures.into_iter().filter_map(Result::err).collect();

            let failed: Vec<usize> = failures.iter().map(|e| e.chunk).collect();
            if answers.is_empty() {
                if let Some(first) = failures.into_iter().next() {
                    return Err(first.into());
                }
            }
            if !failed.is_empty() {
                warn!(failed = ?failed, "Returning partial answer without failed chunks");
            }
            (answers, failed)
        }
    };

    let merged = merge(answers, chunks_total, failed, settings.min_answer_chars);
    info!(
        answer_chars = merged.text.len(),
        matches = merged.matches.len(),
        malformed = merged.malformed_chunks.len(),
        "Cumulative response assembled"
    );
    Ok(merged)
}

/// Clean, filter, validate, and join chunk answers in chunk order.
pub fn merge(
    answers: Vec<SynthesizedAnswer>,
    chunks_total: usize,
    chunks_failed: Vec<usize>,
    min_answer_chars: usize,
) -> AggregatedAnswer {
    let mut parts = Vec::new();
    let mut malformed_chunks = Vec::new();
    let mut matches = Vec::new();

    for answer in answers {
        let cleaned = clean_answer(&answer.text);
        if !has_signal(&cleaned, min_answer_chars) {
            debug!(chunk = answer.chunk, "Discarding answer without signal");
            continue;
        }

        match parse_answer(&cleaned) {
            Ok(found) if found.is_empty() => {
                debug!(chunk = answer.chunk, "Discarding empty answer");
                continue;
            }
            Ok(found) => matches.extend(found),
            Err(e) => {
                warn!(chunk = answer.chunk, reason = %e.reason, "Answer does not follow the schema");
                malformed_chunks.push(answer.chunk);
            }
        }
        parts.push(cleaned);
    }

    AggregatedAnswer {
        text: parts.join(",\n"),
        chunks_total,
        chunks_failed,
        malformed_chunks,
        matches,
    }
}
