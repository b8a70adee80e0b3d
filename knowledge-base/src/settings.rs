//! Pipeline tunables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PipelineError;

/// How the aggregator treats a failed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// Keep every chunk that succeeded and report the ones that failed.
    #[default]
    SettleAll,
    /// Abort the whole aggregation on the first failed chunk.
    FailFast,
}

impl FromStr for JoinPolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "settle_all" | "settle-all" => Ok(JoinPolicy::SettleAll),
            "fail_fast" | "fail-fast" => Ok(JoinPolicy::FailFast),
            other => Err(PipelineError::InvalidSettings(format!(
                "unknown join policy: {}",
                other
            ))),
        }
    }
}

/// Sizes, bounds, and paths used by one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Records requested per data source page
    pub page_size: usize,
    /// Records per chunk handed to one completion call
    pub chunk_size: usize,
    /// Records actually embedded in one prompt
    pub max_entries_per_prompt: usize,
    /// Non-empty pages allowed before the fetch gives up
    pub max_pages: usize,
    /// Concurrent completion calls; `None` means one per chunk
    pub max_concurrency: Option<usize>,
    pub join_policy: JoinPolicy,
    /// Cleaned answers at or below this length carry no signal
    pub min_answer_chars: usize,
    pub completion_max_tokens: u32,
    pub snapshot_path: PathBuf,
    /// Snapshots older than this are refetched; `None` keeps them forever
    pub snapshot_max_age: Option<Duration>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            page_size: 1000,
            chunk_size: 1000,
            max_entries_per_prompt: 50,
            max_pages: 1000,
            max_concurrency: None,
            join_policy: JoinPolicy::SettleAll,
            min_answer_chars: 20,
            completion_max_tokens: 1000,
            snapshot_path: PathBuf::from("/tmp/knowledgeBase.json"),
            snapshot_max_age: None,
        }
    }
}

impl PipelineSettings {
    /// Load settings from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let settings = Self {
            page_size: parse_or(&var, "KB_PAGE_SIZE", defaults.page_size)?,
            chunk_size: parse_or(&var, "KB_CHUNK_SIZE", defaults.chunk_size)?,
            max_entries_per_prompt: parse_or(
                &var,
                "KB_MAX_ENTRIES_PER_PROMPT",
                defaults.max_entries_per_prompt,
            )?,
            max_pages: parse_or(&var, "KB_MAX_PAGES", defaults.max_pages)?,
            max_concurrency: parse_opt(&var, "KB_MAX_CONCURRENCY")?,
            join_policy: match var("KB_JOIN_POLICY") {
                Some(raw) => raw.parse()?,
                None => defaults.join_policy,
            },
            min_answer_chars: parse_or(&var, "KB_MIN_ANSWER_CHARS", defaults.min_answer_chars)?,
            completion_max_tokens: parse_or(
                &var,
                "COMPLETION_MAX_TOKENS",
                defaults.completion_max_tokens,
            )?,
            snapshot_path: var("SNAPSHOT_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.snapshot_path),
            snapshot_max_age: parse_opt::<u64, _>(&var, "SNAPSHOT_MAX_AGE_SECS")?
                .map(Duration::from_secs),
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Reject sizes that would make paging or chunking meaningless.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let positive = [
            ("page_size", self.page_size),
            ("chunk_size", self.chunk_size),
            ("max_entries_per_prompt", self.max_entries_per_prompt),
            ("max_pages", self.max_pages),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(PipelineError::InvalidSettings(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.max_concurrency == Some(0) {
            return Err(PipelineError::InvalidSettings(
                "max_concurrency must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T, PipelineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_opt(var, key)?.unwrap_or(default))
}

fn parse_opt<T, F>(var: &F, key: &str) -> Result<Option<T>, PipelineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| PipelineError::InvalidSettings(format!("{}: {}", key, e)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = PipelineSettings::from_lookup(|_| None).unwrap();
        assert_eq!(settings.page_size, 1000);
        assert_eq!(settings.max_entries_per_prompt, 50);
        assert_eq!(settings.join_policy, JoinPolicy::SettleAll);
        assert!(settings.max_concurrency.is_none());
        assert!(settings.snapshot_max_age.is_none());
    }

    #[test]
    fn test_overrides() {
        let settings = PipelineSettings::from_lookup(|key| match key {
            "KB_CHUNK_SIZE" => Some("250".to_string()),
            "KB_MAX_CONCURRENCY" => Some("4".to_string()),
            "KB_JOIN_POLICY" => Some("fail-fast".to_string()),
            "SNAPSHOT_MAX_AGE_SECS" => Some("3600".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(settings.chunk_size, 250);
        assert_eq!(settings.max_concurrency, Some(4));
        assert_eq!(settings.join_policy, JoinPolicy::FailFast);
        assert_eq!(settings.snapshot_max_age, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_rejects_zero_and_garbage() {
        let zero = PipelineSettings::from_lookup(|key| (key == "KB_CHUNK_SIZE").then(|| "0".to_string()));
        assert!(matches!(zero, Err(PipelineError::InvalidSettings(_))));

        let garbage = PipelineSettings::from_lookup(|key| (key == "KB_PAGE_SIZE").then(|| "lots".to_string()));
        assert!(matches!(garbage, Err(PipelineError::InvalidSettings(_))));

        let policy = PipelineSettings::from_lookup(|key| (key == "KB_JOIN_POLICY").then(|| "first".to_string()));
        assert!(matches!(policy, Err(PipelineError::InvalidSettings(_))));
    }
}
