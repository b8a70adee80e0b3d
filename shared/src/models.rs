//! Shared request models.

use serde::Deserialize;
use validator::Validate;

/// Longest question accepted from API callers.
pub const MAX_QUESTION_CHARS: usize = 2000;

/// Conversation request, built from the `userquery` query string parameter.
#[derive(Debug, Deserialize, Validate)]
pub struct ConversationQuery {
    #[validate(length(min = 1, max = 2000))]
    pub userquery: String,
}

impl ConversationQuery {
    /// Build a query from a raw parameter value, trimming surrounding whitespace.
    pub fn new(raw: &str) -> Self {
        Self {
            userquery: raw.trim().to_string(),
        }
    }
}
