//! Corpus records and the raw rows they are parsed from.

use serde::{Deserialize, Serialize};

use crate::error::MalformedRecord;

/// One tagged project, as it enters the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusRecord {
    pub id: String,
    pub project_tags: Vec<String>,
}

/// Records ordered by id ascending.
pub type Corpus = Vec<CorpusRecord>;

/// A row as returned by the data source, before its tag payload is parsed.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: String,
    /// Serialized JSON array of tag strings
    pub project_tags: Option<String>,
}

impl ProjectRow {
    pub fn new(id: impl Into<String>, project_tags: Option<&str>) -> Self {
        Self {
            id: id.into(),
            project_tags: project_tags.map(str::to_string),
        }
    }
}

impl TryFrom<ProjectRow> for CorpusRecord {
    type Error = MalformedRecord;

    fn try_from(row: ProjectRow) -> Result<Self, Self::Error> {
        let malformed = |reason: String| MalformedRecord {
            id: row.id.clone(),
            reason,
        };

        let payload = row
            .project_tags
            .as_deref()
            .ok_or_else(|| malformed("missing tags".to_string()))?;

        let tags: Vec<String> = serde_json::from_str(payload)
            .map_err(|e| malformed(format!("unparseable tags: {}", e)))?;

        let tags: Vec<String> = tags
            .into_iter()
            .map(|tag| tag.trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect();

        if tags.is_empty() {
            return Err(malformed("empty tag list".to_string()));
        }

        Ok(CorpusRecord {
            id: row.id,
            project_tags: tags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tag_array() {
        let row = ProjectRow::new("p-1", Some(r#"["roof repair", " Austin TX ", ""]"#));
        let record = CorpusRecord::try_from(row).unwrap();
        assert_eq!(record.id, "p-1");
        assert_eq!(record.project_tags, vec!["roof repair", "Austin TX"]);
    }

    #[test]
    fn test_rejects_bad_payloads() {
        for payload in [None, Some("not json"), Some("[]"), Some(r#"{"tags":["a"]}"#), Some("[1, 2]")] {
            let err = CorpusRecord::try_from(ProjectRow::new("p-2", payload)).unwrap_err();
            assert_eq!(err.id, "p-2");
        }
    }
}
