//! Paginated corpus fetch from the project table.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::corpus::{Corpus, CorpusRecord, ProjectRow};
use crate::error::PipelineError;

/// A paginated, id-ordered source of tagged project rows.
///
/// `fetch_page` returns at most `page_size` rows with a non-null tag payload
/// and an id strictly greater than `cursor`, sorted by id ascending.
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn fetch_page(&self, cursor: Option<&str>, page_size: i64) -> shared::Result<Vec<ProjectRow>>;
}

/// Reads the `project` table of the hosted Postgres database.
pub struct PgProjectSource {
    pool: PgPool,
}

impl PgProjectSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectSource for PgProjectSource {
    async fn fetch_page(&self, cursor: Option<&str>, page_size: i64) -> shared::Result<Vec<ProjectRow>> {
        // Ordering and the cursor comparison must use the same expression.
        let rows: Vec<ProjectRow> = sqlx::query_as(
            r#"
            SELECT id::text AS id, project_tags::text AS project_tags
            FROM project
            WHERE project_tags IS NOT NULL
            AND ($1::text IS NULL OR id::text > $1::text)
            ORDER BY id::text ASC
            LIMIT $2
            "#,
        )
        .bind(cursor)
        .bind(page_size)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Page through the source until it returns an empty page.
///
/// Rows with unusable tag payloads are skipped. The cursor always advances to
/// the last raw row of a page, skipped or not.
pub async fn fetch_corpus(
    source: &dyn ProjectSource,
    page_size: usize,
    max_pages: usize,
) -> Result<Corpus, PipelineError> {
    let limit = i64::try_from(page_size)
        .map_err(|_| PipelineError::InvalidSettings(format!("page size {} too large", page_size)))?;

    let mut corpus: Corpus = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;
    let mut skipped = 0usize;

    loop {
        let rows = source
            .fetch_page(cursor.as_deref(), limit)
            .await
            .map_err(|e| PipelineError::SourceUnavailable(e.to_string()))?;

        let Some(last) = rows.last() else {
            info!(pages, records = corpus.len(), skipped, "Corpus fetch complete");
            return Ok(corpus);
        };

        pages += 1;
        if pages > max_pages {
            return Err(PipelineError::CorpusTooLarge {
                max_pages,
                records: corpus.len(),
            });
        }

        cursor = Some(last.id.clone());
        debug!(page = pages, rows = rows.len(), cursor = ?cursor, "Fetched corpus page");

        for row in rows {
            match CorpusRecord::try_from(row) {
                Ok(record) => corpus.push(record),
                Err(e) => {
                    warn!(id = %e.id, reason = %e.reason, "Skipping malformed record");
                    skipped += 1;
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory source honouring the cursor and ordering contract.
    pub(crate) struct MemorySource {
        rows: Vec<ProjectRow>,
        pub calls: AtomicUsize,
    }

    impl MemorySource {
        pub(crate) fn new(mut rows: Vec<ProjectRow>) -> Self {
            rows.sort_by(|a, b| a.id.cmp(&b.id));
            Self {
                rows,
                calls: AtomicUsize::new(0),
            }
        }

        pub(crate) fn tagged(count: usize) -> Self {
            Self::new(
                (0..count)
                    .map(|i| ProjectRow::new(format!("p-{:05}", i), Some(r#"["roofing","austin"]"#)))
                    .collect(),
            )
        }
    }

    #[async_trait]
    impl ProjectSource for MemorySource {
        async fn fetch_page(&self, cursor: Option<&str>, page_size: i64) -> shared::Result<Vec<ProjectRow>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .rows
                .iter()
                .filter(|row| row.project_tags.is_some())
                .filter(|row| cursor.map_or(true, |c| row.id.as_str() > c))
                .take(page_size as usize)
                .cloned()
                .collect())
        }
    }

    /// Never reaches an empty page.
    struct EndlessSource;

    #[async_trait]
    impl ProjectSource for EndlessSource {
        async fn fetch_page(&self, _cursor: Option<&str>, _page_size: i64) -> shared::Result<Vec<ProjectRow>> {
            Ok(vec![ProjectRow::new("loop", Some(r#"["stuck"]"#))])
        }
    }

    struct DownSource;

    #[async_trait]
    impl ProjectSource for DownSource {
        async fn fetch_page(&self, _cursor: Option<&str>, _page_size: i64) -> shared::Result<Vec<ProjectRow>> {
            Err(shared::Error::Http("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_pagination_covers_every_record_once() {
        for (total, page_size) in [(0usize, 3usize), (1, 3), (9, 3), (10, 3), (7, 10), (25, 1)] {
            let source = MemorySource::tagged(total);
            let corpus = fetch_corpus(&source, page_size, 1000).await.unwrap();

            let expected: Vec<String> = (0..total).map(|i| format!("p-{:05}", i)).collect();
            let ids: Vec<String> = corpus.iter().map(|r| r.id.clone()).collect();
            assert_eq!(ids, expected);

            // ceil(N/P) non-empty pages plus the terminating empty page.
            let pages = (total + page_size - 1) / page_size;
            assert_eq!(source.calls.load(Ordering::SeqCst), pages + 1);
        }
    }

    #[tokio::test]
    async fn test_malformed_record_is_skipped() {
        let source = MemorySource::new(vec![
            ProjectRow::new("a", Some("{not a list")),
            ProjectRow::new("b", Some(r#"["kitchen remodel","2024-03"]"#)),
            ProjectRow::new("c", None),
        ]);

        let corpus = fetch_corpus(&source, 10, 10).await.unwrap();
        assert_eq!(
            corpus,
            vec![CorpusRecord {
                id: "b".to_string(),
                project_tags: vec!["kitchen remodel".to_string(), "2024-03".to_string()],
            }]
        );
    }

    #[tokio::test]
    async fn test_cursor_advances_past_malformed_last_row() {
        let source = MemorySource::new(vec![
            ProjectRow::new("a", Some(r#"["deck"]"#)),
            ProjectRow::new("b", Some("garbage")),
            ProjectRow::new("c", Some(r#"["pool"]"#)),
        ]);

        let corpus = fetch_corpus(&source, 2, 10).await.unwrap();
        let ids: Vec<&str> = corpus.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_page_bound_stops_runaway_source() {
        let err = fetch_corpus(&EndlessSource, 10, 5).await.unwrap_err();
        assert!(matches!(err, PipelineError::CorpusTooLarge { max_pages: 5, records: 5 }));
    }

    #[tokio::test]
    async fn test_source_failure_is_surfaced() {
        let err = fetch_corpus(&DownSource, 10, 5).await.unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnavailable(_)));
    }
}
