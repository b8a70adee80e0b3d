//! Single-file local snapshot of the fetched corpus.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{info, warn};
use uuid::Uuid;

use crate::corpus::{Corpus, CorpusRecord};
use crate::error::SnapshotError;

/// Whole-corpus JSON snapshot in the Lambda scratch space.
///
/// There is no versioning: the last successful [`save`](Self::save) wins.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    path: PathBuf,
    max_age: Option<Duration>,
}

impl SnapshotCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_age: None,
        }
    }

    /// Treat snapshots older than `max_age` as absent.
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored corpus, or `None` when there is no usable snapshot.
    pub async fn load(&self) -> Option<Corpus> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot stat knowledge base snapshot");
                return None;
            }
        };

        if let (Some(max_age), Ok(modified)) = (self.max_age, metadata.modified()) {
            let age = SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default();
            if age > max_age {
                info!(
                    path = %self.path.display(),
                    age_secs = age.as_secs(),
                    "Knowledge base snapshot expired"
                );
                return None;
            }
        }

        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot read knowledge base snapshot");
                return None;
            }
        };

        match serde_json::from_slice::<Corpus>(&data) {
            Ok(corpus) => {
                info!(path = %self.path.display(), records = corpus.len(), "Loaded knowledge base snapshot");
                Some(corpus)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Discarding unreadable knowledge base snapshot");
                None
            }
        }
    }

    /// Overwrite the snapshot with `corpus`.
    ///
    /// The data is written to a sibling temp file and renamed into place, so a
    /// concurrent `load` sees either the old or the new snapshot.
    pub async fn save(&self, corpus: &[CorpusRecord]) -> Result<(), SnapshotError> {
        let data = serde_json::to_vec_pretty(corpus)?;

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string());
        let temp_path = self
            .path
            .with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        tokio::fs::write(&temp_path, &data).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        info!(path = %self.path.display(), records = corpus.len(), "Knowledge base snapshot saved");
        Ok(())
    }
}
