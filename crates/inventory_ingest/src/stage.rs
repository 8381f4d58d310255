use std::path::{Path, PathBuf};

use inventory_events::{Batch, EncodeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to create stage directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write staged batch {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Writes each batch body to `<dir>/batch-00001.ndjson` before it is delivered.
#[derive(Debug, Clone)]
pub struct BatchStager {
    dir: PathBuf,
}

impl BatchStager {
    pub async fn create(dir: impl Into<PathBuf>) -> Result<Self, StageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StageError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, batch: &Batch) -> PathBuf {
        self.dir.join(format!("batch-{:05}.ndjson", batch.id().get()))
    }

    pub async fn stage(&self, batch: &Batch) -> Result<PathBuf, StageError> {
        let path = self.path_for(batch);
        let body = batch.to_ndjson()?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| StageError::Write {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}
