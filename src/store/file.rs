//! JSON-file dataset source for local runs and the CLI.
//!
//! Layout: `<root>/athletes/<id>.json` and `<root>/teams/<id>.json`, each a
//! JSON array of data points.

use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;

use super::DatasetSource;
use crate::errors::AppError;
use crate::models::{PerformanceDataPoint, Subject};

pub struct FileDatasetSource {
    root: PathBuf,
}

impl FileDatasetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, subject: &Subject) -> Result<PathBuf, AppError> {
        let (dir, id) = match (&subject.athlete_id, &subject.team_id) {
            (Some(a), _) if !a.is_empty() => ("athletes", a),
            (_, Some(t)) if !t.is_empty() => ("teams", t),
            _ => {
                return Err(AppError::InvalidRequest(
                    "subject needs an athleteId or a teamId".into(),
                ))
            }
        };
        if !is_safe_id(id) {
            return Err(AppError::InvalidRequest(format!("invalid subject id '{}'", id)));
        }
        Ok(self.root.join(dir).join(format!("{}.json", id)))
    }
}

/// Ids become file names; anything beyond `[A-Za-z0-9_-]` is rejected.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Read a dataset file (shared with the CLI's `generate --file`).
pub async fn read_dataset(path: &Path) -> anyhow::Result<Vec<PerformanceDataPoint>> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("invalid dataset JSON in {}", path.display()))
}

#[async_trait]
impl DatasetSource for FileDatasetSource {
    async fn fetch_subject_data(&self, subject: &Subject) -> Result<Vec<PerformanceDataPoint>, AppError> {
        let path = self.path_for(subject)?;
        let exists = tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("failed to stat {}", path.display()))?;
        if !exists {
            return Err(AppError::DatasetNotFound(subject.id()));
        }
        let dataset = read_dataset(&path).await?;
        tracing::debug!(subject = %subject.id(), points = dataset.len(), "loaded dataset from file");
        Ok(dataset)
    }
}
