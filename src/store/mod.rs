pub mod file;

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::{PerformanceDataPoint, Subject};

pub use file::FileDatasetSource;

/// Where performance data comes from. The insight pipeline treats the
/// result as already validated and only checks it for emptiness.
/// Implementations: `FileDatasetSource` (JSON files on disk).
#[async_trait]
pub trait DatasetSource: Send + Sync {
    /// Load the time series for `subject`.
    /// Unknown subjects map to `AppError::DatasetNotFound`.
    async fn fetch_subject_data(&self, subject: &Subject) -> Result<Vec<PerformanceDataPoint>, AppError>;
}
