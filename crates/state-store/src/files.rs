use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::fs;
use tracing::debug;
use types::Metric;

use crate::{MetricStore, StoreError};

/// One plain-text file per metric, named after the metric, in `dir`.
#[derive(Debug, Clone)]
pub struct FileMetricStore {
    dir: PathBuf,
}

impl FileMetricStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, metric: Metric) -> PathBuf {
        self.dir.join(metric.name())
    }
}

impl MetricStore for FileMetricStore {
    async fn read(&self, metric: Metric) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(metric)).await {
            Ok(content) => Ok(Some(content.trim_end_matches('\n').to_string())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn write(&self, metric: Metric, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(metric);
        fs::write(&path, value).await?;
        debug!(path = %path.display(), value, "metric persisted");
        Ok(())
    }
}
