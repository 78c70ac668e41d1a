use thiserror::Error;
use types::Metric;

mod files;
mod intent;
mod memory;
mod sqlite;

pub use files::FileMetricStore;
pub use intent::{FileLoadIntent, IntentSignal, LoadIntentSource};
pub use memory::MemoryMetricStore;
pub use sqlite::SqliteMetricStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Latest textual value per metric, one record per metric name.
#[allow(async_fn_in_trait)]
pub trait MetricStore {
    /// `Ok(None)` when nothing has been stored for `metric` yet.
    async fn read(&self, metric: Metric) -> Result<Option<String>, StoreError>;

    async fn write(&self, metric: Metric, value: &str) -> Result<(), StoreError>;
}

/// Backend picked at runtime from configuration.
#[derive(Debug, Clone)]
pub enum AnyMetricStore {
    Files(FileMetricStore),
    Sqlite(SqliteMetricStore),
    Memory(MemoryMetricStore),
}

impl MetricStore for AnyMetricStore {
    async fn read(&self, metric: Metric) -> Result<Option<String>, StoreError> {
        match self {
            AnyMetricStore::Files(store) => store.read(metric).await,
            AnyMetricStore::Sqlite(store) => store.read(metric).await,
            AnyMetricStore::Memory(store) => store.read(metric).await,
        }
    }

    async fn write(&self, metric: Metric, value: &str) -> Result<(), StoreError> {
        match self {
            AnyMetricStore::Files(store) => store.write(metric, value).await,
            AnyMetricStore::Sqlite(store) => store.write(metric, value).await,
            AnyMetricStore::Memory(store) => store.write(metric, value).await,
        }
    }
}
