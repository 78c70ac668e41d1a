use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::info;
use types::Metric;

use crate::{MetricStore, StoreError};

/// Latest metric values in a single SQLite table keyed by metric name.
#[derive(Debug, Clone)]
pub struct SqliteMetricStore {
    pool: SqlitePool,
}

impl SqliteMetricStore {
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = sqlite_url(path)
            .parse::<SqliteConnectOptions>()?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA journal_mode = WAL;")
            .execute(&pool)
            .await?;
        sqlx::query("PRAGMA synchronous = NORMAL;")
            .execute(&pool)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS metric_state (\
                name TEXT PRIMARY KEY,\
                value TEXT NOT NULL,\
                updated_at INTEGER NOT NULL\
            )",
        )
        .execute(&pool)
        .await?;

        info!(path = %path, "metric store initialized");

        Ok(Self { pool })
    }

    pub async fn updated_at(&self, metric: Metric) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT updated_at FROM metric_state WHERE name = ?")
            .bind(metric.name())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get::<i64, _>("updated_at")))
    }
}

impl MetricStore for SqliteMetricStore {
    async fn read(&self, metric: Metric) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM metric_state WHERE name = ?")
            .bind(metric.name())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get::<String, _>("value")))
    }

    async fn write(&self, metric: Metric, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO metric_state (name, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(metric.name())
        .bind(value)
        .bind(unix_ms())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn sqlite_url(path: &str) -> String {
    if path.starts_with("sqlite:") {
        path.to_string()
    } else {
        format!("sqlite://{path}")
    }
}

fn unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
