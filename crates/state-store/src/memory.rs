use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use types::Metric;

use crate::{MetricStore, StoreError};

/// Process-local store; state is lost on exit. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetricStore {
    values: Arc<Mutex<HashMap<Metric, String>>>,
}

impl MemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = (Metric, S)>,
        S: Into<String>,
    {
        let map = values
            .into_iter()
            .map(|(metric, value)| (metric, value.into()))
            .collect();
        Self {
            values: Arc::new(Mutex::new(map)),
        }
    }

    pub fn get(&self, metric: Metric) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&metric)
            .cloned()
    }
}

impl MetricStore for MemoryMetricStore {
    async fn read(&self, metric: Metric) -> Result<Option<String>, StoreError> {
        Ok(self.get(metric))
    }

    async fn write(&self, metric: Metric, value: &str) -> Result<(), StoreError> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(metric, value.to_string());
        Ok(())
    }
}
