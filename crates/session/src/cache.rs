use std::collections::BTreeMap;

use state_store::MetricStore;
use tracing::{debug, warn};
use types::{Metric, MetricValue};

/// Last known value per metric. Absent entries are unknown, which is
/// distinct from any value and so always compares as changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateCache {
    values: BTreeMap<Metric, MetricValue>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` and returns true only when it differs from the cached
    /// value. Callers persist exactly the updates for which this returns true.
    pub fn apply_if_changed(&mut self, metric: Metric, value: MetricValue) -> bool {
        if self.values.get(&metric) == Some(&value) {
            return false;
        }
        self.values.insert(metric, value);
        true
    }

    /// Replaces the cache content with whatever `store` holds. Missing or
    /// unreadable records leave the metric unknown.
    pub async fn restore<S: MetricStore>(&mut self, store: &S) -> usize {
        self.values.clear();
        for metric in Metric::ALL {
            match store.read(metric).await {
                Ok(Some(raw)) => {
                    let value = MetricValue::parse_persisted(&raw);
                    debug!(%metric, ?value, "restored");
                    self.values.insert(metric, value);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(%metric, error = %err, "metric restore failed");
                }
            }
        }
        self.values.len()
    }

    pub fn get(&self, metric: Metric) -> Option<&MetricValue> {
        self.values.get(&metric)
    }

    /// Observed load state; only a boolean value counts as known.
    pub fn load_on(&self) -> Option<bool> {
        self.get(Metric::LoadOn).and_then(MetricValue::as_flag)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
