//! In-memory metric store.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{PulseError, Result};
use crate::metric::{Metric, MetricEnvelope, MetricValue, StoreSnapshot};

use super::Storage;

/// Concurrent map store with counter/gauge semantics.
///
/// A single reader-writer lock guards the map; reads take the shared
/// lock, writes the exclusive one. Critical sections are O(1) except
/// [`Storage::get_all`], which copies the map so callers can iterate
/// outside the lock.
#[derive(Default)]
pub struct MemoryStorage {
    metrics: RwLock<HashMap<String, Metric>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_poisoned() -> PulseError {
        PulseError::Internal("metrics lock poisoned".to_string())
    }

    /// Apply one update to the map. Kind-mismatching writes fail without
    /// touching the entry.
    fn apply(metrics: &mut HashMap<String, Metric>, id: &str, value: MetricValue) -> Result<()> {
        match metrics.get_mut(id) {
            Some(metric) => match (&mut metric.value, value) {
                (MetricValue::Counter(total), MetricValue::Counter(delta)) => {
                    *total += delta;
                    Ok(())
                }
                (MetricValue::Gauge(current), MetricValue::Gauge(new)) => {
                    *current = new;
                    Ok(())
                }
                _ => Err(PulseError::KindMismatch { id: id.to_string() }),
            },
            None => {
                metrics.insert(id.to_string(), Metric::new(id, value));
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get_all(&self) -> Result<HashMap<String, Metric>> {
        let metrics = self.metrics.read().map_err(|_| Self::lock_poisoned())?;
        Ok(metrics.clone())
    }

    async fn get_counter(&self, id: &str) -> Result<i64> {
        let metrics = self.metrics.read().map_err(|_| Self::lock_poisoned())?;
        match metrics.get(id) {
            Some(Metric { value: MetricValue::Counter(v), .. }) => Ok(*v),
            Some(_) => Err(PulseError::KindMismatch { id: id.to_string() }),
            None => Err(PulseError::MetricNotFound { id: id.to_string() }),
        }
    }

    async fn set_counter(&self, id: &str, delta: i64) -> Result<()> {
        let mut metrics = self.metrics.write().map_err(|_| Self::lock_poisoned())?;
        Self::apply(&mut metrics, id, MetricValue::Counter(delta))
    }

    async fn get_gauge(&self, id: &str) -> Result<f64> {
        let metrics = self.metrics.read().map_err(|_| Self::lock_poisoned())?;
        match metrics.get(id) {
            Some(Metric { value: MetricValue::Gauge(v), .. }) => Ok(*v),
            Some(_) => Err(PulseError::KindMismatch { id: id.to_string() }),
            None => Err(PulseError::MetricNotFound { id: id.to_string() }),
        }
    }

    async fn set_gauge(&self, id: &str, value: f64) -> Result<()> {
        let mut metrics = self.metrics.write().map_err(|_| Self::lock_poisoned())?;
        Self::apply(&mut metrics, id, MetricValue::Gauge(value))
    }

    async fn set_batch(&self, envelopes: &[MetricEnvelope]) -> Result<()> {
        // One critical section for the whole batch; entries that fail are
        // skipped, not rolled back.
        let mut metrics = self.metrics.write().map_err(|_| Self::lock_poisoned())?;

        for envelope in envelopes {
            let value = match envelope.to_value() {
                Ok(value) => value,
                Err(error) => {
                    warn!(id = %envelope.id, %error, "skipping invalid batch entry");
                    continue;
                }
            };

            if let Err(error) = Self::apply(&mut metrics, &envelope.id, value) {
                warn!(id = %envelope.id, %error, "skipping conflicting batch entry");
            }
        }

        Ok(())
    }

    async fn load(&self, snapshot: StoreSnapshot) -> Result<()> {
        let mut metrics = self.metrics.write().map_err(|_| Self::lock_poisoned())?;

        *metrics =
            snapshot.into_iter().map(|(id, value)| (id.clone(), Metric::new(id, value))).collect();

        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}
