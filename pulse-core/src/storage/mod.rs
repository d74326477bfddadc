//! Polymorphic metric storage.
//!
//! The [`Storage`] trait is the capability set every backend implements:
//! the in-memory store used for standalone deployments and the Postgres
//! store used when a database DSN is configured. The ingest handlers and
//! the data manager depend only on the trait object.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::metric::{Metric, MetricEnvelope, StoreSnapshot};

mod memory;
mod migrations;
mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;

/// Unified contract for all metric storage backends.
///
/// Every operation is a future; callers cancel by dropping it or
/// selecting against a shutdown signal.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Point-in-time view of every stored metric, keyed by id.
    async fn get_all(&self) -> Result<HashMap<String, Metric>>;

    /// Current counter total for `id`.
    async fn get_counter(&self, id: &str) -> Result<i64>;

    /// Add `delta` to the counter `id`, creating it at zero when absent.
    async fn set_counter(&self, id: &str, delta: i64) -> Result<()>;

    /// Current gauge value for `id`.
    async fn get_gauge(&self, id: &str) -> Result<f64>;

    /// Overwrite the gauge `id` with `value`.
    async fn set_gauge(&self, id: &str, value: f64) -> Result<()>;

    /// Apply a batch of update envelopes. Atomic on the relational
    /// backend; best-effort sequential under a single critical section on
    /// the in-memory backend.
    async fn set_batch(&self, envelopes: &[MetricEnvelope]) -> Result<()>;

    /// Replace the store content with a snapshot. A no-op on the
    /// relational backend, which is durable on its own.
    async fn load(&self, snapshot: StoreSnapshot) -> Result<()>;

    /// Probe backend liveness.
    async fn ping(&self) -> Result<()>;

    /// Release backend resources.
    async fn close(&self);
}

/// Build a storage backend from configuration: the relational backend
/// when a DSN is set (running its schema migration), the in-memory store
/// otherwise.
pub async fn new_storage(dsn: Option<&str>) -> Result<Arc<dyn Storage>> {
    match dsn {
        Some(dsn) if !dsn.is_empty() => {
            let storage = PostgresStorage::connect(dsn).await?;
            storage.bootstrap().await?;
            Ok(Arc::new(storage))
        }
        _ => Ok(Arc::new(MemoryStorage::new())),
    }
}
