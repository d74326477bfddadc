//! Postgres-backed metric store.
//!
//! Counters and gauges live in two upsert-driven tables. Batch writes run
//! in a single transaction; every operation is wrapped in a bounded retry
//! loop that only retries transient connection faults.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::{PulseError, Result};
use crate::metric::{self, Metric, MetricEnvelope, MetricKind, MetricValue, StoreSnapshot};

use super::{migrations, Storage};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_WAIT_INTERVAL_SECS: u64 = 2;

const UPSERT_COUNTER: &str = r#"
    INSERT INTO metric_counters (name, value)
    VALUES ($1, $2)
    ON CONFLICT (name)
    DO UPDATE SET value = metric_counters.value + EXCLUDED.value
"#;

const UPSERT_GAUGE: &str = r#"
    INSERT INTO metric_gauges (name, value)
    VALUES ($1, $2)
    ON CONFLICT (name)
    DO UPDATE SET value = EXCLUDED.value
"#;

pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Open a connection pool against `dsn`.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .idle_timeout(Duration::from_secs(180))
            .max_lifetime(Duration::from_secs(3600))
            .connect(dsn)
            .await
            .map_err(|e| PulseError::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Run the idempotent schema migration.
    pub async fn bootstrap(&self) -> Result<()> {
        migrations::run(&self.pool).await
    }

    /// Retry `op` on transient faults: up to 3 attempts with 1 s and 3 s
    /// pauses in between. Any other failure propagates immediately.
    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: Future<Output = std::result::Result<T, sqlx::Error>>,
    {
        let mut last_error = None;

        for attempt in 0..RETRY_ATTEMPTS {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if is_retryable(&error) => {
                    if attempt + 1 < RETRY_ATTEMPTS {
                        let wait = Duration::from_secs(
                            u64::from(attempt) * RETRY_WAIT_INTERVAL_SECS + 1,
                        );
                        tokio::time::sleep(wait).await;
                    }
                    last_error = Some(error);
                }
                Err(error) => return Err(PulseError::Database(error.to_string())),
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(PulseError::Unavailable(format!("retry attempts exceeded: {reason}")))
    }

    /// Fail with `KindMismatch` when `id` already exists under the other
    /// kind's table.
    async fn check_kind(&self, other_table_probe: &'static str, id: &str) -> Result<()> {
        let pool = &self.pool;

        let taken: bool = self
            .with_retry(move || async move {
                sqlx::query_scalar(other_table_probe).bind(id).fetch_one(pool).await
            })
            .await?;

        if taken {
            return Err(PulseError::KindMismatch { id: id.to_string() });
        }

        Ok(())
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn get_all(&self) -> Result<HashMap<String, Metric>> {
        let pool = &self.pool;

        self.with_retry(move || async move {
            let mut data = HashMap::new();

            let counters: Vec<(String, i64)> =
                sqlx::query_as("SELECT name, value FROM metric_counters")
                    .fetch_all(pool)
                    .await?;

            for (name, value) in counters {
                data.insert(name.clone(), Metric::new(name, MetricValue::Counter(value)));
            }

            let gauges: Vec<(String, f64)> =
                sqlx::query_as("SELECT name, value FROM metric_gauges").fetch_all(pool).await?;

            for (name, value) in gauges {
                data.insert(name.clone(), Metric::new(name, MetricValue::Gauge(value)));
            }

            Ok(data)
        })
        .await
    }

    async fn get_counter(&self, id: &str) -> Result<i64> {
        let pool = &self.pool;

        let value: Option<i64> = self
            .with_retry(move || async move {
                sqlx::query_scalar("SELECT value FROM metric_counters WHERE name = $1")
                    .bind(id)
                    .fetch_optional(pool)
                    .await
            })
            .await?;

        value.ok_or_else(|| PulseError::MetricNotFound { id: id.to_string() })
    }

    async fn set_counter(&self, id: &str, delta: i64) -> Result<()> {
        self.check_kind("SELECT EXISTS (SELECT 1 FROM metric_gauges WHERE name = $1)", id).await?;

        let pool = &self.pool;

        self.with_retry(move || async move {
            sqlx::query(UPSERT_COUNTER).bind(id).bind(delta).execute(pool).await?;
            Ok(())
        })
        .await
    }

    async fn get_gauge(&self, id: &str) -> Result<f64> {
        let pool = &self.pool;

        let value: Option<f64> = self
            .with_retry(move || async move {
                sqlx::query_scalar("SELECT value FROM metric_gauges WHERE name = $1")
                    .bind(id)
                    .fetch_optional(pool)
                    .await
            })
            .await?;

        value.ok_or_else(|| PulseError::MetricNotFound { id: id.to_string() })
    }

    async fn set_gauge(&self, id: &str, value: f64) -> Result<()> {
        self.check_kind("SELECT EXISTS (SELECT 1 FROM metric_counters WHERE name = $1)", id)
            .await?;

        let pool = &self.pool;

        self.with_retry(move || async move {
            sqlx::query(UPSERT_GAUGE).bind(id).bind(value).execute(pool).await?;
            Ok(())
        })
        .await
    }

    async fn set_batch(&self, envelopes: &[MetricEnvelope]) -> Result<()> {
        for envelope in envelopes {
            envelope.validate_update()?;
        }

        // An id carried under both kinds inside one batch can never be
        // applied without splitting it across both tables.
        if let Some(id) = metric::find_kind_conflict(envelopes) {
            return Err(PulseError::KindMismatch { id: id.to_string() });
        }

        let counter_ids: Vec<String> = envelopes
            .iter()
            .filter(|e| e.kind == MetricKind::Counter)
            .map(|e| e.id.clone())
            .collect();

        let gauge_ids: Vec<String> = envelopes
            .iter()
            .filter(|e| e.kind == MetricKind::Gauge)
            .map(|e| e.id.clone())
            .collect();

        let counter_ids = &counter_ids;
        let gauge_ids = &gauge_ids;
        let pool = &self.pool;

        // Conflict probes and upserts share one transaction; a conflict
        // returns before commit, rolling everything back.
        let conflict: Option<String> = self
            .with_retry(move || async move {
                let mut tx = pool.begin().await?;

                if !counter_ids.is_empty() {
                    let taken: Option<String> = sqlx::query_scalar(
                        "SELECT name FROM metric_gauges WHERE name = ANY($1) LIMIT 1",
                    )
                    .bind(counter_ids)
                    .fetch_optional(&mut *tx)
                    .await?;

                    if taken.is_some() {
                        return Ok(taken);
                    }
                }

                if !gauge_ids.is_empty() {
                    let taken: Option<String> = sqlx::query_scalar(
                        "SELECT name FROM metric_counters WHERE name = ANY($1) LIMIT 1",
                    )
                    .bind(gauge_ids)
                    .fetch_optional(&mut *tx)
                    .await?;

                    if taken.is_some() {
                        return Ok(taken);
                    }
                }

                for envelope in envelopes {
                    match envelope.kind {
                        MetricKind::Counter => {
                            sqlx::query(UPSERT_COUNTER)
                                .bind(&envelope.id)
                                .bind(envelope.delta.unwrap_or_default())
                                .execute(&mut *tx)
                                .await?;
                        }
                        MetricKind::Gauge => {
                            sqlx::query(UPSERT_GAUGE)
                                .bind(&envelope.id)
                                .bind(envelope.value.unwrap_or_default())
                                .execute(&mut *tx)
                                .await?;
                        }
                    }
                }

                tx.commit().await?;

                Ok(None)
            })
            .await?;

        if let Some(id) = conflict {
            return Err(PulseError::KindMismatch { id });
        }

        Ok(())
    }

    // The relational backend is durable on its own; snapshot restore only
    // applies to the in-memory store.
    async fn load(&self, _snapshot: StoreSnapshot) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let pool = &self.pool;

        self.with_retry(move || async move {
            sqlx::query("SELECT 1").execute(pool).await?;
            Ok(())
        })
        .await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Whether an error is worth retrying: connection-level I/O faults, pool
/// exhaustion, and server errors in the connection-exception SQLSTATE
/// class.
fn is_retryable(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        sqlx::Error::Database(db) => {
            db.code().map(|code| is_connection_exception(&code)).unwrap_or(false)
        }
        _ => false,
    }
}

/// SQLSTATE class 08 covers connection exceptions (connection failure,
/// unable to connect, protocol violation).
fn is_connection_exception(code: &str) -> bool {
    code.starts_with("08")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_exception_class() {
        assert!(is_connection_exception("08000"));
        assert!(is_connection_exception("08006"));
        assert!(is_connection_exception("08P01"));
        assert!(!is_connection_exception("23505"));
        assert!(!is_connection_exception("42601"));
    }

    #[test]
    fn test_io_errors_are_retryable() {
        let refused =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        assert!(is_retryable(&sqlx::Error::Io(refused)));
        assert!(is_retryable(&sqlx::Error::PoolTimedOut));
        assert!(!is_retryable(&sqlx::Error::RowNotFound));
    }
}
