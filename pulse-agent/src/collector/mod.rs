//! Tick-driven metric sampling.
//!
//! Two sampler loops (process runtime and host stats) refresh the shared
//! system probe and collect their metric sets on every poll tick. The
//! producer loop flushes every metric's current value into a bounded
//! channel on every report tick, resetting counters after emission.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use pulse_core::{MetricEnvelope, MetricKind};

pub mod metrics;

pub use metrics::{Sample, SampledMetric};

pub struct MetricCollector {
    runtime: Vec<SampledMetric>,
    host: Vec<SampledMetric>,
    probe: Mutex<System>,
    pid: Option<Pid>,
    poll_interval: Duration,
    report_interval: Duration,
}

impl MetricCollector {
    pub fn new(poll_interval: Duration, report_interval: Duration) -> Self {
        let pid = sysinfo::get_current_pid().ok();

        Self {
            runtime: metrics::runtime_metrics(pid),
            host: metrics::host_metrics(),
            probe: Mutex::new(System::new()),
            pid,
            poll_interval,
            report_interval,
        }
    }

    /// Total number of distinct metrics; sizes the flush channel.
    pub fn metric_count(&self) -> usize {
        self.runtime.len() + self.host.len()
    }

    /// Create the bounded flush channel.
    pub fn channel(&self) -> (mpsc::Sender<MetricEnvelope>, mpsc::Receiver<MetricEnvelope>) {
        mpsc::channel(self.metric_count())
    }

    /// Sample the process runtime metrics on every poll tick.
    pub async fn run_runtime_sampler(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting runtime metrics sampler");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Stopping runtime metrics sampler");
                    return;
                }

                _ = ticker.tick() => {
                    // One probe refresh per tick; the samplers read from it.
                    let mut system = self.probe.lock().unwrap_or_else(PoisonError::into_inner);
                    if let Some(pid) = self.pid {
                        system.refresh_process(pid);
                    }

                    for metric in &self.runtime {
                        metric.sample(&system);
                    }
                }
            }
        }
    }

    /// Sample the host memory and CPU metrics on every poll tick.
    pub async fn run_host_sampler(&self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting host metrics sampler");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Stopping host metrics sampler");
                    return;
                }

                _ = ticker.tick() => {
                    let mut system = self.probe.lock().unwrap_or_else(PoisonError::into_inner);
                    system.refresh_memory();
                    system.refresh_cpu_usage();

                    for metric in &self.host {
                        metric.sample(&system);
                    }
                }
            }
        }
    }

    /// Flush every metric into the channel on each report tick. On
    /// shutdown, flush once more and return; dropping the sender closes
    /// the channel for the consumer.
    pub async fn run_producer(
        &self,
        tx: mpsc::Sender<MetricEnvelope>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Starting metrics producer");

        let mut ticker = tokio::time::interval(self.report_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Stopping metrics producer");
                    self.flush(&tx).await;
                    return;
                }

                _ = ticker.tick() => {
                    self.flush(&tx).await;
                }
            }
        }
    }

    async fn flush(&self, tx: &mpsc::Sender<MetricEnvelope>) {
        for metric in self.runtime.iter().chain(self.host.iter()) {
            debug!(name = metric.name(), kind = %metric.kind(), "Producing metric");

            if tx.send(metric.to_envelope()).await.is_err() {
                // Consumer is gone; nothing left to flush to.
                return;
            }

            if metric.kind() == MetricKind::Counter {
                metric.reset();
            }
        }
    }
}
