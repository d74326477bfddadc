//! Sampled metric descriptors.
//!
//! Each descriptor carries its name, kind, sampler function, and last
//! sampled value behind its own small lock. Samplers are plain function
//! values reading from the shared, already-refreshed system probe.

use std::sync::{Mutex, PoisonError};

use sysinfo::{Pid, System};

use pulse_core::{MetricEnvelope, MetricKind, MetricValue};

/// How a sampler updates the stored value: counters accumulate, gauges
/// overwrite.
pub enum Sample {
    Add(i64),
    Set(f64),
}

type SamplerFn = Box<dyn Fn(&System) -> Sample + Send + Sync>;

/// A single collected metric.
pub struct SampledMetric {
    name: &'static str,
    kind: MetricKind,
    value: Mutex<MetricValue>,
    sampler: SamplerFn,
}

impl SampledMetric {
    pub fn counter(
        name: &'static str,
        sampler: impl Fn(&System) -> Sample + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            value: Mutex::new(MetricValue::Counter(0)),
            sampler: Box::new(sampler),
        }
    }

    pub fn gauge(
        name: &'static str,
        sampler: impl Fn(&System) -> Sample + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            value: Mutex::new(MetricValue::Gauge(0.0)),
            sampler: Box::new(sampler),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Run the sampler against the shared probe and fold the result into
    /// the stored value.
    pub fn sample(&self, system: &System) {
        let sample = (self.sampler)(system);
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);

        match (&mut *value, sample) {
            (MetricValue::Counter(total), Sample::Add(delta)) => *total += delta,
            (MetricValue::Gauge(current), Sample::Set(new)) => *current = new,
            // The constructors pair samplers with matching kinds.
            _ => {}
        }
    }

    /// Zero a counter after it has been flushed. Gauges are unaffected.
    pub fn reset(&self) {
        let mut value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        if let MetricValue::Counter(total) = &mut *value {
            *total = 0;
        }
    }

    /// Snapshot the current value as a wire envelope.
    pub fn to_envelope(&self) -> MetricEnvelope {
        let value = *self.value.lock().unwrap_or_else(PoisonError::into_inner);
        match value {
            MetricValue::Counter(delta) => MetricEnvelope::counter(self.name, delta),
            MetricValue::Gauge(value) => MetricEnvelope::gauge(self.name, value),
        }
    }
}

/// Process-level metrics read from the shared probe, plus the synthetic
/// pair: `RandomValue` (uniform in [0,1)) and `PollCount` (+1 per
/// sample).
pub fn runtime_metrics(pid: Option<Pid>) -> Vec<SampledMetric> {
    vec![
        SampledMetric::gauge("ProcessResidentMemory", move |sys| {
            Sample::Set(process_stat(sys, pid, |p| p.memory() as f64))
        }),
        SampledMetric::gauge("ProcessVirtualMemory", move |sys| {
            Sample::Set(process_stat(sys, pid, |p| p.virtual_memory() as f64))
        }),
        SampledMetric::gauge("ProcessCpuUsage", move |sys| {
            Sample::Set(process_stat(sys, pid, |p| f64::from(p.cpu_usage())))
        }),
        SampledMetric::gauge("RandomValue", |_| Sample::Set(rand::random::<f64>())),
        SampledMetric::counter("PollCount", |_| Sample::Add(1)),
    ]
}

/// Host-level memory and CPU gauges.
pub fn host_metrics() -> Vec<SampledMetric> {
    vec![
        SampledMetric::gauge("TotalMemory", |sys| Sample::Set(sys.total_memory() as f64)),
        SampledMetric::gauge("FreeMemory", |sys| Sample::Set(sys.free_memory() as f64)),
        SampledMetric::gauge("UsedMemory", |sys| Sample::Set(sys.used_memory() as f64)),
        SampledMetric::gauge("CPUutilization", |sys| {
            Sample::Set(f64::from(sys.global_cpu_info().cpu_usage()))
        }),
    ]
}

fn process_stat(
    system: &System,
    pid: Option<Pid>,
    stat: impl Fn(&sysinfo::Process) -> f64,
) -> f64 {
    pid.and_then(|pid| system.process(pid)).map(stat).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_samples_accumulate_and_reset() {
        let system = System::new();
        let metric = SampledMetric::counter("PollCount", |_| Sample::Add(1));

        metric.sample(&system);
        metric.sample(&system);
        metric.sample(&system);

        assert_eq!(metric.to_envelope(), MetricEnvelope::counter("PollCount", 3));

        metric.reset();
        assert_eq!(metric.to_envelope(), MetricEnvelope::counter("PollCount", 0));
    }

    #[test]
    fn test_gauge_samples_overwrite_and_survive_reset() {
        let system = System::new();
        let metric = SampledMetric::gauge("Fixed", |_| Sample::Set(4.2));

        metric.sample(&system);
        metric.reset();

        assert_eq!(metric.to_envelope(), MetricEnvelope::gauge("Fixed", 4.2));
    }

    #[test]
    fn test_random_value_is_in_unit_interval() {
        let system = System::new();
        let metrics = runtime_metrics(None);
        let random = metrics.iter().find(|m| m.name() == "RandomValue").unwrap();

        for _ in 0..100 {
            random.sample(&system);
            let envelope = random.to_envelope();
            let value = envelope.value.unwrap();
            assert!((0.0..1.0).contains(&value));
        }
    }

    #[test]
    fn test_registries_have_expected_kinds() {
        let runtime = runtime_metrics(None);
        let host = host_metrics();

        let poll_count = runtime.iter().find(|m| m.name() == "PollCount").unwrap();
        assert_eq!(poll_count.kind(), MetricKind::Counter);

        for metric in runtime.iter().filter(|m| m.name() != "PollCount").chain(host.iter()) {
            assert_eq!(metric.kind(), MetricKind::Gauge);
        }
    }
}
