use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};

/// Process-wide scheduler metrics handle.
#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    queries_submitted: CounterVec,
    queries_failed: CounterVec,
    queries_cancelled: CounterVec,
    stages_scheduled: CounterVec,
    tasks_dispatched: CounterVec,
    dispatch_failures: CounterVec,
    active_queries: GaugeVec,
    schedule_seconds: HistogramVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn inc_queries_submitted(&self) {
        self.inner
            .queries_submitted
            .with_label_values(&["batch"])
            .inc();
    }

    pub fn inc_queries_failed(&self) {
        self.inner.queries_failed.with_label_values(&["batch"]).inc();
    }

    pub fn inc_queries_cancelled(&self) {
        self.inner
            .queries_cancelled
            .with_label_values(&["batch"])
            .inc();
    }

    pub fn inc_stages_scheduled(&self) {
        self.inner
            .stages_scheduled
            .with_label_values(&["batch"])
            .inc();
    }

    pub fn inc_tasks_dispatched(&self, stage_id: u32) {
        self.inner
            .tasks_dispatched
            .with_label_values(&[&stage_id.to_string()])
            .inc();
    }

    pub fn inc_dispatch_failures(&self, stage_id: u32) {
        self.inner
            .dispatch_failures
            .with_label_values(&[&stage_id.to_string()])
            .inc();
    }

    pub fn set_active_queries(&self, n: i64) {
        self.inner
            .active_queries
            .with_label_values(&["batch"])
            .set(n as f64);
    }

    pub fn observe_schedule_seconds(&self, secs: f64) {
        self.inner
            .schedule_seconds
            .with_label_values(&["batch"])
            .observe(secs.max(0.0));
    }

    /// Render all registered metrics in Prometheus text format.
    pub fn gather_text(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&metric_families, &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let queries_submitted = CounterVec::new(
            Opts::new("wave_queries_submitted_total", "Queries submitted for scheduling"),
            &["kind"],
        )
        .expect("metric definition");
        let queries_failed = CounterVec::new(
            Opts::new("wave_queries_failed_total", "Queries failed during scheduling or dispatch"),
            &["kind"],
        )
        .expect("metric definition");
        let queries_cancelled = CounterVec::new(
            Opts::new("wave_queries_cancelled_total", "Queries cancelled before completion"),
            &["kind"],
        )
        .expect("metric definition");
        let stages_scheduled = CounterVec::new(
            Opts::new("wave_stages_scheduled_total", "Stages with resolved worker assignments"),
            &["kind"],
        )
        .expect("metric definition");
        // Stage ids restart at 0 for every query, so these labels stay
        // bounded by plan depth rather than query volume.
        let tasks_dispatched = CounterVec::new(
            Opts::new("wave_tasks_dispatched_total", "Task fragments dispatched to compute nodes"),
            &["stage_id"],
        )
        .expect("metric definition");
        let dispatch_failures = CounterVec::new(
            Opts::new("wave_dispatch_failures_total", "Task dispatch RPC failures"),
            &["stage_id"],
        )
        .expect("metric definition");
        let active_queries = GaugeVec::new(
            Opts::new("wave_active_queries", "Queries currently tracked by the query manager"),
            &["kind"],
        )
        .expect("metric definition");
        let schedule_seconds = HistogramVec::new(
            HistogramOpts::new("wave_schedule_seconds", "End-to-end schedule+dispatch latency"),
            &["kind"],
        )
        .expect("metric definition");

        registry
            .register(Box::new(queries_submitted.clone()))
            .expect("register metric");
        registry
            .register(Box::new(queries_failed.clone()))
            .expect("register metric");
        registry
            .register(Box::new(queries_cancelled.clone()))
            .expect("register metric");
        registry
            .register(Box::new(stages_scheduled.clone()))
            .expect("register metric");
        registry
            .register(Box::new(tasks_dispatched.clone()))
            .expect("register metric");
        registry
            .register(Box::new(dispatch_failures.clone()))
            .expect("register metric");
        registry
            .register(Box::new(active_queries.clone()))
            .expect("register metric");
        registry
            .register(Box::new(schedule_seconds.clone()))
            .expect("register metric");

        Self {
            registry,
            queries_submitted,
            queries_failed,
            queries_cancelled,
            stages_scheduled,
            tasks_dispatched,
            dispatch_failures,
            active_queries,
            schedule_seconds,
        }
    }
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

/// Process-global metrics registry used by scheduler components.
pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}
