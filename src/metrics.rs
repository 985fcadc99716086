use crate::error::ProbeFailure;
use crate::snapshot::{HostSnapshot, ServiceActivity};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub agent_ticks_total: CounterVec,
    pub agent_probe_errors_total: CounterVec,
    pub agent_archive_writes_total: Counter,
    pub agent_store_errors_total: CounterVec,
    pub agent_scrape_count_total: Counter,
    pub agent_last_collect_timestamp_seconds: Gauge,
    pub agent_host_uptime_seconds: Gauge,
    pub agent_cpu_usage_percent: Gauge,
    pub agent_memory_used_percent: Gauge,
    pub agent_partition_free_percent: GaugeVec,
    pub agent_service_running: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let agent_ticks_total = CounterVec::new(
            opts!("agent_ticks_total", "Completed sampling ticks by loop"),
            &["loop"],
        )?;
        let agent_probe_errors_total = CounterVec::new(
            opts!(
                "agent_probe_errors_total",
                "Probe failures that nulled a snapshot field"
            ),
            &["metric", "kind"],
        )?;
        let agent_archive_writes_total = Counter::with_opts(opts!(
            "agent_archive_writes_total",
            "Archive snapshot files written"
        ))?;
        let agent_store_errors_total = CounterVec::new(
            opts!(
                "agent_store_errors_total",
                "Failed snapshot file writes by target"
            ),
            &["target"],
        )?;
        let agent_scrape_count_total = Counter::with_opts(opts!(
            "agent_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let agent_last_collect_timestamp_seconds = Gauge::with_opts(opts!(
            "agent_last_collect_timestamp_seconds",
            "Unix time of the last assembled snapshot"
        ))?;
        let agent_host_uptime_seconds =
            Gauge::with_opts(opts!("agent_host_uptime_seconds", "Host uptime in seconds"))?;
        let agent_cpu_usage_percent = Gauge::with_opts(opts!(
            "agent_cpu_usage_percent",
            "Average CPU usage across cores in percent (0..100)"
        ))?;
        let agent_memory_used_percent = Gauge::with_opts(opts!(
            "agent_memory_used_percent",
            "Used memory in percent"
        ))?;
        let agent_partition_free_percent = GaugeVec::new(
            opts!(
                "agent_partition_free_percent",
                "Free space in percent by partition device"
            ),
            &["device"],
        )?;
        let agent_service_running = GaugeVec::new(
            opts!(
                "agent_service_running",
                "1 when the declared service is running, 0 otherwise"
            ),
            &["service"],
        )?;

        register(&registry, &agent_ticks_total)?;
        register(&registry, &agent_probe_errors_total)?;
        register(&registry, &agent_archive_writes_total)?;
        register(&registry, &agent_store_errors_total)?;
        register(&registry, &agent_scrape_count_total)?;
        register(&registry, &agent_last_collect_timestamp_seconds)?;
        register(&registry, &agent_host_uptime_seconds)?;
        register(&registry, &agent_cpu_usage_percent)?;
        register(&registry, &agent_memory_used_percent)?;
        register(&registry, &agent_partition_free_percent)?;
        register(&registry, &agent_service_running)?;

        Ok(Arc::new(Self {
            registry,
            agent_ticks_total,
            agent_probe_errors_total,
            agent_archive_writes_total,
            agent_store_errors_total,
            agent_scrape_count_total,
            agent_last_collect_timestamp_seconds,
            agent_host_uptime_seconds,
            agent_cpu_usage_percent,
            agent_memory_used_percent,
            agent_partition_free_percent,
            agent_service_running,
        }))
    }

    pub fn update_from_snapshot(&self, snapshot: &HostSnapshot) {
        self.agent_last_collect_timestamp_seconds
            .set(now_unix() as f64);
        self.agent_host_uptime_seconds
            .set(snapshot.uptime_seconds as f64);
        self.agent_cpu_usage_percent.set(snapshot.cpu_usage_percent);
        self.agent_memory_used_percent
            .set(snapshot.memory_used_percent);

        self.agent_partition_free_percent.reset();
        for p in &snapshot.partitions {
            if let Some(free) = p.free_percent {
                self.agent_partition_free_percent
                    .with_label_values(&[p.device.as_str()])
                    .set(free);
            }
        }

        self.agent_service_running.reset();
        for s in &snapshot.services {
            if let Some(name) = &s.name {
                let running = matches!(s.is_active, ServiceActivity::Running);
                self.agent_service_running
                    .with_label_values(&[name.as_str()])
                    .set(if running { 1.0 } else { 0.0 });
            }
        }

        for failure in &snapshot.errors {
            self.inc_probe_error(failure);
        }
    }

    pub fn inc_tick(&self, loop_name: &str) {
        self.agent_ticks_total.with_label_values(&[loop_name]).inc();
    }

    pub fn inc_probe_error(&self, failure: &ProbeFailure) {
        // strip the element index so labels stay bounded
        let metric = failure
            .metric
            .split('[')
            .next()
            .unwrap_or(&failure.metric);
        self.agent_probe_errors_total
            .with_label_values(&[metric, failure.kind.as_str()])
            .inc();
    }

    pub fn inc_archive_write(&self) {
        self.agent_archive_writes_total.inc();
    }

    pub fn inc_store_error(&self, target: &str) {
        self.agent_store_errors_total
            .with_label_values(&[target])
            .inc();
    }

    pub fn inc_scrape_count(&self) {
        self.agent_scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
