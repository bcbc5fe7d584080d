//! Process metrics collected on scrape.
//!
//! Values are read from `sysinfo` each time the exposition registry gathers,
//! so a scrape always reports the current process state.

use std::sync::{Arc, Mutex};

use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Counter, Gauge};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use metric_registry_core::{MetricsError, Result};

use super::instrument::{COUNTER, GAUGE};

/// Metric names exported by the collector, with their kinds.
pub(crate) const PROCESS_METRICS: [(&str, &str); 4] = [
    ("process_cpu_seconds_total", COUNTER),
    ("process_resident_memory_bytes", GAUGE),
    ("process_virtual_memory_bytes", GAUGE),
    ("process_start_time_seconds", GAUGE),
];

#[derive(Clone)]
pub(crate) struct ProcessCollector {
    inner: Arc<Inner>,
}

struct Inner {
    pid: Pid,
    system: Mutex<System>,
    cpu_seconds: Counter,
    resident_memory: Gauge,
    virtual_memory: Gauge,
    start_time: Gauge,
}

impl ProcessCollector {
    pub(crate) fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| MetricsError::Internal(e.to_string()))?;
        let cpu_seconds = Counter::new(
            "process_cpu_seconds_total",
            "Total user and system CPU time spent in seconds.",
        )
        .map_err(internal)?;
        let resident_memory = Gauge::new(
            "process_resident_memory_bytes",
            "Resident memory size in bytes.",
        )
        .map_err(internal)?;
        let virtual_memory = Gauge::new(
            "process_virtual_memory_bytes",
            "Virtual memory size in bytes.",
        )
        .map_err(internal)?;
        let start_time = Gauge::new(
            "process_start_time_seconds",
            "Start time of the process since unix epoch in seconds.",
        )
        .map_err(internal)?;

        Ok(Self {
            inner: Arc::new(Inner {
                pid,
                system: Mutex::new(System::new()),
                cpu_seconds,
                resident_memory,
                virtual_memory,
                start_time,
            }),
        })
    }

    fn refresh(&self) {
        let inner = &self.inner;
        // Poisoned lock: keep the last values rather than panic inside a scrape.
        let Ok(mut system) = inner.system.lock() else {
            return;
        };
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[inner.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );
        let Some(process) = system.process(inner.pid) else {
            return;
        };

        let cpu = process.accumulated_cpu_time() as f64 / 1000.0;
        let delta = cpu - inner.cpu_seconds.get();
        if delta > 0.0 {
            inner.cpu_seconds.inc_by(delta);
        }
        inner.resident_memory.set(process.memory() as f64);
        inner.virtual_memory.set(process.virtual_memory() as f64);
        inner.start_time.set(process.start_time() as f64);
    }
}

fn internal(e: prometheus::Error) -> MetricsError {
    MetricsError::Internal(e.to_string())
}

impl Collector for ProcessCollector {
    fn desc(&self) -> Vec<&Desc> {
        let inner = &self.inner;
        let mut descs = inner.cpu_seconds.desc();
        descs.extend(inner.resident_memory.desc());
        descs.extend(inner.virtual_memory.desc());
        descs.extend(inner.start_time.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.refresh();
        let inner = &self.inner;
        let mut families = inner.cpu_seconds.collect();
        families.extend(inner.resident_memory.collect());
        families.extend(inner.virtual_memory.collect());
        families.extend(inner.start_time.collect());
        families
    }
}
