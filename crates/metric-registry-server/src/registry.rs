//! Registry facade.
//!
//! Composes the instrument store, the exposition adapter and the server
//! manager. Construction with a server option binds the listener before
//! returning; bind and TLS failures are returned as errors.
//!
//! The `new_*` methods fail fast: an invalid name, an invalid label name or a
//! conflicting re-registration panics at the call site. Each has a `try_new_*`
//! twin that returns the error instead, for callers that propagate it to a
//! startup failure themselves.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;

use metric_registry_core::{
    const_labels, validate_buckets, MetricKey, MetricOption, MetricsError, Result,
};

use crate::obs::exposition::Exposition;
use crate::obs::instrument::{
    fatal, Counter, CounterVec, Gauge, GaugeVec, Histogram, HistogramVec, Instrument, VecCore,
    COUNTER, COUNTER_VEC, GAUGE, GAUGE_VEC, HISTOGRAM, HISTOGRAM_VEC,
};
use crate::obs::process::{ProcessCollector, PROCESS_METRICS};
use crate::obs::store::InstrumentStore;
use crate::router;
use crate::server::{self, ServerHandle, ServerOption};

/// Terminal server state of a registry.
#[derive(Debug)]
pub enum ServerState {
    /// Own listener bound and serving.
    Serving(ServerHandle),
    /// No listener; the caller mounts [`Registry::router`].
    Attached,
}

#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    store: InstrumentStore,
    exposition: Exposition,
    server: ServerState,
}

impl Registry {
    /// Build a registry. `None` selects attach mode.
    pub async fn new(server: Option<ServerOption>) -> Result<Self> {
        let exposition = Exposition::new();
        let state = match server {
            Some(option) => {
                let handle =
                    server::start(&option, router::build_router(exposition.clone())).await?;
                ServerState::Serving(handle)
            }
            None => {
                tracing::info!("metrics registry attached; mount Registry::router to expose it");
                ServerState::Attached
            }
        };
        Ok(Self::from_parts(exposition, state))
    }

    /// Registry without its own listener.
    pub fn attached() -> Self {
        Self::from_parts(Exposition::new(), ServerState::Attached)
    }

    fn from_parts(exposition: Exposition, server: ServerState) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                store: InstrumentStore::new(exposition.clone()),
                exposition,
                server,
            }),
        }
    }

    pub fn server_state(&self) -> &ServerState {
        &self.inner.server
    }

    /// Bound address; `None` in attach mode.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.inner.server {
            ServerState::Serving(handle) => Some(handle.local_addr()),
            ServerState::Attached => None,
        }
    }

    /// Bound TCP port (the OS-assigned one when 0 was requested); `None` in
    /// attach mode.
    pub fn port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    /// Router serving `GET /metrics` for this registry.
    pub fn router(&self) -> Router {
        router::build_router(self.inner.exposition.clone())
    }

    /// Exposition text a scrape would return right now.
    pub fn render(&self) -> Result<String> {
        self.inner.exposition.render()
    }

    /// Number of registered identities.
    pub fn len(&self) -> usize {
        self.inner.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // --------------------
    // Counters
    // --------------------

    #[track_caller]
    pub fn new_counter(&self, name: &str, help: &str, opts: &[MetricOption]) -> Counter {
        fatal(self.try_new_counter(name, help, opts))
    }

    pub fn try_new_counter(&self, name: &str, help: &str, opts: &[MetricOption]) -> Result<Counter> {
        let key = MetricKey::new(name, &[], &const_labels(opts))?;
        let instrument = self.inner.store.get_or_create(key.clone(), COUNTER, help, |key| {
            let c = prometheus::Counter::with_opts(prom_opts(key, help))
                .map_err(|e| rejected(key, e))?;
            Ok(Instrument::Counter(c))
        })?;
        match instrument {
            Instrument::Counter(c) => Ok(Counter::new(key, c)),
            other => Err(mismatch(&key, &other, COUNTER)),
        }
    }

    #[track_caller]
    pub fn new_counter_vec(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
        opts: &[MetricOption],
    ) -> CounterVec {
        fatal(self.try_new_counter_vec(name, help, label_names, opts))
    }

    pub fn try_new_counter_vec(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
        opts: &[MetricOption],
    ) -> Result<CounterVec> {
        let key = MetricKey::new(name, label_names, &const_labels(opts))?;
        let instrument = self.inner.store.get_or_create(key.clone(), COUNTER_VEC, help, |key| {
            let v = prometheus::CounterVec::new(prom_opts(key, help), &sorted_names(key))
                .map_err(|e| rejected(key, e))?;
            Ok(Instrument::CounterVec(Arc::new(VecCore::new(v))))
        })?;
        match instrument {
            Instrument::CounterVec(core) => Ok(CounterVec::new(key, core, label_names)),
            other => Err(mismatch(&key, &other, COUNTER_VEC)),
        }
    }

    pub fn remove_counter(&self, counter: &Counter) -> bool {
        self.inner.store.remove(counter.key())
    }

    pub fn remove_counter_vec(&self, vec: &CounterVec) -> bool {
        self.inner.store.remove(vec.key())
    }

    // --------------------
    // Gauges
    // --------------------

    #[track_caller]
    pub fn new_gauge(&self, name: &str, help: &str, opts: &[MetricOption]) -> Gauge {
        fatal(self.try_new_gauge(name, help, opts))
    }

    pub fn try_new_gauge(&self, name: &str, help: &str, opts: &[MetricOption]) -> Result<Gauge> {
        let key = MetricKey::new(name, &[], &const_labels(opts))?;
        let instrument = self.inner.store.get_or_create(key.clone(), GAUGE, help, |key| {
            let g = prometheus::Gauge::with_opts(prom_opts(key, help))
                .map_err(|e| rejected(key, e))?;
            Ok(Instrument::Gauge(g))
        })?;
        match instrument {
            Instrument::Gauge(g) => Ok(Gauge::new(key, g)),
            other => Err(mismatch(&key, &other, GAUGE)),
        }
    }

    #[track_caller]
    pub fn new_gauge_vec(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
        opts: &[MetricOption],
    ) -> GaugeVec {
        fatal(self.try_new_gauge_vec(name, help, label_names, opts))
    }

    pub fn try_new_gauge_vec(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
        opts: &[MetricOption],
    ) -> Result<GaugeVec> {
        let key = MetricKey::new(name, label_names, &const_labels(opts))?;
        let instrument = self.inner.store.get_or_create(key.clone(), GAUGE_VEC, help, |key| {
            let v = prometheus::GaugeVec::new(prom_opts(key, help), &sorted_names(key))
                .map_err(|e| rejected(key, e))?;
            Ok(Instrument::GaugeVec(Arc::new(VecCore::new(v))))
        })?;
        match instrument {
            Instrument::GaugeVec(core) => Ok(GaugeVec::new(key, core, label_names)),
            other => Err(mismatch(&key, &other, GAUGE_VEC)),
        }
    }

    pub fn remove_gauge(&self, gauge: &Gauge) -> bool {
        self.inner.store.remove(gauge.key())
    }

    pub fn remove_gauge_vec(&self, vec: &GaugeVec) -> bool {
        self.inner.store.remove(vec.key())
    }

    // --------------------
    // Histograms
    // --------------------

    /// Empty `buckets` selects the default boundaries.
    #[track_caller]
    pub fn new_histogram(
        &self,
        name: &str,
        help: &str,
        buckets: &[f64],
        opts: &[MetricOption],
    ) -> Histogram {
        fatal(self.try_new_histogram(name, help, buckets, opts))
    }

    pub fn try_new_histogram(
        &self,
        name: &str,
        help: &str,
        buckets: &[f64],
        opts: &[MetricOption],
    ) -> Result<Histogram> {
        let key = MetricKey::new(name, &[], &const_labels(opts))?;
        validate_buckets(buckets)?;
        let instrument = self.inner.store.get_or_create(key.clone(), HISTOGRAM, help, |key| {
            let h = prometheus::Histogram::with_opts(histogram_opts(key, help, buckets))
                .map_err(|e| rejected(key, e))?;
            Ok(Instrument::Histogram(h))
        })?;
        match instrument {
            Instrument::Histogram(h) => Ok(Histogram::new(key, h)),
            other => Err(mismatch(&key, &other, HISTOGRAM)),
        }
    }

    #[track_caller]
    pub fn new_histogram_vec(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
        buckets: &[f64],
        opts: &[MetricOption],
    ) -> HistogramVec {
        fatal(self.try_new_histogram_vec(name, help, label_names, buckets, opts))
    }

    pub fn try_new_histogram_vec(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
        buckets: &[f64],
        opts: &[MetricOption],
    ) -> Result<HistogramVec> {
        let key = MetricKey::new(name, label_names, &const_labels(opts))?;
        validate_buckets(buckets)?;
        let instrument = self.inner.store.get_or_create(key.clone(), HISTOGRAM_VEC, help, |key| {
            let v = prometheus::HistogramVec::new(
                histogram_opts(key, help, buckets),
                &sorted_names(key),
            )
            .map_err(|e| rejected(key, e))?;
            Ok(Instrument::HistogramVec(Arc::new(VecCore::new(v))))
        })?;
        match instrument {
            Instrument::HistogramVec(core) => Ok(HistogramVec::new(key, core, label_names)),
            other => Err(mismatch(&key, &other, HISTOGRAM_VEC)),
        }
    }

    pub fn remove_histogram(&self, histogram: &Histogram) -> bool {
        self.inner.store.remove(histogram.key())
    }

    pub fn remove_histogram_vec(&self, vec: &HistogramVec) -> bool {
        self.inner.store.remove(vec.key())
    }

    // --------------------
    // Debug metrics
    // --------------------

    /// Export process CPU and memory metrics. Repeated calls are no-ops.
    #[track_caller]
    pub fn register_debug_metrics(&self) {
        fatal(self.try_register_debug_metrics())
    }

    pub fn try_register_debug_metrics(&self) -> Result<()> {
        self.inner
            .store
            .register_process(&PROCESS_METRICS, ProcessCollector::new)
    }
}

fn prom_opts(key: &MetricKey, help: &str) -> prometheus::Opts {
    let labels: HashMap<String, String> = key.const_labels().iter().cloned().collect();
    prometheus::Opts::new(key.name(), help).const_labels(labels)
}

fn histogram_opts(key: &MetricKey, help: &str, buckets: &[f64]) -> prometheus::HistogramOpts {
    let opts = prometheus::HistogramOpts::from(prom_opts(key, help));
    if buckets.is_empty() {
        opts
    } else {
        opts.buckets(buckets.to_vec())
    }
}

fn sorted_names(key: &MetricKey) -> Vec<&str> {
    key.label_names().iter().map(String::as_str).collect()
}

fn rejected(key: &MetricKey, e: prometheus::Error) -> MetricsError {
    MetricsError::Conflict {
        name: key.name().to_string(),
        reason: e.to_string(),
    }
}

fn mismatch(key: &MetricKey, existing: &Instrument, requested: &'static str) -> MetricsError {
    MetricsError::KindMismatch {
        name: key.name().to_string(),
        existing: existing.kind(),
        requested,
    }
}
