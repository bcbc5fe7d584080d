//! Instrument handles returned to callers.
//!
//! Handles are cheap clones sharing the series owned by the instrument store.
//! Values live in the `prometheus` atomics, so mutation never takes a
//! registry-wide lock. Vec children are cached in a `DashMap` keyed by the
//! label value tuple; the first caller for a tuple creates the child and every
//! later caller receives the same one.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use prometheus::core::Collector;

use metric_registry_core::{MetricKey, MetricsError, Result};

/// Kind tag used in error messages.
pub(crate) const COUNTER: &str = "counter";
pub(crate) const GAUGE: &str = "gauge";
pub(crate) const HISTOGRAM: &str = "histogram";
pub(crate) const COUNTER_VEC: &str = "counter vec";
pub(crate) const GAUGE_VEC: &str = "gauge vec";
pub(crate) const HISTOGRAM_VEC: &str = "histogram vec";

/// Panic with the error as message, reporting the caller's location.
#[track_caller]
pub(crate) fn fatal<T>(r: Result<T>) -> T {
    match r {
        Ok(v) => v,
        Err(e) => panic!("metric registry: {e}"),
    }
}

/// What the store keeps per identity.
#[derive(Clone)]
pub(crate) enum Instrument {
    Counter(prometheus::Counter),
    Gauge(prometheus::Gauge),
    Histogram(prometheus::Histogram),
    CounterVec(Arc<VecCore<prometheus::CounterVec, prometheus::Counter>>),
    GaugeVec(Arc<VecCore<prometheus::GaugeVec, prometheus::Gauge>>),
    HistogramVec(Arc<VecCore<prometheus::HistogramVec, prometheus::Histogram>>),
}

impl Instrument {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Instrument::Counter(_) => COUNTER,
            Instrument::Gauge(_) => GAUGE,
            Instrument::Histogram(_) => HISTOGRAM,
            Instrument::CounterVec(_) => COUNTER_VEC,
            Instrument::GaugeVec(_) => GAUGE_VEC,
            Instrument::HistogramVec(_) => HISTOGRAM_VEC,
        }
    }

    /// Collector view handed to the exposition registry.
    pub(crate) fn collector(&self) -> Box<dyn Collector> {
        match self {
            Instrument::Counter(c) => Box::new(c.clone()),
            Instrument::Gauge(g) => Box::new(g.clone()),
            Instrument::Histogram(h) => Box::new(h.clone()),
            Instrument::CounterVec(v) => Box::new(v.inner.clone()),
            Instrument::GaugeVec(v) => Box::new(v.inner.clone()),
            Instrument::HistogramVec(v) => Box::new(v.inner.clone()),
        }
    }
}

/// Shared state behind a Vec handle: the exposed metric vector plus the
/// child cache. Label values are stored in sorted-label-name order.
pub(crate) struct VecCore<V, M> {
    pub(crate) inner: V,
    children: DashMap<Vec<String>, M>,
}

impl<V, M: Clone> VecCore<V, M> {
    pub(crate) fn new(inner: V) -> Self {
        Self {
            inner,
            children: DashMap::new(),
        }
    }

    /// Return the child for `values`, creating it on first use.
    fn child<F>(&self, values: Vec<&str>, create: F) -> Result<M>
    where
        F: FnOnce(&[&str]) -> prometheus::Result<M>,
    {
        let key: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        if let Some(m) = self.children.get(&key) {
            return Ok(m.value().clone());
        }
        match self.children.entry(key) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let m = create(&values).map_err(|err| MetricsError::Internal(err.to_string()))?;
                e.insert(m.clone());
                Ok(m)
            }
        }
    }
}

/// Maps label values from declaration order to sorted-label-name order.
#[derive(Clone)]
struct LabelOrder {
    name: Arc<str>,
    order: Arc<[usize]>,
}

impl LabelOrder {
    fn new(name: &str, declared: &[&str]) -> Self {
        let mut order: Vec<usize> = (0..declared.len()).collect();
        order.sort_by_key(|&i| declared[i]);
        Self {
            name: Arc::from(name),
            order: order.into(),
        }
    }

    fn apply<'a>(&self, values: &[&'a str]) -> Result<Vec<&'a str>> {
        if values.len() != self.order.len() {
            return Err(MetricsError::LabelArity {
                name: self.name.to_string(),
                expected: self.order.len(),
                got: values.len(),
            });
        }
        Ok(self.order.iter().map(|&i| values[i]).collect())
    }
}

#[track_caller]
fn check_increment(name: &str, v: f64) {
    if v < 0.0 || v.is_nan() {
        panic!("metric registry: counter {name} cannot be decreased (add {v})");
    }
}

/// Monotonic counter.
#[derive(Clone)]
pub struct Counter {
    key: Arc<MetricKey>,
    inner: prometheus::Counter,
}

impl Counter {
    pub(crate) fn new(key: MetricKey, inner: prometheus::Counter) -> Self {
        Self {
            key: Arc::new(key),
            inner,
        }
    }

    /// Add a non-negative amount. Negative or NaN increments panic.
    #[track_caller]
    pub fn add(&self, v: f64) {
        check_increment(self.key.name(), v);
        self.inner.inc_by(v);
    }

    pub fn get(&self) -> f64 {
        self.inner.get()
    }

    pub fn key(&self) -> &MetricKey {
        &self.key
    }
}

/// Gauge supporting absolute and relative updates.
#[derive(Clone)]
pub struct Gauge {
    key: Arc<MetricKey>,
    inner: prometheus::Gauge,
}

impl Gauge {
    pub(crate) fn new(key: MetricKey, inner: prometheus::Gauge) -> Self {
        Self {
            key: Arc::new(key),
            inner,
        }
    }

    pub fn set(&self, v: f64) {
        self.inner.set(v);
    }

    pub fn add(&self, v: f64) {
        self.inner.add(v);
    }

    pub fn get(&self) -> f64 {
        self.inner.get()
    }

    pub fn key(&self) -> &MetricKey {
        &self.key
    }
}

/// Cumulative histogram with caller-supplied boundaries.
#[derive(Clone)]
pub struct Histogram {
    key: Arc<MetricKey>,
    inner: prometheus::Histogram,
}

impl Histogram {
    pub(crate) fn new(key: MetricKey, inner: prometheus::Histogram) -> Self {
        Self {
            key: Arc::new(key),
            inner,
        }
    }

    pub fn observe(&self, v: f64) {
        self.inner.observe(v);
    }

    pub fn sample_count(&self) -> u64 {
        self.inner.get_sample_count()
    }

    pub fn sample_sum(&self) -> f64 {
        self.inner.get_sample_sum()
    }

    pub fn key(&self) -> &MetricKey {
        &self.key
    }
}

/// Counter family partitioned by label values.
#[derive(Clone)]
pub struct CounterVec {
    key: Arc<MetricKey>,
    core: Arc<VecCore<prometheus::CounterVec, prometheus::Counter>>,
    order: LabelOrder,
}

impl CounterVec {
    pub(crate) fn new(
        key: MetricKey,
        core: Arc<VecCore<prometheus::CounterVec, prometheus::Counter>>,
        declared: &[&str],
    ) -> Self {
        let order = LabelOrder::new(key.name(), declared);
        Self {
            key: Arc::new(key),
            core,
            order,
        }
    }

    fn child(&self, values: &[&str]) -> Result<prometheus::Counter> {
        let sorted = self.order.apply(values)?;
        self.core
            .child(sorted, |v| self.core.inner.get_metric_with_label_values(v))
    }

    /// Add to the series addressed by `values` (in declaration order).
    /// Panics on a label value count mismatch or a negative increment.
    #[track_caller]
    pub fn add(&self, v: f64, values: &[&str]) {
        check_increment(self.key.name(), v);
        fatal(self.child(values)).inc_by(v);
    }

    /// Current value of one series; `None` if it was never touched.
    pub fn get(&self, values: &[&str]) -> Option<f64> {
        let sorted = self.order.apply(values).ok()?;
        let key: Vec<String> = sorted.iter().map(|v| v.to_string()).collect();
        self.core.children.get(&key).map(|c| c.get())
    }

    pub fn key(&self) -> &MetricKey {
        &self.key
    }
}

/// Gauge family partitioned by label values.
#[derive(Clone)]
pub struct GaugeVec {
    key: Arc<MetricKey>,
    core: Arc<VecCore<prometheus::GaugeVec, prometheus::Gauge>>,
    order: LabelOrder,
}

impl GaugeVec {
    pub(crate) fn new(
        key: MetricKey,
        core: Arc<VecCore<prometheus::GaugeVec, prometheus::Gauge>>,
        declared: &[&str],
    ) -> Self {
        let order = LabelOrder::new(key.name(), declared);
        Self {
            key: Arc::new(key),
            core,
            order,
        }
    }

    fn child(&self, values: &[&str]) -> Result<prometheus::Gauge> {
        let sorted = self.order.apply(values)?;
        self.core
            .child(sorted, |v| self.core.inner.get_metric_with_label_values(v))
    }

    #[track_caller]
    pub fn set(&self, v: f64, values: &[&str]) {
        fatal(self.child(values)).set(v);
    }

    #[track_caller]
    pub fn add(&self, v: f64, values: &[&str]) {
        fatal(self.child(values)).add(v);
    }

    pub fn get(&self, values: &[&str]) -> Option<f64> {
        let sorted = self.order.apply(values).ok()?;
        let key: Vec<String> = sorted.iter().map(|v| v.to_string()).collect();
        self.core.children.get(&key).map(|g| g.get())
    }

    pub fn key(&self) -> &MetricKey {
        &self.key
    }
}

/// Histogram family partitioned by label values.
#[derive(Clone)]
pub struct HistogramVec {
    key: Arc<MetricKey>,
    core: Arc<VecCore<prometheus::HistogramVec, prometheus::Histogram>>,
    order: LabelOrder,
}

impl HistogramVec {
    pub(crate) fn new(
        key: MetricKey,
        core: Arc<VecCore<prometheus::HistogramVec, prometheus::Histogram>>,
        declared: &[&str],
    ) -> Self {
        let order = LabelOrder::new(key.name(), declared);
        Self {
            key: Arc::new(key),
            core,
            order,
        }
    }

    fn child(&self, values: &[&str]) -> Result<prometheus::Histogram> {
        let sorted = self.order.apply(values)?;
        self.core
            .child(sorted, |v| self.core.inner.get_metric_with_label_values(v))
    }

    #[track_caller]
    pub fn observe(&self, v: f64, values: &[&str]) {
        fatal(self.child(values)).observe(v);
    }

    pub fn key(&self) -> &MetricKey {
        &self.key
    }
}

macro_rules! debug_by_key {
    ($($handle:ident),+) => {$(
        impl fmt::Debug for $handle {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($handle)).field("key", &self.key).finish()
            }
        }
    )+};
}

debug_by_key!(Counter, Gauge, Histogram, CounterVec, GaugeVec, HistogramVec);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn counter_vec(declared: &[&str]) -> CounterVec {
        let key = MetricKey::new("jobs_total", declared, &BTreeMap::new()).unwrap();
        let names: Vec<&str> = key.label_names().iter().map(String::as_str).collect();
        let inner = prometheus::CounterVec::new(prometheus::Opts::new("jobs_total", "jobs"), &names)
            .unwrap();
        let core = Arc::new(VecCore::new(inner));
        CounterVec::new(key, core, declared)
    }

    #[test]
    fn same_tuple_accumulates() {
        let v = counter_vec(&["a", "b"]);
        v.add(1.0, &["x", "y"]);
        v.add(2.5, &["x", "y"]);
        v.add(4.0, &["p", "q"]);
        assert_eq!(v.get(&["x", "y"]), Some(3.5));
        assert_eq!(v.get(&["p", "q"]), Some(4.0));
        assert_eq!(v.get(&["never", "seen"]), None);
    }

    #[test]
    fn declaration_order_is_respected() {
        let v = counter_vec(&["status", "app"]);
        v.add(1.0, &["ok", "portal"]);
        let child = v.core.inner.with_label_values(&["portal", "ok"]);
        assert_eq!(child.get(), 1.0);
    }

    #[test]
    #[should_panic(expected = "expected 2, got 1")]
    fn arity_mismatch_panics() {
        counter_vec(&["a", "b"]).add(1.0, &["only-one"]);
    }

    #[test]
    fn handles_debug_print_their_key() {
        let v = counter_vec(&["status", "app"]);
        let printed = format!("{v:?}");
        assert!(printed.starts_with("CounterVec"), "{printed}");
        assert!(printed.contains("jobs_total"), "{printed}");
    }

    #[test]
    #[should_panic(expected = "cannot be decreased")]
    fn negative_increment_panics() {
        let c = Counter::new(
            MetricKey::fixed("c").unwrap(),
            prometheus::Counter::new("c", "c").unwrap(),
        );
        c.add(-1.0);
    }
}
