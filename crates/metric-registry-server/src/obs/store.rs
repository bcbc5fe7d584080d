//! Instrument store: one instrument per metric identity.
//!
//! Identities are grouped by metric name. Every identity under a name shares
//! one kind, because the exposition format carries a single `TYPE` line per
//! name. `get_or_create` runs the kind check and the check-create-export
//! sequence under the `DashMap` shard lock for the name, so concurrent
//! registrations of the same identity observe exactly one instrument. The
//! first registration's help text is authoritative.
//!
//! The process collector lives in its own slot. It exports several names,
//! which are reserved with their kinds while it is registered.

use std::collections::HashMap;
use std::sync::Mutex;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use metric_registry_core::{MetricKey, MetricsError, Result};

use super::exposition::Exposition;
use super::instrument::Instrument;
use super::process::ProcessCollector;

struct Registered {
    help: String,
    instrument: Instrument,
}

/// Identities sharing one metric name.
struct Family {
    kind: &'static str,
    /// Held open by the process collector even with no members.
    reserved: bool,
    members: HashMap<MetricKey, Registered>,
}

impl Family {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            reserved: false,
            members: HashMap::new(),
        }
    }
}

pub(crate) struct InstrumentStore {
    families: DashMap<String, Family>,
    process: Mutex<Option<ProcessCollector>>,
    exposition: Exposition,
}

impl InstrumentStore {
    pub(crate) fn new(exposition: Exposition) -> Self {
        Self {
            families: DashMap::new(),
            process: Mutex::new(None),
            exposition,
        }
    }

    /// Return the instrument registered under `key`, or build one with
    /// `create`, export it and insert it. A name already used by another
    /// kind is rejected even when the rest of the identity differs.
    pub(crate) fn get_or_create<F>(
        &self,
        key: MetricKey,
        kind: &'static str,
        help: &str,
        create: F,
    ) -> Result<Instrument>
    where
        F: FnOnce(&MetricKey) -> Result<Instrument>,
    {
        match self.families.entry(key.name().to_string()) {
            Entry::Occupied(mut e) => {
                let family = e.get_mut();
                if family.kind != kind {
                    return Err(MetricsError::KindMismatch {
                        name: key.name().to_string(),
                        existing: family.kind,
                        requested: kind,
                    });
                }
                if let Some(existing) = family.members.get(&key) {
                    if existing.help != help {
                        tracing::warn!(
                            metric = %key,
                            kept = %existing.help,
                            ignored = %help,
                            "duplicate registration with different help text; keeping the first"
                        );
                    } else {
                        tracing::debug!(metric = %key, "duplicate registration; returning existing");
                    }
                    return Ok(existing.instrument.clone());
                }
                let instrument = self.export(&key, create)?;
                family.members.insert(key, Registered::new(help, &instrument));
                Ok(instrument)
            }
            Entry::Vacant(e) => {
                let instrument = self.export(&key, create)?;
                let mut family = Family::new(kind);
                family.members.insert(key, Registered::new(help, &instrument));
                e.insert(family);
                Ok(instrument)
            }
        }
    }

    fn export<F>(&self, key: &MetricKey, create: F) -> Result<Instrument>
    where
        F: FnOnce(&MetricKey) -> Result<Instrument>,
    {
        let instrument = create(key)?;
        self.exposition.register(key.name(), instrument.collector())?;
        tracing::debug!(metric = %key, kind = instrument.kind(), "registered");
        Ok(instrument)
    }

    /// Drop the identity and stop exporting it. Returns false if absent.
    pub(crate) fn remove(&self, key: &MetricKey) -> bool {
        let Entry::Occupied(mut e) = self.families.entry(key.name().to_string()) else {
            return false;
        };
        let Some(removed) = e.get_mut().members.remove(key) else {
            return false;
        };
        self.exposition.unregister(removed.instrument.collector());
        tracing::debug!(metric = %key, kind = removed.instrument.kind(), "removed");
        let family = e.get();
        if family.members.is_empty() && !family.reserved {
            e.remove();
        }
        true
    }

    /// Register the process collector once. `names` lists the metric names
    /// it exports with their kinds; each is reserved for the collector.
    pub(crate) fn register_process<F>(&self, names: &[(&str, &'static str)], create: F) -> Result<()>
    where
        F: FnOnce() -> Result<ProcessCollector>,
    {
        let mut slot = self
            .process
            .lock()
            .map_err(|_| MetricsError::Internal("process collector slot poisoned".into()))?;
        if slot.is_some() {
            tracing::debug!("process metrics already registered");
            return Ok(());
        }

        self.reserve(names)?;
        let registered = create().and_then(|collector| {
            let name = names.first().map(|(name, _)| *name).unwrap_or("process");
            self.exposition.register(name, Box::new(collector.clone()))?;
            Ok(collector)
        });
        match registered {
            Ok(collector) => {
                tracing::debug!("process metrics registered");
                *slot = Some(collector);
                Ok(())
            }
            Err(e) => {
                self.release(names);
                Err(e)
            }
        }
    }

    fn reserve(&self, names: &[(&str, &'static str)]) -> Result<()> {
        for (i, &(name, kind)) in names.iter().enumerate() {
            let mut family = self
                .families
                .entry(name.to_string())
                .or_insert_with(|| Family::new(kind));
            if family.kind != kind {
                let existing = family.kind;
                drop(family);
                self.release(&names[..i]);
                return Err(MetricsError::KindMismatch {
                    name: name.to_string(),
                    existing,
                    requested: kind,
                });
            }
            family.reserved = true;
        }
        Ok(())
    }

    fn release(&self, names: &[(&str, &'static str)]) {
        for &(name, _) in names {
            if let Entry::Occupied(mut e) = self.families.entry(name.to_string()) {
                e.get_mut().reserved = false;
                if e.get().members.is_empty() {
                    e.remove();
                }
            }
        }
    }

    /// Registered identities, counting the process collector as one.
    pub(crate) fn len(&self) -> usize {
        let members: usize = self.families.iter().map(|f| f.members.len()).sum();
        let process = self.process.lock().map(|p| p.is_some()).unwrap_or(false);
        members + usize::from(process)
    }
}

impl Registered {
    fn new(help: &str, instrument: &Instrument) -> Self {
        Self {
            help: help.to_string(),
            instrument: instrument.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obs::instrument::{COUNTER, GAUGE};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn counter_factory(created: &AtomicUsize) -> impl FnOnce(&MetricKey) -> Result<Instrument> + '_ {
        move |key| {
            created.fetch_add(1, Ordering::SeqCst);
            let c = prometheus::Counter::new(key.name(), "help").unwrap();
            Ok(Instrument::Counter(c))
        }
    }

    fn as_counter(i: Instrument) -> prometheus::Counter {
        match i {
            Instrument::Counter(c) => c,
            other => panic!("expected counter, got {}", other.kind()),
        }
    }

    fn job_key(name: &str, job: &str) -> MetricKey {
        let labels = BTreeMap::from([("job".to_string(), job.to_string())]);
        MetricKey::new(name, &[], &labels).unwrap()
    }

    #[test]
    fn duplicate_returns_same_instrument() {
        let exposition = Exposition::new();
        let store = InstrumentStore::new(exposition.clone());
        let created = AtomicUsize::new(0);

        let a = as_counter(
            store
                .get_or_create(MetricKey::fixed("dup").unwrap(), COUNTER, "help", counter_factory(&created))
                .unwrap(),
        );
        let b = as_counter(
            store
                .get_or_create(
                    MetricKey::fixed("dup").unwrap(),
                    COUNTER,
                    "other help",
                    counter_factory(&created),
                )
                .unwrap(),
        );
        a.inc_by(10.0);
        b.inc_by(15.0);

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
        let text = exposition.render().unwrap();
        assert!(text.contains("dup 25"), "{text}");
        assert!(text.contains("# HELP dup help"), "{text}");
        assert!(!text.contains("other help"), "{text}");
    }

    #[test]
    fn concurrent_registration_creates_once() {
        let store = Arc::new(InstrumentStore::new(Exposition::new()));
        let created = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let created = Arc::clone(&created);
                thread::spawn(move || {
                    let c = as_counter(
                        store
                            .get_or_create(
                                MetricKey::fixed("raced").unwrap(),
                                COUNTER,
                                "help",
                                counter_factory(&created),
                            )
                            .unwrap(),
                    );
                    c.inc_by(1.0);
                    c
                })
            })
            .collect();
        let counters: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(created.load(Ordering::SeqCst), 1);
        assert_eq!(store.len(), 1);
        for c in counters {
            assert_eq!(c.get(), 16.0);
        }
    }

    #[test]
    fn failed_create_leaves_no_entry() {
        let store = InstrumentStore::new(Exposition::new());
        let err = store.get_or_create(MetricKey::fixed("broken").unwrap(), COUNTER, "help", |_| {
            Err(MetricsError::Internal("boom".into()))
        });
        assert!(err.is_err());
        assert_eq!(store.len(), 0);

        // The name was never claimed, so another kind may take it.
        let created = AtomicUsize::new(0);
        assert!(store
            .get_or_create(MetricKey::fixed("broken").unwrap(), GAUGE, "help", |key| {
                created.fetch_add(1, Ordering::SeqCst);
                Ok(Instrument::Gauge(prometheus::Gauge::new(key.name(), "help").unwrap()))
            })
            .is_ok());
    }

    #[test]
    fn name_keeps_one_kind_across_static_labels() {
        let exposition = Exposition::new();
        let store = InstrumentStore::new(exposition.clone());
        let created = AtomicUsize::new(0);

        let up_a = as_counter(
            store
                .get_or_create(job_key("up", "a"), COUNTER, "help", |key| {
                    let opts = prometheus::Opts::new(key.name(), "help").const_label("job", "a");
                    Ok(Instrument::Counter(prometheus::Counter::with_opts(opts).unwrap()))
                })
                .unwrap(),
        );
        up_a.inc_by(1.0);

        let err = store
            .get_or_create(job_key("up", "b"), GAUGE, "help", |key| {
                created.fetch_add(1, Ordering::SeqCst);
                let opts = prometheus::Opts::new(key.name(), "help").const_label("job", "b");
                Ok(Instrument::Gauge(prometheus::Gauge::with_opts(opts).unwrap()))
            })
            .err()
            .unwrap();
        assert!(matches!(
            err,
            MetricsError::KindMismatch { existing: "counter", requested: "gauge", .. }
        ));
        assert_eq!(created.load(Ordering::SeqCst), 0);
        assert_eq!(store.len(), 1);

        let text = exposition.render().unwrap();
        assert!(text.contains("# TYPE up counter"), "{text}");
        assert!(!text.contains(r#"job="b""#), "{text}");
    }

    #[test]
    fn name_is_released_when_last_identity_is_removed() {
        let store = InstrumentStore::new(Exposition::new());
        let created = AtomicUsize::new(0);
        let key = MetricKey::fixed("recycled").unwrap();

        store.get_or_create(key.clone(), COUNTER, "help", counter_factory(&created)).unwrap();
        assert!(store.remove(&key));

        let gauge = store.get_or_create(key, GAUGE, "help", |key| {
            Ok(Instrument::Gauge(prometheus::Gauge::new(key.name(), "help").unwrap()))
        });
        assert!(matches!(gauge, Ok(Instrument::Gauge(_))));
    }

    #[test]
    fn remove_stops_exporting() {
        let exposition = Exposition::new();
        let store = InstrumentStore::new(exposition.clone());
        let created = AtomicUsize::new(0);
        let key = MetricKey::fixed("gone").unwrap();

        let c = as_counter(
            store
                .get_or_create(key.clone(), COUNTER, "help", counter_factory(&created))
                .unwrap(),
        );
        c.inc_by(1.0);
        assert!(exposition.render().unwrap().contains("gone 1"));

        assert!(store.remove(&key));
        assert!(!store.remove(&key));
        c.inc_by(1.0);
        assert!(!exposition.render().unwrap().contains("gone"));

        // Re-registration after removal creates a fresh series.
        let c2 = as_counter(store.get_or_create(key, COUNTER, "help", counter_factory(&created)).unwrap());
        assert_eq!(c2.get(), 0.0);
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_reservation_releases_earlier_names() {
        let store = InstrumentStore::new(Exposition::new());
        store
            .get_or_create(MetricKey::fixed("taken").unwrap(), GAUGE, "help", |key| {
                Ok(Instrument::Gauge(prometheus::Gauge::new(key.name(), "help").unwrap()))
            })
            .unwrap();

        let names = [("free_total", COUNTER), ("taken", COUNTER)];
        let err = store
            .register_process(&names, || panic!("collector must not be built"))
            .unwrap_err();
        assert!(matches!(err, MetricsError::KindMismatch { .. }));
        assert_eq!(store.len(), 1);

        // "free_total" was released and can be claimed as a gauge.
        let created = store.get_or_create(MetricKey::fixed("free_total").unwrap(), GAUGE, "help", |key| {
            Ok(Instrument::Gauge(prometheus::Gauge::new(key.name(), "help").unwrap()))
        });
        assert!(created.is_ok());
    }
}
