//! Bridge between the instrument store and the `prometheus` registry.
//!
//! The adapter owns a `prometheus::Registry` handle (internally shared), so
//! every scrape gathers whatever is registered at that moment. Registration
//! and removal take the registry's write lock while a gather holds its read
//! lock, so a series is either fully present in a scrape or fully absent.

use prometheus::core::Collector;
use prometheus::{Encoder, TextEncoder};

use metric_registry_core::{MetricsError, Result};

#[derive(Clone, Default)]
pub struct Exposition {
    registry: prometheus::Registry,
}

impl Exposition {
    pub fn new() -> Self {
        Self {
            registry: prometheus::Registry::new(),
        }
    }

    pub(crate) fn register(&self, name: &str, collector: Box<dyn Collector>) -> Result<()> {
        self.registry.register(collector).map_err(|e| {
            let reason = match e {
                prometheus::Error::AlreadyReg => "already exported by another registration".to_string(),
                other => other.to_string(),
            };
            MetricsError::Conflict {
                name: name.to_string(),
                reason,
            }
        })
    }

    /// Returns false if the collector was not registered.
    pub(crate) fn unregister(&self, collector: Box<dyn Collector>) -> bool {
        self.registry.unregister(collector).is_ok()
    }

    /// Render the current registered set in text exposition format.
    pub fn render(&self) -> Result<String> {
        let families = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buf)
            .map_err(|e| MetricsError::Encode(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| MetricsError::Encode(e.to_string()))
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}
