//! Metric identity keys.
//!
//! A [`MetricKey`] is the canonical form of `(name, label names, static
//! labels)`. Label names and static labels are sorted, so two declarations
//! that differ only in ordering produce the same key. All names are validated
//! against the exposition identifier grammar before a key is produced.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{MetricsError, Result};

/// Canonical, order-independent identity of one metric family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    name: String,
    label_names: Vec<String>,
    const_labels: Vec<(String, String)>,
}

impl MetricKey {
    /// Build a key, validating every name involved.
    pub fn new(
        name: &str,
        label_names: &[&str],
        const_labels: &BTreeMap<String, String>,
    ) -> Result<Self> {
        validate_metric_name(name)?;

        let mut names: Vec<String> = Vec::with_capacity(label_names.len());
        for l in label_names {
            validate_label_name(l)?;
            names.push(l.to_string());
        }
        names.sort();
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(MetricsError::DuplicateLabelName(w[0].clone()));
        }

        for k in const_labels.keys() {
            validate_label_name(k)?;
            if names.binary_search(k).is_ok() {
                return Err(MetricsError::DuplicateLabelName(k.clone()));
            }
        }

        Ok(Self {
            name: name.to_string(),
            label_names: names,
            const_labels: const_labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    /// Key for a fixed, crate-owned identity that carries no labels.
    pub fn fixed(name: &str) -> Result<Self> {
        Self::new(name, &[], &BTreeMap::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Variable label names, sorted.
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Static labels, sorted by name.
    pub fn const_labels(&self) -> &[(String, String)] {
        &self.const_labels
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.label_names.join(","))?;
        if !self.const_labels.is_empty() {
            let pairs = self
                .const_labels
                .iter()
                .map(|(k, v)| format!("{k}={v:?}"))
                .collect::<Vec<_>>()
                .join(",");
            write!(f, "{{{pairs}}}")?;
        }
        Ok(())
    }
}

/// Metric names: `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn validate_metric_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(MetricsError::InvalidName(name.to_string()))
    }
}

/// Label names: `[a-zA-Z_][a-zA-Z0-9_]*`, and the `__` prefix is reserved.
pub fn validate_label_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if !ok || name.starts_with("__") {
        return Err(MetricsError::InvalidLabelName(name.to_string()));
    }
    Ok(())
}

/// Bucket boundaries must be strictly increasing and not NaN.
/// An empty slice is accepted and means "use the default buckets".
pub fn validate_buckets(buckets: &[f64]) -> Result<()> {
    if let Some(b) = buckets.iter().find(|b| b.is_nan()) {
        return Err(MetricsError::InvalidBuckets(format!("boundary {b} is not a number")));
    }
    if let Some(w) = buckets.windows(2).find(|w| w[0] >= w[1]) {
        return Err(MetricsError::InvalidBuckets(format!(
            "boundaries must be strictly increasing ({} >= {})",
            w[0], w[1]
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::error::ErrorKind;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn label_order_does_not_change_key() {
        let a = MetricKey::new("requests_total", &["status", "app"], &BTreeMap::new()).unwrap();
        let b = MetricKey::new("requests_total", &["app", "status"], &BTreeMap::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.label_names(), ["app", "status"]);
    }

    #[test]
    fn label_schema_is_part_of_identity() {
        let a = MetricKey::new("requests_total", &["status"], &BTreeMap::new()).unwrap();
        let b = MetricKey::new("requests_total", &["status", "app"], &BTreeMap::new()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn static_labels_distinguish_series() {
        let a = MetricKey::new("up", &[], &labels(&[("job", "a")])).unwrap();
        let b = MetricKey::new("up", &[], &labels(&[("job", "b")])).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), "up[]{job=\"a\"}");
    }

    #[test]
    fn rejects_hyphenated_names() {
        let err = MetricKey::fixed("test-counter").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidName);
        assert!(validate_metric_name("9lives").is_err());
        assert!(validate_metric_name("").is_err());
        assert!(validate_metric_name("job:rate5m").is_ok());
    }

    #[test]
    fn rejects_bad_label_names() {
        let err = MetricKey::new("x", &["bad-label"], &BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidLabelName);
        assert!(validate_label_name("__reserved").is_err());
        assert!(validate_label_name("a:b").is_err());
        assert!(validate_label_name("_ok1").is_ok());
    }

    #[test]
    fn rejects_duplicate_label_names() {
        let err = MetricKey::new("x", &["a", "a"], &BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateLabelName);

        let err = MetricKey::new("x", &["a"], &labels(&[("a", "1")])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateLabelName);
    }

    #[test]
    fn bucket_rules() {
        assert!(validate_buckets(&[]).is_ok());
        assert!(validate_buckets(&[0.1, 1.0, f64::INFINITY]).is_ok());
        assert!(validate_buckets(&[1.0, 1.0]).is_err());
        assert!(validate_buckets(&[2.0, 1.0]).is_err());
        assert!(validate_buckets(&[f64::NAN]).is_err());
    }
}
