//! Per-metric construction options.

use std::collections::BTreeMap;

/// Option attached to a single metric at creation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricOption {
    /// Static labels merged into every series of the metric.
    Labels(BTreeMap<String, String>),
}

/// Attach static labels to a metric.
pub fn metric_labels<I, K, V>(labels: I) -> MetricOption
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    MetricOption::Labels(
        labels
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
    )
}

/// Merge all static labels from `opts`; later options override earlier ones.
pub fn const_labels(opts: &[MetricOption]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for opt in opts {
        match opt {
            MetricOption::Labels(labels) => {
                out.extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())))
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_labels_override() {
        let opts = [
            metric_labels([("a", "1"), ("b", "2")]),
            metric_labels([("b", "3")]),
        ];
        let merged = const_labels(&opts);
        assert_eq!(merged.get("a").map(String::as_str), Some("1"));
        assert_eq!(merged.get("b").map(String::as_str), Some("3"));
    }
}
