use std::collections::BTreeMap;

use serde::Serialize;

/// Bucket bounds used when a histogram is created without custom buckets.
pub const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

impl MetricType {
    pub fn as_prometheus_type(&self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
        }
    }
}

/// Label set of a metric series.
///
/// Keys are kept sorted so two label sets built in different orders name the
/// same series and render identically on the wire. Inserting an existing key
/// replaces its value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Labels(BTreeMap<String, String>);

impl Labels {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for Labels
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut labels = Self::new();
        for (key, value) in iter {
            labels.insert(key, value);
        }
        labels
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Labels {
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs.into_iter().collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct HistogramOptions {
    pub buckets: Vec<f64>,
}

impl HistogramOptions {
    pub fn with_buckets(buckets: impl Into<Vec<f64>>) -> Self {
        Self {
            buckets: buckets.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramValue {
    pub buckets: Vec<f64>,
    pub count: u64,
    pub sum: f64,
    pub observations: Vec<f64>,
}

impl HistogramValue {
    pub fn new(buckets: Vec<f64>) -> Self {
        Self {
            buckets,
            count: 0,
            sum: 0.0,
            observations: Vec::new(),
        }
    }

    pub fn observe(&mut self, value: f64) {
        self.observations.push(value);
        self.count = self.count.saturating_add(1);
        self.sum += value;
    }

    /// Cumulative `(upper_bound, count)` pairs, ending with `+Inf`.
    pub fn cumulative_buckets(&self) -> Vec<(f64, u64)> {
        let mut cumulative = self
            .buckets
            .iter()
            .map(|bound| {
                let count = self
                    .observations
                    .iter()
                    .filter(|observation| **observation <= *bound)
                    .count() as u64;
                (*bound, count)
            })
            .collect::<Vec<_>>();
        cumulative.push((f64::INFINITY, self.count));
        cumulative
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricValue {
    Counter { value: f64 },
    Gauge { value: f64 },
    Histogram(HistogramValue),
}

impl MetricValue {
    pub fn metric_type(&self) -> MetricType {
        match self {
            Self::Counter { .. } => MetricType::Counter,
            Self::Gauge { .. } => MetricType::Gauge,
            Self::Histogram(_) => MetricType::Histogram,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub name: String,
    pub help: String,
    pub labels: Labels,
    #[serde(flatten)]
    pub value: MetricValue,
}

impl Metric {
    pub fn metric_type(&self) -> MetricType {
        self.value.metric_type()
    }

    /// Scalar value of a counter or gauge; `None` for histograms.
    pub fn scalar(&self) -> Option<f64> {
        match &self.value {
            MetricValue::Counter { value } | MetricValue::Gauge { value } => Some(*value),
            MetricValue::Histogram(_) => None,
        }
    }

    pub fn histogram(&self) -> Option<&HistogramValue> {
        match &self.value {
            MetricValue::Histogram(histogram) => Some(histogram),
            _ => None,
        }
    }
}
