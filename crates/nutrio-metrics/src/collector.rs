use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use nutrio_common::error::{NutrioError, Result};

use crate::{
    exposition::render_exposition,
    types::{
        DEFAULT_BUCKETS, HistogramOptions, HistogramValue, Labels, Metric, MetricType,
        MetricValue,
    },
};

type SeriesKey = (String, Labels);

/// In-process store of named, labeled metrics.
///
/// Series are created lazily on first write and live until [`clear`](Self::clear).
/// Each series has its own lock, so read-modify-write on one key is atomic
/// while writes to unrelated keys do not contend beyond the map lookup.
pub struct MetricsCollector {
    series: RwLock<HashMap<SeriesKey, Arc<Mutex<Metric>>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Adds `delta` to the counter at `(name, labels)`.
    ///
    /// Counters never decrease: a negative or non-finite delta is rejected.
    pub fn counter(&self, name: &str, help: &str, labels: &Labels, delta: f64) -> Result<()> {
        if !delta.is_finite() || delta < 0.0 {
            return Err(NutrioError::InvalidArgument(format!(
                "counter {name} cannot be incremented by {delta}"
            )));
        }

        self.update(
            name,
            help,
            labels,
            MetricType::Counter,
            || MetricValue::Counter { value: 0.0 },
            |value| {
                if let MetricValue::Counter { value } = value {
                    *value += delta;
                }
            },
        )
    }

    pub fn counter_inc(&self, name: &str, help: &str, labels: &Labels) -> Result<()> {
        self.counter(name, help, labels, 1.0)
    }

    pub fn gauge(&self, name: &str, help: &str, value: f64, labels: &Labels) -> Result<()> {
        ensure_finite(name, value)?;
        self.update(
            name,
            help,
            labels,
            MetricType::Gauge,
            || MetricValue::Gauge { value: 0.0 },
            |current| {
                if let MetricValue::Gauge { value: stored } = current {
                    *stored = value;
                }
            },
        )
    }

    pub fn gauge_inc(&self, name: &str, help: &str, labels: &Labels, delta: f64) -> Result<()> {
        ensure_finite(name, delta)?;
        self.update(
            name,
            help,
            labels,
            MetricType::Gauge,
            || MetricValue::Gauge { value: 0.0 },
            |current| {
                if let MetricValue::Gauge { value } = current {
                    *value += delta;
                }
            },
        )
    }

    pub fn gauge_dec(&self, name: &str, help: &str, labels: &Labels, delta: f64) -> Result<()> {
        self.gauge_inc(name, help, labels, -delta)
    }

    /// Records one observation.
    ///
    /// Bucket bounds come from `options` on the call that creates the series
    /// and are ignored afterwards.
    pub fn histogram(
        &self,
        name: &str,
        help: &str,
        observation: f64,
        labels: &Labels,
        options: Option<&HistogramOptions>,
    ) -> Result<()> {
        ensure_finite(name, observation)?;
        let buckets = match options {
            Some(options) if !options.buckets.is_empty() => normalize_buckets(name, &options.buckets)?,
            _ => DEFAULT_BUCKETS.to_vec(),
        };

        self.update(
            name,
            help,
            labels,
            MetricType::Histogram,
            move || MetricValue::Histogram(HistogramValue::new(buckets)),
            |value| {
                if let MetricValue::Histogram(histogram) = value {
                    histogram.observe(observation);
                }
            },
        )
    }

    /// Snapshot of every series, sorted by name then labels.
    pub fn get_all_metrics(&self) -> Vec<Metric> {
        let series = match self.series.read() {
            Ok(guard) => guard,
            Err(_) => return Vec::new(),
        };

        let mut snapshot = series
            .values()
            .filter_map(|entry| entry.lock().ok().map(|metric| metric.clone()))
            .collect::<Vec<_>>();
        drop(series);

        snapshot.sort_by(|left, right| {
            left.name
                .cmp(&right.name)
                .then_with(|| left.labels.cmp(&right.labels))
        });
        snapshot
    }

    pub fn get_metrics_by_name(&self, name: &str) -> Vec<Metric> {
        self.get_all_metrics()
            .into_iter()
            .filter(|metric| metric.name == name)
            .collect()
    }

    /// Text exposition of the current snapshot, for scrape endpoints.
    pub fn render_prometheus(&self) -> String {
        render_exposition(&self.get_all_metrics())
    }

    pub fn clear(&self) {
        if let Ok(mut series) = self.series.write() {
            series.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.series.read().map(|series| series.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update<I, F>(
        &self,
        name: &str,
        help: &str,
        labels: &Labels,
        kind: MetricType,
        init: I,
        apply: F,
    ) -> Result<()>
    where
        I: FnOnce() -> MetricValue,
        F: FnOnce(&mut MetricValue),
    {
        validate_metric_name(name)?;
        for key in labels.keys() {
            validate_label_name(key)?;
        }

        let entry = self.get_or_create_series(name, help, labels, init)?;
        let mut metric = entry.lock().map_err(|_| {
            NutrioError::InternalError(format!("metric series lock poisoned: {name}"))
        })?;

        let existing = metric.metric_type();
        if existing != kind {
            return Err(NutrioError::MetricTypeMismatch {
                name: name.to_string(),
                existing: existing.as_prometheus_type(),
                requested: kind.as_prometheus_type(),
            });
        }

        apply(&mut metric.value);
        Ok(())
    }

    fn get_or_create_series<I>(
        &self,
        name: &str,
        help: &str,
        labels: &Labels,
        init: I,
    ) -> Result<Arc<Mutex<Metric>>>
    where
        I: FnOnce() -> MetricValue,
    {
        let key = (name.to_string(), labels.clone());
        if let Ok(guard) = self.series.read()
            && let Some(existing) = guard.get(&key)
        {
            return Ok(existing.clone());
        }

        let mut series = self.series.write().map_err(|_| {
            NutrioError::InternalError("failed to acquire metrics collector lock".to_string())
        })?;
        Ok(series
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Mutex::new(Metric {
                    name: name.to_string(),
                    help: help.to_string(),
                    labels: labels.clone(),
                    value: init(),
                }))
            })
            .clone())
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_finite(name: &str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(NutrioError::InvalidArgument(format!(
            "metric {name} received non-finite value {value}"
        )))
    }
}

fn normalize_buckets(name: &str, buckets: &[f64]) -> Result<Vec<f64>> {
    if buckets.iter().any(|bound| !bound.is_finite()) {
        return Err(NutrioError::InvalidArgument(format!(
            "histogram {name} has a non-finite bucket bound"
        )));
    }

    let mut sorted = buckets.to_vec();
    sorted.sort_by(|left, right| left.total_cmp(right));
    sorted.dedup();
    Ok(sorted)
}

fn validate_metric_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_' || first == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');

    if valid {
        Ok(())
    } else {
        Err(NutrioError::InvalidArgument(format!(
            "invalid metric name: {name:?}"
        )))
    }
}

fn validate_label_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(NutrioError::InvalidArgument(format!(
            "invalid label name: {name:?}"
        )))
    }
}
