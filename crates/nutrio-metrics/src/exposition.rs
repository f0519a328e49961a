//! Prometheus text rendering.
//!
//! [`render_push_body`] produces the bare sample lines sent to the
//! Pushgateway; [`render_exposition`] adds `# HELP` and `# TYPE` headers for
//! the scrape endpoint.

use crate::types::{Metric, MetricValue};

pub fn render_push_body(metrics: &[Metric]) -> String {
    let mut output = String::new();
    for metric in metrics {
        render_samples(&mut output, metric);
    }
    output
}

pub fn render_exposition(metrics: &[Metric]) -> String {
    let mut output = String::new();
    let mut previous: Option<&str> = None;

    for metric in metrics {
        if previous != Some(metric.name.as_str()) {
            output.push_str("# HELP ");
            output.push_str(&metric.name);
            output.push(' ');
            output.push_str(&escape_help(&metric.help));
            output.push('\n');

            output.push_str("# TYPE ");
            output.push_str(&metric.name);
            output.push(' ');
            output.push_str(metric.metric_type().as_prometheus_type());
            output.push('\n');
            previous = Some(metric.name.as_str());
        }

        render_samples(&mut output, metric);
    }

    output
}

fn render_samples(output: &mut String, metric: &Metric) {
    let labels = metric
        .labels
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect::<Vec<_>>();

    match &metric.value {
        MetricValue::Counter { value } | MetricValue::Gauge { value } => {
            output.push_str(&render_sample_line(&metric.name, &labels, *value));
        }
        MetricValue::Histogram(histogram) => {
            for (bound, cumulative) in histogram.cumulative_buckets() {
                let mut bucket_labels = labels.clone();
                bucket_labels.push(("le".to_string(), format_bucket_bound(bound)));
                output.push_str(&render_sample_line(
                    &format!("{}_bucket", metric.name),
                    &bucket_labels,
                    cumulative as f64,
                ));
            }

            output.push_str(&render_sample_line(
                &format!("{}_sum", metric.name),
                &labels,
                histogram.sum,
            ));
            output.push_str(&render_sample_line(
                &format!("{}_count", metric.name),
                &labels,
                histogram.count as f64,
            ));
        }
    }
}

/// Renders one `name{k="v",...} value` line. Braces are omitted when there
/// are no labels.
fn render_sample_line(name: &str, labels: &[(String, String)], value: f64) -> String {
    let mut rendered = String::new();
    rendered.push_str(name);

    if !labels.is_empty() {
        rendered.push('{');
        for (index, (key, value)) in labels.iter().enumerate() {
            if index > 0 {
                rendered.push(',');
            }
            rendered.push_str(key);
            rendered.push_str("=\"");
            rendered.push_str(&escape_label_value(value));
            rendered.push('"');
        }
        rendered.push('}');
    }

    rendered.push(' ');
    rendered.push_str(&format_metric_value(value));
    rendered.push('\n');
    rendered
}

fn format_metric_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf" } else { "-Inf" }.to_string()
    } else if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

fn format_bucket_bound(value: f64) -> String {
    if value.is_infinite() {
        "+Inf".to_string()
    } else {
        value.to_string()
    }
}

fn escape_help(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('"', "\\\"")
}
