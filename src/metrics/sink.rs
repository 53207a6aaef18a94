//! Telemetry sink seam: where samples and breadcrumbs go.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

/// One numeric sample with tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    pub tags: BTreeMap<String, String>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            tags: BTreeMap::new(),
        }
    }

    pub fn tag(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    /// `METRIC <name>{k=v,...} <value>`, tags sorted by key.
    pub fn line(&self) -> String {
        let tags = self
            .tags
            .iter()
            .map(|(k, v)| format!("{}={}", escape(k), escape(v)))
            .collect::<Vec<_>>()
            .join(",");
        format!("METRIC {}{{{}}} {}", self.name, tags, self.value)
    }
}

/// Keep the line format parseable: no separators inside keys or values.
fn escape(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            ',' | '=' | '{' | '}' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BreadcrumbLevel {
    Info,
    Warning,
    Error,
}

/// A breadcrumb-style event for tracing backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breadcrumb {
    pub category: String,
    pub message: String,
    pub level: BreadcrumbLevel,
    pub data: BTreeMap<String, String>,
}

/// Destination for telemetry. Implementations must not block.
pub trait TelemetrySink: Send + Sync {
    fn sample(&self, sample: &MetricSample);
    fn breadcrumb(&self, crumb: &Breadcrumb);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl TelemetrySink for NoopSink {
    fn sample(&self, _sample: &MetricSample) {}
    fn breadcrumb(&self, _crumb: &Breadcrumb) {}
}

/// Forwards breadcrumbs to `tracing`. Samples are already logged as
/// `METRIC` lines by the recorder, so they are not repeated here.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn sample(&self, _sample: &MetricSample) {}

    fn breadcrumb(&self, crumb: &Breadcrumb) {
        match crumb.level {
            BreadcrumbLevel::Info => debug!(
                target: "mail_ingest::telemetry",
                category = %crumb.category,
                data = ?crumb.data,
                "{}",
                crumb.message
            ),
            BreadcrumbLevel::Warning => warn!(
                target: "mail_ingest::telemetry",
                category = %crumb.category,
                data = ?crumb.data,
                "{}",
                crumb.message
            ),
            BreadcrumbLevel::Error => error!(
                target: "mail_ingest::telemetry",
                category = %crumb.category,
                data = ?crumb.data,
                "{}",
                crumb.message
            ),
        }
    }
}
