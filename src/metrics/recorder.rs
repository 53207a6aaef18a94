//! In-process metrics recorder.
//!
//! Every recording call appends one entry to a bounded store, logs one
//! `METRIC ...` line, and hands one sample plus one breadcrumb to the
//! injected [`TelemetrySink`].

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::MetricsConfig;
use crate::metrics::{Classify, ErrorReason};
use crate::metrics::sink::{Breadcrumb, BreadcrumbLevel, MetricSample, TelemetrySink};
use crate::metrics::stats::PerformanceStats;
use crate::metrics::summary::EmailConversionSummary;

/// Whether a conversion concerns the email body or an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionType {
    Body,
    Attachment,
}

impl ConversionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Body => "body",
            Self::Attachment => "attachment",
        }
    }
}

impl fmt::Display for ConversionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Duration,
    Success,
    Error,
    Retry,
}

/// Caller-supplied context attached to a metric.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricContext {
    pub email_id: Option<String>,
    pub owner_id: Option<String>,
    pub filename: Option<String>,
    pub file_size: Option<u64>,
}

impl MetricContext {
    pub fn for_email(email_id: impl Into<String>) -> Self {
        Self {
            email_id: Some(email_id.into()),
            ..Default::default()
        }
    }

    pub fn with_file(mut self, filename: impl Into<String>, size: u64) -> Self {
        self.filename = Some(filename.into());
        self.file_size = Some(size);
        self
    }
}

/// One recorded metric entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionMetric {
    pub recorded_at: DateTime<Utc>,
    pub kind: MetricKind,
    pub engine: String,
    pub conversion_type: ConversionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_id: Option<String>,
}

impl ConversionMetric {
    fn new(kind: MetricKind, engine: &str, conversion_type: ConversionType, ctx: &MetricContext) -> Self {
        Self {
            recorded_at: Utc::now(),
            kind,
            engine: engine.to_string(),
            conversion_type,
            duration_ms: None,
            success: None,
            error_reason: None,
            file_size: ctx.file_size,
            retry_count: None,
            email_id: ctx.email_id.clone(),
        }
    }

    fn sample(&self) -> MetricSample {
        let (name, value) = match self.kind {
            MetricKind::Duration => ("conversion.duration_ms", self.duration_ms.unwrap_or(0) as f64),
            MetricKind::Retry => ("conversion.retry", self.retry_count.unwrap_or(0) as f64),
            // An outcome carrying its duration is reported as a duration
            // sample tagged with the outcome.
            MetricKind::Success | MetricKind::Error => match self.duration_ms {
                Some(ms) => ("conversion.duration_ms", ms as f64),
                None if self.kind == MetricKind::Success => ("conversion.success", 1.0),
                None => ("conversion.error", 1.0),
            },
        };

        let mut sample = MetricSample::new(name, value)
            .tag("engine", &self.engine)
            .tag("type", self.conversion_type);
        match self.kind {
            MetricKind::Success if self.duration_ms.is_some() => sample = sample.tag("outcome", "success"),
            MetricKind::Error if self.duration_ms.is_some() => sample = sample.tag("outcome", "error"),
            _ => {}
        }
        if let Some(reason) = self.error_reason {
            sample = sample.tag("reason", reason);
        }
        if let Some(email_id) = &self.email_id {
            sample = sample.tag("email_id", email_id);
        }
        sample
    }

    fn breadcrumb(&self) -> Breadcrumb {
        let level = match self.kind {
            MetricKind::Error => BreadcrumbLevel::Error,
            MetricKind::Retry => BreadcrumbLevel::Warning,
            _ => BreadcrumbLevel::Info,
        };
        let mut data = BTreeMap::new();
        data.insert("engine".to_string(), self.engine.clone());
        data.insert("type".to_string(), self.conversion_type.to_string());
        if let Some(ms) = self.duration_ms {
            data.insert("duration_ms".to_string(), ms.to_string());
        }
        if let Some(reason) = self.error_reason {
            data.insert("reason".to_string(), reason.to_string());
        }
        if let Some(count) = self.retry_count {
            data.insert("retry_count".to_string(), count.to_string());
        }
        if let Some(size) = self.file_size {
            data.insert("file_size".to_string(), size.to_string());
        }
        Breadcrumb {
            category: "conversion".to_string(),
            message: format!("{} {} {:?}", self.engine, self.conversion_type, self.kind).to_lowercase(),
            level,
            data,
        }
    }
}

/// Bounded, append-only metrics store with telemetry fan-out.
pub struct MetricsRecorder {
    metrics: Mutex<VecDeque<ConversionMetric>>,
    summaries: Mutex<VecDeque<EmailConversionSummary>>,
    sink: Arc<dyn TelemetrySink>,
    max_metrics: usize,
    max_summaries: usize,
}

impl MetricsRecorder {
    pub fn new(sink: Arc<dyn TelemetrySink>, config: &MetricsConfig) -> Self {
        Self {
            metrics: Mutex::new(VecDeque::new()),
            summaries: Mutex::new(VecDeque::new()),
            sink,
            max_metrics: config.max_metrics.max(1),
            max_summaries: config.max_summaries.max(1),
        }
    }

    pub fn record_duration(&self, ms: u64, engine: &str, conversion_type: ConversionType, ctx: &MetricContext) {
        let mut metric = ConversionMetric::new(MetricKind::Duration, engine, conversion_type, ctx);
        metric.duration_ms = Some(ms);
        self.push(metric);
    }

    pub fn record_success(&self, engine: &str, conversion_type: ConversionType, ctx: &MetricContext) {
        self.record_outcome(engine, conversion_type, None, None, ctx);
    }

    pub fn record_error(
        &self,
        engine: &str,
        conversion_type: ConversionType,
        reason: ErrorReason,
        ctx: &MetricContext,
    ) {
        self.record_outcome(engine, conversion_type, Some(reason), None, ctx);
    }

    pub fn record_retry(&self, engine: &str, conversion_type: ConversionType, count: u32, ctx: &MetricContext) {
        let mut metric = ConversionMetric::new(MetricKind::Retry, engine, conversion_type, ctx);
        metric.retry_count = Some(count);
        self.push(metric);
    }

    /// Time `operation`, record exactly one success or error entry, and
    /// return the operation's result untouched.
    pub async fn measure_conversion<T, E, F, Fut>(
        &self,
        engine: &str,
        conversion_type: ConversionType,
        ctx: &MetricContext,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let started = Instant::now();
        let result = operation().await;
        let elapsed = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => self.record_outcome(engine, conversion_type, None, Some(elapsed), ctx),
            Err(e) => self.record_outcome(
                engine,
                conversion_type,
                Some(e.error_reason()),
                Some(elapsed),
                ctx,
            ),
        }
        result
    }

    /// Record the one aggregate for a finished ingestion.
    pub fn record_email_summary(&self, summary: EmailConversionSummary) {
        let sample = MetricSample::new("email.conversion_ms", summary.total_duration_ms as f64)
            .tag("email_id", &summary.email_id)
            .tag("body_engine", summary.body_engine)
            .tag("stored", summary.stored_original)
            .tag("converted", summary.converted_to_pdf)
            .tag("skipped", summary.skipped.len());
        info!(target: "mail_ingest::metrics", "{}", sample.line());
        self.sink.sample(&sample);

        let mut data = BTreeMap::new();
        data.insert("attachments".to_string(), summary.attachments_total.to_string());
        data.insert("average_ms".to_string(), summary.average_duration_ms.to_string());
        self.sink.breadcrumb(&Breadcrumb {
            category: "email".to_string(),
            message: format!("email {} converted", summary.email_id),
            level: BreadcrumbLevel::Info,
            data,
        });

        let mut summaries = lock(&self.summaries);
        summaries.push_back(summary);
        while summaries.len() > self.max_summaries {
            summaries.pop_front();
        }
    }

    pub fn performance_stats(&self) -> PerformanceStats {
        let snapshot: Vec<ConversionMetric> = lock(&self.metrics).iter().cloned().collect();
        PerformanceStats::compute(&snapshot)
    }

    /// Snapshot of retained metrics, oldest first.
    pub fn metrics(&self) -> Vec<ConversionMetric> {
        lock(&self.metrics).iter().cloned().collect()
    }

    /// Snapshot of retained summaries, oldest first.
    pub fn summaries(&self) -> Vec<EmailConversionSummary> {
        lock(&self.summaries).iter().cloned().collect()
    }

    fn record_outcome(
        &self,
        engine: &str,
        conversion_type: ConversionType,
        error: Option<ErrorReason>,
        duration_ms: Option<u64>,
        ctx: &MetricContext,
    ) {
        let kind = if error.is_some() {
            MetricKind::Error
        } else {
            MetricKind::Success
        };
        let mut metric = ConversionMetric::new(kind, engine, conversion_type, ctx);
        metric.success = Some(error.is_none());
        metric.error_reason = error;
        metric.duration_ms = duration_ms;
        self.push(metric);
    }

    fn push(&self, metric: ConversionMetric) {
        let sample = metric.sample();
        info!(target: "mail_ingest::metrics", "{}", sample.line());
        self.sink.sample(&sample);
        self.sink.breadcrumb(&metric.breadcrumb());

        let mut metrics = lock(&self.metrics);
        metrics.push_back(metric);
        while metrics.len() > self.max_metrics {
            metrics.pop_front();
        }
    }
}

/// A panic while holding the lock cannot leave a half-written entry, so a
/// poisoned lock is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
