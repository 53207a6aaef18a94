//! Conversion metrics and telemetry.
//!
//! The [`MetricsRecorder`] owns bounded in-process stores and fans every
//! record out to a `METRIC` log line and an injected [`TelemetrySink`].

pub mod recorder;
pub mod sink;
pub mod stats;
pub mod summary;
pub mod taxonomy;

pub use recorder::{ConversionMetric, ConversionType, MetricContext, MetricKind, MetricsRecorder};
pub use sink::{Breadcrumb, BreadcrumbLevel, MetricSample, NoopSink, TelemetrySink, TracingSink};
pub use stats::PerformanceStats;
pub use summary::{AttachmentOutcome, EmailConversionSummary, SkippedAttachment, SummaryBuilder};
pub use taxonomy::{Classify, ErrorReason};
