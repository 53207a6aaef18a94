//! Per-ingestion conversion summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::BodyEngine;
use crate::metrics::ErrorReason;

/// What happened to one attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttachmentOutcome {
    /// Original stored; no PDF derived.
    StoredOriginal,
    /// Original stored and a PDF derived from it.
    ConvertedToPdf,
    /// Not processed (or not storable), with a classified reason.
    Skipped { reason: ErrorReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedAttachment {
    pub filename: String,
    pub reason: ErrorReason,
}

/// Aggregate over one ingestion, recorded once all per-item work is done.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailConversionSummary {
    pub email_id: String,
    pub owner_id: String,
    pub body_engine: BodyEngine,
    pub body_converted: bool,
    pub attachments_total: usize,
    pub stored_original: usize,
    pub converted_to_pdf: usize,
    pub skipped: Vec<SkippedAttachment>,
    /// Wall-clock time for the whole ingestion.
    pub total_duration_ms: u64,
    /// Mean of the per-item (body + attachment) durations.
    pub average_duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

/// Accumulates per-item outcomes while an ingestion runs.
#[derive(Debug, Clone)]
pub struct SummaryBuilder {
    email_id: String,
    owner_id: String,
    body_engine: BodyEngine,
    body_converted: bool,
    stored_original: usize,
    converted_to_pdf: usize,
    skipped: Vec<SkippedAttachment>,
    item_durations: Vec<u64>,
}

impl SummaryBuilder {
    pub fn new(
        email_id: impl Into<String>,
        owner_id: impl Into<String>,
        body_engine: BodyEngine,
    ) -> Self {
        Self {
            email_id: email_id.into(),
            owner_id: owner_id.into(),
            body_engine,
            body_converted: false,
            stored_original: 0,
            converted_to_pdf: 0,
            skipped: Vec::new(),
            item_durations: Vec::new(),
        }
    }

    pub fn body(&mut self, converted: bool, duration_ms: u64) {
        self.body_converted = converted;
        self.item_durations.push(duration_ms);
    }

    pub fn attachment(&mut self, filename: &str, outcome: &AttachmentOutcome, duration_ms: u64) {
        match outcome {
            AttachmentOutcome::StoredOriginal => self.stored_original += 1,
            AttachmentOutcome::ConvertedToPdf => self.converted_to_pdf += 1,
            AttachmentOutcome::Skipped { reason } => self.skipped.push(SkippedAttachment {
                filename: filename.to_string(),
                reason: *reason,
            }),
        }
        self.item_durations.push(duration_ms);
    }

    pub fn finish(self, total_duration_ms: u64) -> EmailConversionSummary {
        let average_duration_ms = if self.item_durations.is_empty() {
            0
        } else {
            self.item_durations.iter().sum::<u64>() / self.item_durations.len() as u64
        };
        EmailConversionSummary {
            attachments_total: self.stored_original + self.converted_to_pdf + self.skipped.len(),
            email_id: self.email_id,
            owner_id: self.owner_id,
            body_engine: self.body_engine,
            body_converted: self.body_converted,
            stored_original: self.stored_original,
            converted_to_pdf: self.converted_to_pdf,
            skipped: self.skipped,
            total_duration_ms,
            average_duration_ms,
            recorded_at: Utc::now(),
        }
    }
}
