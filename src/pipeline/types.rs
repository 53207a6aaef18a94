//! Shared types for the ingestion pipeline.

use serde::{Deserialize, Serialize};

use crate::attachments::{AttachmentRecord, StoreFailure};
use crate::engine::{BodyEngine, EngineDecision};
use crate::metrics::{AttachmentOutcome, ConversionType, EmailConversionSummary};

// ── Conversion input/output ─────────────────────────────────────────

/// What gets handed to a conversion engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvertContent {
    Html(String),
    Bytes(Vec<u8>),
}

/// One conversion job. Built per ingestion, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertInput {
    pub kind: ConversionType,
    pub content: ConvertContent,
    pub mime_type: String,
    /// Name used for the upload part.
    pub filename: String,
}

impl ConvertInput {
    pub fn body_html(html: impl Into<String>) -> Self {
        Self {
            kind: ConversionType::Body,
            content: ConvertContent::Html(html.into()),
            mime_type: "text/html".to_string(),
            filename: "body.html".to_string(),
        }
    }

    /// Plain text wrapped in a minimal HTML document.
    pub fn body_text(text: &str, title: Option<&str>) -> Self {
        let title = escape_html(title.unwrap_or("Email"));
        let html = format!(
            "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
             <body><pre style=\"white-space: pre-wrap; font-family: sans-serif\">{}</pre></body></html>",
            escape_html(text)
        );
        Self::body_html(html)
    }

    pub fn attachment(filename: impl Into<String>, bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            kind: ConversionType::Attachment,
            content: ConvertContent::Bytes(bytes),
            mime_type: mime_type.into(),
            filename: filename.into(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.content {
            ConvertContent::Html(html) => html.len(),
            ConvertContent::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self.content {
            ConvertContent::Html(html) => html.into_bytes(),
            ConvertContent::Bytes(bytes) => bytes,
        }
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// A PDF produced by one of the engines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertedDocument {
    pub engine: BodyEngine,
    pub pdf: Vec<u8>,
}

// ── Report ──────────────────────────────────────────────────────────

/// Body conversion result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyReport {
    pub engine: BodyEngine,
    /// Where the rendered PDF was stored, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Everything that happened to one attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentReport {
    pub filename: String,
    #[serde(flatten)]
    pub outcome: AttachmentOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<AttachmentRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StoreFailure>,
    /// Stored path of the derived PDF, when one was produced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,
    /// OCR text, when OCR ran and succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversion_error: Option<String>,
    pub duration_ms: u64,
}

/// Result of one ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub email_id: String,
    pub owner_id: String,
    pub decision: EngineDecision,
    pub body: BodyReport,
    pub attachments: Vec<AttachmentReport>,
    pub summary: EmailConversionSummary,
}
