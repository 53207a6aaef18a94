//! Conversion orchestrator: one inbound email in, one report out.
//!
//! Flow per ingestion:
//! 1. Resolve the engine decision (once).
//! 2. Render the body through the chosen engine.
//! 3. Store every attachment original.
//! 4. Per stored attachment: skip, convert to PDF, and/or OCR.
//! 5. Record the email summary.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use chrono::{Local, Timelike};
use futures::future::join_all;
use tracing::{info, warn};

use crate::attachments::mime::{is_convertible, is_ocr_image, is_password_protected_pdf, is_pdf};
use crate::attachments::{
    AttachmentFile, AttachmentRecord, AttachmentStore, BODY_PDF_NAME, IngestionKey, ObjectStorage, StoreResult,
};
use crate::config::PipelineConfig;
use crate::engine::{EngineDecision, EngineDecisionResolver, FlagContext, FlagService};
use crate::error::{ConversionError, OcrError, Result};
use crate::metrics::{
    AttachmentOutcome, Classify, ConversionType, ErrorReason, MetricContext, MetricsRecorder, SummaryBuilder,
    TelemetrySink,
};
use crate::ocr::{CompressionLadder, OcrPrimitive, OcrRequest, OcrRetryEngine, QualityClass, TierPolicy};
use crate::pipeline::converter::ConverterSet;
use crate::pipeline::inbound::InboundEmail;
use crate::pipeline::types::{AttachmentReport, BodyReport, ConvertInput, IngestionReport};

/// Engine name used in metrics for original and derived-PDF storage.
pub const STORAGE_ENGINE: &str = "storage";

/// Engine name for attachments turned away before any conversion runs.
pub const SCREENING_ENGINE: &str = "screening";

/// External collaborators the orchestrator is built from.
pub struct Collaborators {
    pub flags: Arc<dyn FlagService>,
    pub converters: ConverterSet,
    pub storage: Arc<dyn ObjectStorage>,
    pub ocr: Arc<dyn OcrPrimitive>,
    pub telemetry: Arc<dyn TelemetrySink>,
}

pub struct ConversionOrchestrator {
    resolver: EngineDecisionResolver,
    converters: ConverterSet,
    store: AttachmentStore,
    ocr_engine: OcrRetryEngine,
    ocr: Arc<dyn OcrPrimitive>,
    tier_policy: TierPolicy,
    quality: QualityClass,
    ocr_capacity: usize,
    ocr_in_flight: AtomicUsize,
    metrics: Arc<MetricsRecorder>,
}

impl ConversionOrchestrator {
    pub fn new(config: &PipelineConfig, collaborators: Collaborators) -> Self {
        let metrics = Arc::new(MetricsRecorder::new(collaborators.telemetry, &config.metrics));
        Self {
            resolver: EngineDecisionResolver::new(
                collaborators.flags,
                config.overrides.clone(),
                config.services.flag_timeout,
            ),
            converters: collaborators.converters,
            store: AttachmentStore::new(
                collaborators.storage,
                config.storage.path_root.clone(),
                config.storage.max_attachment_bytes,
            ),
            ocr_engine: OcrRetryEngine::new(CompressionLadder::default(), config.ocr.clone())
                .with_metrics(Arc::clone(&metrics)),
            ocr: collaborators.ocr,
            tier_policy: config.ocr.tier_policy.clone(),
            quality: QualityClass::default(),
            ocr_capacity: config.ocr.capacity.max(1),
            ocr_in_flight: AtomicUsize::new(0),
            metrics,
        }
    }

    /// Quality class used for OCR tier selection.
    pub fn with_quality_class(mut self, quality: QualityClass) -> Self {
        self.quality = quality;
        self
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Process one inbound email.
    ///
    /// Only an unroutable email is an error. Everything after owner
    /// resolution is reported per item in the returned report.
    pub async fn ingest(&self, email: &InboundEmail, flag_context: &FlagContext) -> Result<IngestionReport> {
        let started = Instant::now();
        let owner_id = email.owner_id()?;
        let key = IngestionKey::new(owner_id.clone(), email.message_id.clone());

        let decision = self.resolver.decide(flag_context).await;
        let mut summary = SummaryBuilder::new(&email.message_id, &owner_id, decision.body_engine);

        let body = self.convert_body(email, &key, &decision).await;
        summary.body(body.pdf_path.is_some(), body.duration_ms);

        let stored = self.store.store_many(&key, &email.attachments).await;
        let attachments = join_all(
            email
                .attachments
                .iter()
                .zip(stored)
                .map(|(file, result)| self.process_attachment(email, &key, &decision, file, result)),
        )
        .await;
        for report in &attachments {
            summary.attachment(&report.filename, &report.outcome, report.duration_ms);
        }

        let summary = summary.finish(started.elapsed().as_millis() as u64);
        self.metrics.record_email_summary(summary.clone());

        info!(
            email_id = %email.message_id,
            owner_id = %owner_id,
            body_engine = %decision.body_engine,
            attachments = attachments.len(),
            converted = summary.converted_to_pdf,
            skipped = summary.skipped.len(),
            duration_ms = summary.total_duration_ms,
            "Ingestion complete"
        );

        Ok(IngestionReport {
            email_id: email.message_id.clone(),
            owner_id,
            decision,
            body,
            attachments,
            summary,
        })
    }

    async fn convert_body(&self, email: &InboundEmail, key: &IngestionKey, decision: &EngineDecision) -> BodyReport {
        let engine = decision.body_engine;
        let mut report = BodyReport {
            engine,
            pdf_path: None,
            error: None,
            duration_ms: 0,
        };
        if !email.has_body() {
            return report;
        }

        let input = match (&email.html_body, &email.text_body) {
            (Some(html), _) if !html.trim().is_empty() => ConvertInput::body_html(html.clone()),
            (_, Some(text)) => ConvertInput::body_text(text, email.subject.as_deref()),
            _ => return report,
        };
        let ctx = MetricContext::for_email(&email.message_id).with_file(BODY_PDF_NAME, input.len() as u64);

        let started = Instant::now();
        let converted = self
            .metrics
            .measure_conversion(engine.as_str(), ConversionType::Body, &ctx, || async {
                match self.converters.get(engine) {
                    Ok(converter) => converter.convert(&input).await,
                    Err(e) => Err(e),
                }
            })
            .await;
        report.duration_ms = started.elapsed().as_millis() as u64;

        match converted {
            Ok(doc) => match self.store.store_body_pdf(key, &doc.pdf).await {
                Ok(record) => report.pdf_path = Some(record.storage_path),
                Err(failure) => {
                    self.metrics
                        .record_error(STORAGE_ENGINE, ConversionType::Body, failure.reason, &ctx);
                    report.error = Some(failure.error);
                }
            },
            Err(e) => {
                warn!(email_id = %email.message_id, engine = %engine, error = %e, "Body conversion failed");
                report.error = Some(e.to_string());
            }
        }
        report
    }

    async fn process_attachment(
        &self,
        email: &InboundEmail,
        key: &IngestionKey,
        decision: &EngineDecision,
        file: &AttachmentFile,
        stored: StoreResult,
    ) -> AttachmentReport {
        let started = Instant::now();
        let ctx = MetricContext::for_email(&email.message_id).with_file(&file.filename, file.bytes.len() as u64);

        let mut report = AttachmentReport {
            filename: file.filename.clone(),
            outcome: AttachmentOutcome::StoredOriginal,
            record: None,
            failure: None,
            pdf_path: None,
            ocr_text: None,
            ocr_strategy: None,
            ocr_attempts: None,
            ocr_error: None,
            conversion_error: None,
            duration_ms: 0,
        };

        let record = match stored {
            Ok(record) => {
                self.metrics
                    .record_success(STORAGE_ENGINE, ConversionType::Attachment, &ctx);
                record
            }
            Err(failure) => {
                self.metrics
                    .record_error(STORAGE_ENGINE, ConversionType::Attachment, failure.reason, &ctx);
                report.outcome = AttachmentOutcome::Skipped { reason: failure.reason };
                report.failure = Some(failure);
                report.duration_ms = started.elapsed().as_millis() as u64;
                return report;
            }
        };

        let content_type = record.content_type.as_str();
        let pdf = is_pdf(content_type);

        if pdf && is_password_protected_pdf(&file.bytes) {
            let reason = ErrorReason::SkippedPasswordProtected;
            self.metrics
                .record_error(SCREENING_ENGINE, ConversionType::Attachment, reason, &ctx);
            report.outcome = AttachmentOutcome::Skipped { reason };
        } else {
            if decision.convert_attachments && !pdf {
                self.convert_attachment(key, decision, file, &record, &ctx, &mut report)
                    .await;
            }
            if pdf || is_ocr_image(content_type) {
                self.run_ocr(key, file, &record, &mut report).await;
            }
        }

        report.record = Some(record);
        report.duration_ms = started.elapsed().as_millis() as u64;
        report
    }

    async fn convert_attachment(
        &self,
        key: &IngestionKey,
        decision: &EngineDecision,
        file: &AttachmentFile,
        record: &AttachmentRecord,
        ctx: &MetricContext,
        report: &mut AttachmentReport,
    ) {
        let engine = decision.body_engine;
        if !is_convertible(&record.content_type) {
            let reason = ErrorReason::SkippedUnsupported;
            self.metrics
                .record_error(engine.as_str(), ConversionType::Attachment, reason, ctx);
            report.outcome = AttachmentOutcome::Skipped { reason };
            return;
        }

        let input = ConvertInput::attachment(&record.sanitized_name, file.bytes.clone(), &record.content_type);
        let converted = self
            .metrics
            .measure_conversion(engine.as_str(), ConversionType::Attachment, ctx, || async {
                match self.converters.get(engine) {
                    Ok(converter) => converter.convert(&input).await,
                    Err(e) => Err(e),
                }
            })
            .await;

        let doc = match converted {
            Ok(doc) => doc,
            Err(e) => {
                self.note_conversion_failure(&e, report);
                return;
            }
        };
        match self
            .store
            .store_converted(key, &doc.pdf, &record.sanitized_name)
            .await
        {
            Ok(pdf_record) => {
                report.outcome = AttachmentOutcome::ConvertedToPdf;
                report.pdf_path = Some(pdf_record.storage_path);
            }
            Err(failure) => {
                warn!(
                    filename = %report.filename,
                    reason = %failure.reason,
                    error = %failure.error,
                    "Converted PDF store failed"
                );
                self.metrics
                    .record_error(STORAGE_ENGINE, ConversionType::Attachment, failure.reason, ctx);
                report.conversion_error = Some(failure.error);
            }
        }
    }

    /// A skip-class failure marks the attachment skipped; anything else
    /// leaves it as a stored original with the error noted.
    fn note_conversion_failure(&self, err: &ConversionError, report: &mut AttachmentReport) {
        let reason = err.error_reason();
        warn!(filename = %report.filename, reason = %reason, error = %err, "Attachment conversion failed");
        if reason.is_skip() {
            report.outcome = AttachmentOutcome::Skipped { reason };
        }
        report.conversion_error = Some(err.to_string());
    }

    async fn run_ocr(
        &self,
        key: &IngestionKey,
        file: &AttachmentFile,
        record: &AttachmentRecord,
        report: &mut AttachmentReport,
    ) {
        let _slot = OcrSlot::acquire(&self.ocr_in_flight);
        let load = self.ocr_in_flight.load(Ordering::SeqCst) as f64 / self.ocr_capacity as f64;
        let tier = self
            .tier_policy
            .select(record.size_bytes, self.quality, Local::now().hour(), load);

        let request = OcrRequest::new(
            format!("{}/{}", key.ingestion_id, record.sanitized_name),
            key.owner_id.clone(),
            record.content_type.clone(),
            file.bytes.clone(),
            tier,
        );
        match self.ocr_engine.run(&request, self.ocr.as_ref()).await {
            Ok(success) => {
                report.ocr_attempts = Some(success.attempts);
                report.ocr_strategy = Some(success.strategy);
                report.ocr_text = Some(success.text);
            }
            Err(e) => {
                if let OcrError::Exhausted { attempts, .. } = &e {
                    report.ocr_attempts = Some(*attempts);
                }
                report.ocr_error = Some(e.to_string());
            }
        }
    }
}

/// Counts one in-flight OCR run for as long as it lives.
struct OcrSlot<'a>(&'a AtomicUsize);

impl<'a> OcrSlot<'a> {
    fn acquire(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for OcrSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
