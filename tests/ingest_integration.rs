//! End-to-end tests for the ingestion pipeline.
//!
//! Each test builds a `ConversionOrchestrator` over local filesystem storage
//! in a temp dir, with stub converters, OCR and flag services (no network).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use mail_ingest::Error;
use mail_ingest::attachments::{AttachmentFile, LocalObjectStorage, ObjectMetadata, ObjectStorage};
use mail_ingest::config::{EngineOverrides, PipelineConfig};
use mail_ingest::engine::flags::{ATTACHMENT_CONVERSION_FLAG, BODY_ENGINE_FLAG};
use mail_ingest::engine::{BodyEngine, FlagContext, FlagService, StaticFlagService};
use mail_ingest::error::{ConversionError, FlagError, IngestError, OcrError, StorageError};
use mail_ingest::metrics::{AttachmentOutcome, ErrorReason, MetricKind, NoopSink};
use mail_ingest::ocr::OcrPrimitive;
use mail_ingest::pipeline::{
    Collaborators, ConversionOrchestrator, ConvertInput, ConvertedDocument, ConverterSet, DocumentConverter,
    InboundEmail, SCREENING_ENGINE, STORAGE_ENGINE,
};

const OWNER: &str = "94a7b7f0-3266-4a4f-9d4e-875542d30e62";

// ── Stubs ───────────────────────────────────────────────────────────

/// Converter that always returns a tiny PDF.
struct StubConverter {
    engine: BodyEngine,
    calls: AtomicUsize,
}

impl StubConverter {
    fn new(engine: BodyEngine) -> Arc<Self> {
        Arc::new(Self {
            engine,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DocumentConverter for StubConverter {
    fn engine(&self) -> BodyEngine {
        self.engine
    }

    async fn convert(&self, _input: &ConvertInput) -> Result<ConvertedDocument, ConversionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ConvertedDocument {
            engine: self.engine,
            pdf: b"%PDF-1.7 stub".to_vec(),
        })
    }
}

/// OCR that always reads the same text.
struct StubOcr;

#[async_trait]
impl OcrPrimitive for StubOcr {
    async fn recognize(&self, _bytes: &[u8], _content_type: &str) -> Result<String, OcrError> {
        Ok("Invoice 2026-001 total 42.00".to_string())
    }
}

/// Flag service that never answers successfully.
struct BrokenFlags;

#[async_trait]
impl FlagService for BrokenFlags {
    async fn is_enabled(&self, flag: &str, _context: &FlagContext) -> Result<bool, FlagError> {
        Err(FlagError::RequestFailed {
            flag: flag.to_string(),
            reason: "connection refused".to_string(),
        })
    }
}

/// Local storage that refuses every derived PDF but keeps originals.
struct NoDerivedPdfs(LocalObjectStorage);

#[async_trait]
impl ObjectStorage for NoDerivedPdfs {
    async fn save(&self, path: &str, bytes: &[u8], metadata: &ObjectMetadata) -> Result<(), StorageError> {
        if path.contains("/converted/") || path.contains("/body/") {
            return Err(StorageError::WriteFailed {
                path: path.to_string(),
                reason: "connection reset by object store".to_string(),
            });
        }
        self.0.save(path, bytes, metadata).await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn config(dir: &TempDir, overrides: EngineOverrides) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.overrides = overrides;
    config.services.flag_timeout = Duration::from_millis(200);
    config.storage.base_dir = dir.path().to_path_buf();
    config.storage.max_attachment_bytes = 1024;
    config.ocr.batch_delay = Duration::ZERO;
    config.ocr.batch_jitter = Duration::ZERO;
    config
}

fn orchestrator(
    config: &PipelineConfig,
    flags: Arc<dyn FlagService>,
    converters: ConverterSet,
) -> ConversionOrchestrator {
    let storage = Arc::new(LocalObjectStorage::new(config.storage.base_dir.clone()));
    orchestrator_with_storage(config, flags, converters, storage)
}

fn orchestrator_with_storage(
    config: &PipelineConfig,
    flags: Arc<dyn FlagService>,
    converters: ConverterSet,
    storage: Arc<dyn ObjectStorage>,
) -> ConversionOrchestrator {
    ConversionOrchestrator::new(
        config,
        Collaborators {
            flags,
            converters,
            storage,
            ocr: Arc::new(StubOcr),
            telemetry: Arc::new(NoopSink),
        },
    )
}

fn email(attachments: Vec<AttachmentFile>) -> InboundEmail {
    InboundEmail {
        message_id: "msg-001@example.com".to_string(),
        sender: "test@example.com".to_string(),
        recipients: vec![format!("upload+{OWNER}@myhome-tech.com")],
        subject: Some("Test PDF Browser Fix".to_string()),
        text_body: Some("Testing with browser dependencies fixed".to_string()),
        html_body: Some("<html><body><h1>Test PDF Browser Fix</h1></body></html>".to_string()),
        attachments,
        received_at: Utc::now(),
    }
}

fn outcome_of<'a>(report: &'a mail_ingest::pipeline::IngestionReport, name: &str) -> &'a AttachmentOutcome {
    &report
        .attachments
        .iter()
        .find(|a| a.filename == name)
        .unwrap_or_else(|| panic!("no report for {name}"))
        .outcome
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn flags_off_stores_originals_and_renders_body_locally() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, EngineOverrides::default());
    let local = StubConverter::new(BodyEngine::Local);
    let orch = orchestrator(
        &config,
        Arc::new(StaticFlagService::new()),
        ConverterSet::new().with(local.clone()),
    );

    let report = orch
        .ingest(
            &email(vec![
                AttachmentFile::new("My Résumé (final)v2.pdf", b"%PDF-1.4 resume".to_vec()),
                AttachmentFile::new("scan.png", b"png bytes".to_vec()).with_content_type("image/png"),
            ]),
            &FlagContext::for_user(OWNER),
        )
        .await
        .unwrap();

    assert_eq!(report.owner_id, OWNER);
    assert_eq!(report.decision.body_engine, BodyEngine::Local);
    assert!(!report.decision.convert_attachments);
    assert_eq!(report.decision.reason_trail, vec!["flag:body=false", "flag:att=false"]);

    let body_path = report.body.pdf_path.as_deref().unwrap();
    assert!(body_path.ends_with("/body/email-body.pdf"));
    assert!(dir.path().join(body_path).exists());
    assert_eq!(local.calls.load(Ordering::SeqCst), 1);

    for attachment in &report.attachments {
        assert_eq!(attachment.outcome, AttachmentOutcome::StoredOriginal);
        let record = attachment.record.as_ref().unwrap();
        assert!(record.storage_path.starts_with(&format!("emails/{OWNER}/")));
        assert!(record.storage_path.contains("/attachments/"));
        assert!(dir.path().join(&record.storage_path).exists());
        assert_eq!(attachment.ocr_text.as_deref(), Some("Invoice 2026-001 total 42.00"));
        assert_eq!(attachment.ocr_strategy.as_deref(), Some("immediate_direct"));
    }
    let resume = report.attachments[0].record.as_ref().unwrap();
    assert_eq!(resume.sanitized_name, "My_R_sum_final_v2.pdf");

    assert_eq!(report.summary.stored_original, 2);
    assert_eq!(report.summary.converted_to_pdf, 0);
    assert!(report.summary.skipped.is_empty());
    assert!(report.summary.body_converted);
    assert_eq!(orch.metrics().summaries().len(), 1);
}

#[tokio::test]
async fn flag_failure_fails_closed() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, EngineOverrides::default());
    let orch = orchestrator(
        &config,
        Arc::new(BrokenFlags),
        ConverterSet::new()
            .with(StubConverter::new(BodyEngine::Local))
            .with(StubConverter::new(BodyEngine::Remote)),
    );

    let report = orch
        .ingest(
            &email(vec![AttachmentFile::new("notes.docx", b"docx".to_vec())]),
            &FlagContext::default(),
        )
        .await
        .unwrap();

    assert_eq!(report.decision.body_engine, BodyEngine::Local);
    assert!(!report.decision.convert_attachments);
    assert!(report.decision.reason_trail.iter().any(|r| r == "flag_eval_error"));
    assert_eq!(outcome_of(&report, "notes.docx"), &AttachmentOutcome::StoredOriginal);
}

#[tokio::test]
async fn enabled_conversion_converts_and_skips_with_reasons() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, EngineOverrides::default());
    let remote = StubConverter::new(BodyEngine::Remote);
    let flags = StaticFlagService::new()
        .with_flag(BODY_ENGINE_FLAG, true)
        .with_flag(ATTACHMENT_CONVERSION_FLAG, true);
    let orch = orchestrator(&config, Arc::new(flags), ConverterSet::new().with(remote.clone()));

    let report = orch
        .ingest(
            &email(vec![
                AttachmentFile::new("notes.docx", b"docx bytes".to_vec()),
                AttachmentFile::new("locked.pdf", b"%PDF-1.4\n1 0 obj << /Encrypt 2 0 R >>".to_vec()),
                AttachmentFile::new("archive.zip", b"PK".to_vec()).with_content_type("application/zip"),
                AttachmentFile::new("big.bin", vec![0u8; 2048]),
            ]),
            &FlagContext::for_user(OWNER),
        )
        .await
        .unwrap();

    assert_eq!(report.decision.body_engine, BodyEngine::Remote);
    assert!(report.decision.convert_attachments);
    // Body plus one attachment.
    assert_eq!(remote.calls.load(Ordering::SeqCst), 2);

    assert_eq!(outcome_of(&report, "notes.docx"), &AttachmentOutcome::ConvertedToPdf);
    let notes = report.attachments.iter().find(|a| a.filename == "notes.docx").unwrap();
    let pdf_path = notes.pdf_path.as_deref().unwrap();
    assert!(pdf_path.ends_with("/converted/notes.docx.pdf"));
    assert!(dir.path().join(pdf_path).exists());

    assert_eq!(
        outcome_of(&report, "locked.pdf"),
        &AttachmentOutcome::Skipped {
            reason: ErrorReason::SkippedPasswordProtected
        }
    );
    assert_eq!(
        outcome_of(&report, "archive.zip"),
        &AttachmentOutcome::Skipped {
            reason: ErrorReason::SkippedUnsupported
        }
    );
    assert_eq!(
        outcome_of(&report, "big.bin"),
        &AttachmentOutcome::Skipped {
            reason: ErrorReason::SkippedTooLarge
        }
    );
    let big = report.attachments.iter().find(|a| a.filename == "big.bin").unwrap();
    assert!(big.record.is_none());
    assert!(big.failure.is_some());

    assert_eq!(report.summary.attachments_total, 4);
    assert_eq!(report.summary.converted_to_pdf, 1);
    assert_eq!(report.summary.skipped.len(), 3);

    let screened = orch
        .metrics()
        .metrics()
        .into_iter()
        .find(|m| m.error_reason == Some(ErrorReason::SkippedPasswordProtected))
        .unwrap();
    assert_eq!(screened.engine, SCREENING_ENGINE);

    let stats = orch.metrics().performance_stats();
    for reason in [
        ErrorReason::SkippedPasswordProtected,
        ErrorReason::SkippedUnsupported,
        ErrorReason::SkippedTooLarge,
    ] {
        assert_eq!(stats.errors_by_reason.get(&reason), Some(&1), "{reason}");
    }
}

#[tokio::test]
async fn unconfigured_engine_is_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let config = config(
        &dir,
        EngineOverrides {
            body_engine: Some("remote".to_string()),
            force_attachment_conversion: false,
        },
    );
    let orch = orchestrator(
        &config,
        Arc::new(StaticFlagService::new()),
        ConverterSet::new().with(StubConverter::new(BodyEngine::Local)),
    );

    let report = orch
        .ingest(
            &email(vec![AttachmentFile::new("a.pdf", b"%PDF-1.4 a".to_vec())]),
            &FlagContext::for_user(OWNER),
        )
        .await
        .unwrap();

    assert_eq!(report.decision.body_engine, BodyEngine::Remote);
    assert!(report.body.pdf_path.is_none());
    assert!(report.body.error.as_deref().unwrap().contains("not configured"));
    assert!(!report.summary.body_converted);
    assert_eq!(outcome_of(&report, "a.pdf"), &AttachmentOutcome::StoredOriginal);

    let stats = orch.metrics().performance_stats();
    assert_eq!(stats.errors_by_reason.get(&ErrorReason::ConfigurationError), Some(&1));
}

#[tokio::test]
async fn unroutable_email_is_rejected() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, EngineOverrides::default());
    let orch = orchestrator(&config, Arc::new(StaticFlagService::new()), ConverterSet::new());

    let mut inbound = email(Vec::new());
    inbound.recipients = vec!["inbox@example.com".to_string()];

    let err = orch.ingest(&inbound, &FlagContext::default()).await.unwrap_err();
    assert!(matches!(err, Error::Ingest(IngestError::UnknownOwner { .. })));
    assert!(orch.metrics().summaries().is_empty());
}

#[tokio::test]
async fn parsed_eml_runs_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, EngineOverrides::default());
    let orch = orchestrator(
        &config,
        Arc::new(StaticFlagService::new()),
        ConverterSet::new().with(StubConverter::new(BodyEngine::Local)),
    );

    let raw = format!(
        "From: test@example.com\r\n\
         To: upload+{OWNER}@myhome-tech.com\r\n\
         Subject: Plain text upload\r\n\
         Message-ID: <plain-001@example.com>\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"B\"\r\n\
         \r\n\
         --B\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         Please file the attached.\r\n\
         --B\r\n\
         Content-Type: application/pdf\r\n\
         Content-Disposition: attachment; filename=\"statement.pdf\"\r\n\
         \r\n\
         %PDF-1.4 statement\r\n\
         --B--\r\n"
    );
    let inbound = InboundEmail::parse(raw.as_bytes()).unwrap();
    let report = orch
        .ingest(&inbound, &FlagContext::for_user(OWNER))
        .await
        .unwrap();

    assert_eq!(report.email_id, "plain-001@example.com");
    assert!(report.body.pdf_path.is_some());
    assert_eq!(report.attachments.len(), 1);
    assert_eq!(report.attachments[0].filename, "statement.pdf");
    assert_eq!(
        report.attachments[0].record.as_ref().unwrap().content_type,
        "application/pdf"
    );

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["decision"]["body_engine"], "local");
    assert_eq!(json["attachments"][0]["outcome"], "stored_original");
}

#[tokio::test]
async fn attachment_named_like_the_body_keeps_both_pdfs() {
    let dir = TempDir::new().unwrap();
    let config = config(
        &dir,
        EngineOverrides {
            body_engine: None,
            force_attachment_conversion: true,
        },
    );
    let orch = orchestrator(
        &config,
        Arc::new(StaticFlagService::new()),
        ConverterSet::new().with(StubConverter::new(BodyEngine::Local)),
    );

    let report = orch
        .ingest(
            &email(vec![
                AttachmentFile::new("email-body", b"plain text".to_vec()).with_content_type("text/plain"),
                AttachmentFile::new("email body!", b"more text".to_vec()).with_content_type("text/plain"),
            ]),
            &FlagContext::for_user(OWNER),
        )
        .await
        .unwrap();

    let body_path = report.body.pdf_path.clone().unwrap();
    let mut paths = vec![body_path];
    for attachment in &report.attachments {
        assert_eq!(attachment.outcome, AttachmentOutcome::ConvertedToPdf);
        paths.push(attachment.pdf_path.clone().unwrap());
    }
    let mut unique = paths.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 3, "{paths:?}");
    for path in &paths {
        assert!(dir.path().join(path).exists(), "{path}");
    }
}

#[tokio::test]
async fn failed_pdf_store_is_recorded_as_storage_error() {
    let dir = TempDir::new().unwrap();
    let config = config(
        &dir,
        EngineOverrides {
            body_engine: None,
            force_attachment_conversion: true,
        },
    );
    let storage = Arc::new(NoDerivedPdfs(LocalObjectStorage::new(dir.path())));
    let orch = orchestrator_with_storage(
        &config,
        Arc::new(StaticFlagService::new()),
        ConverterSet::new().with(StubConverter::new(BodyEngine::Local)),
        storage,
    );

    let report = orch
        .ingest(
            &email(vec![AttachmentFile::new("notes.docx", b"docx bytes".to_vec())]),
            &FlagContext::for_user(OWNER),
        )
        .await
        .unwrap();

    assert!(report.body.pdf_path.is_none());
    assert!(report.body.error.is_some());
    let notes = &report.attachments[0];
    assert_eq!(notes.outcome, AttachmentOutcome::StoredOriginal);
    assert!(notes.pdf_path.is_none());
    assert!(notes.conversion_error.is_some());
    assert!(notes.record.is_some());

    let storage_errors: Vec<_> = orch
        .metrics()
        .metrics()
        .into_iter()
        .filter(|m| m.engine == STORAGE_ENGINE && m.kind == MetricKind::Error)
        .collect();
    assert_eq!(storage_errors.len(), 2);
    for metric in &storage_errors {
        assert_eq!(metric.error_reason, Some(ErrorReason::NetworkError));
    }
}
