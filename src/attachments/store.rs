//! Attachment persistence.
//!
//! Objects land at
//! `{root}/{owner_id}/{time_prefix}-{ingestion_id}-{digest}/attachments/{sanitized}`.
//! The time prefix is stamped once per ingestion by [`IngestionKey`], so every
//! attachment of one email shares a folder and no coordination is needed
//! across ingestions. `digest` is the first 8 hex chars of the SHA-256 of the
//! raw ingestion id, so ids that sanitize alike still get distinct folders.
//!
//! Derived PDFs go to sibling folders: `converted/` for attachments and
//! `body/` for the email body, which keeps the two from ever sharing a path.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::attachments::mime::{guess_content_type, normalize_content_type};
use crate::attachments::sanitize::{MAX_BASE_LEN, sanitize_filename, sanitize_segment};
use crate::attachments::storage::{ObjectMetadata, ObjectStorage};
use crate::error::StorageError;
use crate::metrics::{Classify, ErrorReason};

const ATTACHMENTS_DIR: &str = "attachments";
const CONVERTED_DIR: &str = "converted";
const BODY_DIR: &str = "body";
const PDF: &str = "application/pdf";

/// Identifies one ingestion's storage folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionKey {
    pub owner_id: String,
    pub ingestion_id: String,
    pub started_at: DateTime<Utc>,
}

impl IngestionKey {
    /// Key stamped with the current time.
    pub fn new(owner_id: impl Into<String>, ingestion_id: impl Into<String>) -> Self {
        Self::at(owner_id, ingestion_id, Utc::now())
    }

    pub fn at(
        owner_id: impl Into<String>,
        ingestion_id: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            ingestion_id: ingestion_id.into(),
            started_at,
        }
    }

    /// Sortable, second-granularity UTC timestamp.
    pub fn time_prefix(&self) -> String {
        self.started_at.format("%Y%m%d%H%M%S").to_string()
    }

    /// Folder name for this ingestion: time prefix, readable id, digest.
    pub fn folder(&self) -> String {
        let digest = hex::encode(Sha256::digest(self.ingestion_id.as_bytes()));
        format!(
            "{}-{}-{}",
            self.time_prefix(),
            sanitize_segment(&self.ingestion_id),
            &digest[..8]
        )
    }
}

/// An attachment as received, before storage.
#[derive(Debug, Clone)]
pub struct AttachmentFile {
    pub filename: String,
    /// Declared content type, if the sender provided one.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl AttachmentFile {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            bytes,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// A stored attachment. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRecord {
    pub original_name: String,
    pub sanitized_name: String,
    pub storage_path: String,
    pub size_bytes: u64,
    pub content_type: String,
}

/// A single attachment that could not be stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreFailure {
    pub original_name: String,
    pub error: String,
    pub reason: ErrorReason,
}

/// File name of the rendered email body inside the `body/` folder.
pub const BODY_PDF_NAME: &str = "email-body.pdf";

pub type StoreResult = Result<AttachmentRecord, StoreFailure>;

/// Persists raw attachment bytes to object storage.
pub struct AttachmentStore {
    storage: Arc<dyn ObjectStorage>,
    root: String,
    max_attachment_bytes: u64,
}

impl AttachmentStore {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        root: impl Into<String>,
        max_attachment_bytes: u64,
    ) -> Self {
        Self {
            storage,
            root: root.into(),
            max_attachment_bytes,
        }
    }

    /// Deterministic object path for a sanitized filename.
    pub fn storage_path(&self, key: &IngestionKey, sanitized_name: &str) -> String {
        self.object_path(key, ATTACHMENTS_DIR, sanitized_name)
    }

    /// Path for a PDF derived from an attachment.
    pub fn converted_path(&self, key: &IngestionKey, sanitized_name: &str) -> String {
        self.object_path(key, CONVERTED_DIR, sanitized_name)
    }

    pub fn body_path(&self, key: &IngestionKey) -> String {
        self.object_path(key, BODY_DIR, BODY_PDF_NAME)
    }

    fn object_path(&self, key: &IngestionKey, folder: &str, sanitized_name: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.root,
            sanitize_segment(&key.owner_id),
            key.folder(),
            folder,
            sanitized_name
        )
    }

    /// Store one attachment. Failures are returned, never raised.
    pub async fn store(
        &self,
        key: &IngestionKey,
        bytes: &[u8],
        filename: &str,
        content_type: Option<&str>,
    ) -> StoreResult {
        let sanitized = sanitize_filename(filename);
        let path = self.storage_path(key, &sanitized);
        self.store_as(key, bytes, filename, sanitized, path, content_type)
            .await
    }

    /// Store a PDF derived from `source_name` as `{sanitized}.pdf` under the
    /// ingestion's `converted/` folder. Pass the attachment's stored name so
    /// derived paths are as unique as the originals.
    pub async fn store_converted(&self, key: &IngestionKey, pdf: &[u8], source_name: &str) -> StoreResult {
        let name = format!("{}.pdf", sanitize_filename(source_name));
        let path = self.converted_path(key, &name);
        self.store_as(key, pdf, source_name, name, path, Some(PDF))
            .await
    }

    /// Store the PDF rendered from the email body.
    pub async fn store_body_pdf(&self, key: &IngestionKey, pdf: &[u8]) -> StoreResult {
        let path = self.body_path(key);
        self.store_as(key, pdf, BODY_PDF_NAME, BODY_PDF_NAME.to_string(), path, Some(PDF))
            .await
    }

    /// Store a batch concurrently.
    ///
    /// The output has one entry per input, in input order. One item failing
    /// does not affect the others. Names that collide after sanitization get
    /// `-2`, `-3`, ... so paths stay unique within the ingestion.
    pub async fn store_many(&self, key: &IngestionKey, files: &[AttachmentFile]) -> Vec<StoreResult> {
        let names = unique_names(files.iter().map(|f| f.filename.as_str()));

        let futures = files.iter().zip(names).map(|(file, sanitized)| {
            let path = self.storage_path(key, &sanitized);
            self.store_as(
                key,
                &file.bytes,
                &file.filename,
                sanitized,
                path,
                file.content_type.as_deref(),
            )
        });
        let results = join_all(futures).await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(
            owner_id = %key.owner_id,
            ingestion_id = %key.ingestion_id,
            total = results.len(),
            failed,
            "Attachment batch stored"
        );
        results
    }

    async fn store_as(
        &self,
        key: &IngestionKey,
        bytes: &[u8],
        original_name: &str,
        sanitized_name: String,
        storage_path: String,
        content_type: Option<&str>,
    ) -> StoreResult {
        let content_type = content_type
            .map(normalize_content_type)
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| guess_content_type(&sanitized_name).to_string());
        let size_bytes = bytes.len() as u64;

        let outcome = if size_bytes > self.max_attachment_bytes {
            Err(StorageError::TooLarge {
                size: size_bytes,
                limit: self.max_attachment_bytes,
            })
        } else {
            let metadata = ObjectMetadata {
                content_type: content_type.clone(),
                original_name: original_name.to_string(),
                owner_id: key.owner_id.clone(),
                ingestion_id: key.ingestion_id.clone(),
            };
            self.storage.save(&storage_path, bytes, &metadata).await
        };

        match outcome {
            Ok(()) => {
                info!(path = %storage_path, size = size_bytes, "Attachment stored");
                Ok(AttachmentRecord {
                    original_name: original_name.to_string(),
                    sanitized_name,
                    storage_path,
                    size_bytes,
                    content_type,
                })
            }
            Err(e) => {
                let error = e.to_string();
                warn!(filename = %original_name, error = %error, "Attachment store failed");
                Err(StoreFailure {
                    original_name: original_name.to_string(),
                    reason: e.error_reason(),
                    error,
                })
            }
        }
    }
}

/// Sanitize every name and disambiguate duplicates, preserving order.
fn unique_names<'a>(names: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .map(|name| {
            let sanitized = sanitize_filename(name);
            let mut candidate = sanitized.clone();
            let mut n = 2;
            while !seen.insert(candidate.clone()) {
                candidate = with_suffix(&sanitized, n);
                n += 1;
            }
            candidate
        })
        .collect()
}

/// Insert `-{n}` before the extension of an already-sanitized name.
fn with_suffix(sanitized: &str, n: usize) -> String {
    let suffix = format!("-{n}");
    let (base, ext) = match sanitized.rsplit_once('.') {
        Some((base, ext)) if !base.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => {
            (base, Some(ext))
        }
        _ => (sanitized, None),
    };
    let keep = base.len().min(MAX_BASE_LEN.saturating_sub(suffix.len()));
    let base = &base[..keep];
    match ext {
        Some(ext) => format!("{base}{suffix}.{ext}"),
        None => format!("{base}{suffix}"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;

    /// In-memory storage that fails for names containing a marker.
    #[derive(Default)]
    struct MemoryStorage {
        saved: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl ObjectStorage for MemoryStorage {
        async fn save(
            &self,
            path: &str,
            bytes: &[u8],
            _metadata: &ObjectMetadata,
        ) -> Result<(), StorageError> {
            if path.contains("fail") {
                return Err(StorageError::WriteFailed {
                    path: path.to_string(),
                    reason: "network error: bucket unreachable".into(),
                });
            }
            self.saved
                .lock()
                .unwrap()
                .push((path.to_string(), bytes.len()));
            Ok(())
        }
    }

    fn key() -> IngestionKey {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        IngestionKey::at("owner-1", "msg-42", at)
    }

    fn store(storage: Arc<MemoryStorage>) -> AttachmentStore {
        AttachmentStore::new(storage, "emails", 1024)
    }

    #[tokio::test]
    async fn builds_deterministic_path() {
        let storage = Arc::new(MemoryStorage::default());
        let record = store(storage.clone())
            .store(&key(), b"hello", "My Résumé (final)v2.pdf", None)
            .await
            .unwrap();

        assert_eq!(
            record.storage_path,
            "emails/owner-1/20260314092653-msg-42-22ca0cc9/attachments/My_R_sum_final_v2.pdf"
        );
        assert_eq!(record.original_name, "My Résumé (final)v2.pdf");
        assert_eq!(record.content_type, "application/pdf");
        assert_eq!(record.size_bytes, 5);
        assert_eq!(storage.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn declared_content_type_wins() {
        let record = store(Arc::new(MemoryStorage::default()))
            .store(&key(), b"x", "blob", Some("Image/PNG; name=blob"))
            .await
            .unwrap();
        assert_eq!(record.content_type, "image/png");
    }

    #[tokio::test]
    async fn oversized_file_fails_without_writing() {
        let storage = Arc::new(MemoryStorage::default());
        let failure = store(storage.clone())
            .store(&key(), &vec![0u8; 2048], "big.pdf", None)
            .await
            .unwrap_err();

        assert_eq!(failure.reason, ErrorReason::SkippedTooLarge);
        assert!(storage.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_isolates_failures_and_keeps_order() {
        let storage = Arc::new(MemoryStorage::default());
        let files: Vec<AttachmentFile> = ["a.pdf", "b.png", "fail.doc", "d.txt", "e.csv"]
            .iter()
            .map(|name| AttachmentFile::new(*name, b"data".to_vec()))
            .collect();

        let results = store(storage.clone()).store_many(&key(), &files).await;

        assert_eq!(results.len(), 5);
        for (i, result) in results.iter().enumerate() {
            if i == 2 {
                let failure = result.as_ref().unwrap_err();
                assert_eq!(failure.original_name, "fail.doc");
                assert_eq!(failure.reason, ErrorReason::NetworkError);
            } else {
                assert_eq!(result.as_ref().unwrap().original_name, files[i].filename);
            }
        }
        assert_eq!(storage.saved.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn batch_paths_never_collide() {
        let files: Vec<AttachmentFile> = ["a b.pdf", "a_b.pdf", "a b.pdf", "a_b-2.pdf"]
            .iter()
            .map(|name| AttachmentFile::new(*name, b"x".to_vec()))
            .collect();

        let results = store(Arc::new(MemoryStorage::default()))
            .store_many(&key(), &files)
            .await;
        let names: Vec<String> = results
            .into_iter()
            .map(|r| r.unwrap().sanitized_name)
            .collect();

        assert_eq!(names, vec!["a_b.pdf", "a_b-2.pdf", "a_b-3.pdf", "a_b-2-2.pdf"]);
    }

    #[tokio::test]
    async fn converted_pdf_goes_to_its_own_folder() {
        let record = store(Arc::new(MemoryStorage::default()))
            .store_converted(&key(), b"%PDF-1.7", "notes.docx")
            .await
            .unwrap();
        assert_eq!(
            record.storage_path,
            "emails/owner-1/20260314092653-msg-42-22ca0cc9/converted/notes.docx.pdf"
        );
        assert_eq!(record.content_type, "application/pdf");
    }

    #[tokio::test]
    async fn body_pdf_never_shares_a_path_with_attachments() {
        let store = store(Arc::new(MemoryStorage::default()));
        let body = store.store_body_pdf(&key(), b"%PDF-1.7 body").await.unwrap();
        assert_eq!(
            body.storage_path,
            "emails/owner-1/20260314092653-msg-42-22ca0cc9/body/email-body.pdf"
        );

        for name in ["email-body", "email body", "email-body!"] {
            let converted = store
                .store_converted(&key(), b"%PDF-1.7", &sanitize_filename(name))
                .await
                .unwrap();
            assert_ne!(converted.storage_path, body.storage_path, "{name}");
        }
    }

    #[test]
    fn ids_that_sanitize_alike_get_distinct_folders() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let a = IngestionKey::at("owner-1", "a@b", at);
        let b = IngestionKey::at("owner-1", "a#b", at);
        let clean = IngestionKey::at("owner-1", "a_b", at);

        assert_eq!(a.folder(), "20260314092653-a_b-7508d8b5");
        assert_eq!(b.folder(), "20260314092653-a_b-8187fc8f");
        assert_ne!(a.folder(), clean.folder());
        assert_eq!(a.folder(), a.clone().folder());
    }

    #[test]
    fn suffix_respects_base_limit() {
        let long = format!("{}.pdf", "a".repeat(MAX_BASE_LEN));
        let suffixed = with_suffix(&long, 12);
        assert!(suffixed.ends_with("-12.pdf"));
        assert_eq!(suffixed.len(), MAX_BASE_LEN + ".pdf".len());
        assert_eq!(sanitize_filename(&suffixed), suffixed);
    }
}
