//! Error types for mail-ingest.

use std::time::Duration;

/// Top-level error type for the ingestion pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Flag service error: {0}")]
    Flag(#[from] FlagError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("OCR error: {0}")]
    Ocr(#[from] OcrError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors from the external feature-flag service.
#[derive(Debug, thiserror::Error)]
pub enum FlagError {
    #[error("Flag {flag} evaluation request failed: {reason}")]
    RequestFailed { flag: String, reason: String },

    #[error("Flag {flag} evaluation timed out after {timeout:?}")]
    Timeout { flag: String, timeout: Duration },

    #[error("Invalid flag response for {flag}: {reason}")]
    InvalidResponse { flag: String, reason: String },
}

/// Object storage errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to write {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Document conversion errors.
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("Engine {engine} is not configured")]
    NotConfigured { engine: String },

    #[error("Unsupported content type for conversion: {0}")]
    Unsupported(String),

    #[error("Document is password protected: {0}")]
    PasswordProtected(String),

    #[error("Conversion request to {engine} failed: {reason}")]
    RequestFailed { engine: String, reason: String },

    #[error("Conversion timed out after {0:?}")]
    Timeout(Duration),

    #[error("Engine {engine} returned an invalid document: {reason}")]
    InvalidOutput { engine: String, reason: String },
}

/// OCR errors, both per-attempt and terminal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OcrError {
    #[error("OCR request failed: {0}")]
    RequestFailed(String),

    #[error("OCR timed out after {0:?}")]
    Timeout(Duration),

    #[error("Inadequate OCR text: {found} characters, need at least {required}")]
    InadequateText { found: usize, required: usize },

    #[error("Compression at level {level} failed: {reason}")]
    Compression { level: String, reason: String },

    #[error("OCR processing failed for document {document_id} after {attempts} attempts: {last_error}")]
    Exhausted {
        document_id: String,
        attempts: u32,
        last_error: String,
    },
}

/// Errors at the ingestion boundary.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to parse inbound email: {0}")]
    Parse(String),

    #[error("No owner could be resolved from recipient {recipient}")]
    UnknownOwner { recipient: String },
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
