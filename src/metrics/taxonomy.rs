//! Closed error taxonomy for conversion failures.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{ConversionError, OcrError, StorageError};

/// Every failure is classified into exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    ConfigurationError,
    SkippedPasswordProtected,
    SkippedUnsupported,
    SkippedTooLarge,
    Timeout,
    NetworkError,
    ProcessingError,
    Unknown,
}

/// Substring rules, checked in order; first hit wins.
const RULES: &[(ErrorReason, &[&str])] = &[
    (
        ErrorReason::ConfigurationError,
        &[
            "not configured",
            "configuration",
            "api key",
            "missing env",
            "credentials",
            "unauthorized",
        ],
    ),
    (
        ErrorReason::SkippedPasswordProtected,
        &["password", "encrypted"],
    ),
    (
        ErrorReason::SkippedUnsupported,
        &[
            "unsupported",
            "not supported",
            "invalid file type",
            "unknown format",
        ],
    ),
    (
        ErrorReason::SkippedTooLarge,
        &["too large", "exceeds limit", "payload too large", "file size"],
    ),
    (
        ErrorReason::Timeout,
        &["timed out", "timeout", "deadline exceeded"],
    ),
    (
        ErrorReason::NetworkError,
        &[
            "network",
            "connection",
            "econnrefused",
            "econnreset",
            "dns",
            "socket",
            "unreachable",
        ],
    ),
    (
        ErrorReason::ProcessingError,
        &[
            "processing",
            "conversion",
            "render",
            "ocr",
            "compression",
            "inadequate",
            "invalid document",
        ],
    ),
];

impl ErrorReason {
    pub const ALL: [ErrorReason; 8] = [
        Self::ConfigurationError,
        Self::SkippedPasswordProtected,
        Self::SkippedUnsupported,
        Self::SkippedTooLarge,
        Self::Timeout,
        Self::NetworkError,
        Self::ProcessingError,
        Self::Unknown,
    ];

    /// Best-effort classification of an error message. Never fails; anything
    /// unmatched is `Unknown`.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        RULES
            .iter()
            .find(|(_, needles)| needles.iter().any(|n| lower.contains(n)))
            .map(|(reason, _)| *reason)
            .unwrap_or(Self::Unknown)
    }

    /// Classify any displayable error.
    pub fn of(err: &impl fmt::Display) -> Self {
        Self::classify(&err.to_string())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigurationError => "configuration_error",
            Self::SkippedPasswordProtected => "skipped_password_protected",
            Self::SkippedUnsupported => "skipped_unsupported",
            Self::SkippedTooLarge => "skipped_too_large",
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
            Self::ProcessingError => "processing_error",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this reason means "deliberately not processed" rather than
    /// "tried and failed".
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Self::SkippedPasswordProtected | Self::SkippedUnsupported | Self::SkippedTooLarge
        )
    }
}

/// Errors that know their own [`ErrorReason`].
///
/// Implementations classify the cause only, never identifiers such as a
/// document id or storage path carried alongside it.
pub trait Classify {
    fn error_reason(&self) -> ErrorReason;
}

impl<T: Classify + ?Sized> Classify for Arc<T> {
    fn error_reason(&self) -> ErrorReason {
        (**self).error_reason()
    }
}

/// Classify `message`, using `fallback` when nothing matches.
fn classify_or(message: &str, fallback: ErrorReason) -> ErrorReason {
    match ErrorReason::classify(message) {
        ErrorReason::Unknown => fallback,
        reason => reason,
    }
}

impl Classify for ConversionError {
    fn error_reason(&self) -> ErrorReason {
        match self {
            Self::NotConfigured { .. } => ErrorReason::ConfigurationError,
            Self::Unsupported(_) => ErrorReason::SkippedUnsupported,
            Self::PasswordProtected(_) => ErrorReason::SkippedPasswordProtected,
            Self::RequestFailed { reason, .. } => classify_or(reason, ErrorReason::ProcessingError),
            Self::Timeout(_) => ErrorReason::Timeout,
            Self::InvalidOutput { .. } => ErrorReason::ProcessingError,
        }
    }
}

impl Classify for OcrError {
    fn error_reason(&self) -> ErrorReason {
        match self {
            Self::RequestFailed(reason) => classify_or(reason, ErrorReason::ProcessingError),
            Self::Timeout(_) => ErrorReason::Timeout,
            Self::InadequateText { .. } | Self::Compression { .. } => ErrorReason::ProcessingError,
            Self::Exhausted { last_error, .. } => classify_or(last_error, ErrorReason::ProcessingError),
        }
    }
}

impl Classify for StorageError {
    fn error_reason(&self) -> ErrorReason {
        match self {
            Self::WriteFailed { reason, .. } => ErrorReason::classify(reason),
            Self::TooLarge { .. } => ErrorReason::SkippedTooLarge,
            Self::InvalidPath(_) => ErrorReason::ProcessingError,
            Self::Io(e) => ErrorReason::classify(&e.to_string()),
        }
    }
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
