//! Attachment sanitization and persistence.

pub mod mime;
pub mod sanitize;
pub mod storage;
pub mod store;

pub use sanitize::{sanitize_filename, sanitize_segment};
pub use storage::{LocalObjectStorage, ObjectMetadata, ObjectStorage};
pub use store::{
    AttachmentFile, AttachmentRecord, AttachmentStore, BODY_PDF_NAME, IngestionKey, StoreFailure, StoreResult,
};
