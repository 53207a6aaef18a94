//! Ingestion pipeline.
//!
//! An inbound email flows through:
//! 1. `InboundEmail::parse()` and owner routing from the upload address
//! 2. `EngineDecisionResolver::decide()` (once per ingestion)
//! 3. body conversion through the chosen `DocumentConverter`
//! 4. `AttachmentStore::store_many()` for the originals
//! 5. per-attachment conversion and OCR
//! 6. one `EmailConversionSummary` into the metrics recorder

pub mod converter;
pub mod inbound;
pub mod orchestrator;
pub mod types;

pub use converter::{ConverterSet, DocumentConverter, HttpConverter};
pub use inbound::{InboundEmail, owner_from_recipient};
pub use orchestrator::{Collaborators, ConversionOrchestrator, SCREENING_ENGINE, STORAGE_ENGINE};
pub use types::{
    AttachmentReport, BodyReport, ConvertContent, ConvertInput, ConvertedDocument, IngestionReport,
};
