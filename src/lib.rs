//! Mail ingest: email-to-document conversion pipeline.
//!
//! Engine selection, attachment persistence, OCR with a compression retry
//! ladder, and conversion metrics, composed by the
//! [`pipeline::ConversionOrchestrator`].

pub mod attachments;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod ocr;
pub mod pipeline;

pub use error::{Error, Result};
