//! OCR retry engine: priority tiers, the compression ladder, and the
//! per-request retry state machine.

pub mod ladder;
pub mod retry;
pub mod tier;

pub use ladder::{CompressionLadder, CompressionLevel, compress};
pub use retry::{
    AttemptOutcome, AttemptPlan, HttpOcrPrimitive, OCR_ENGINE, OcrAttempt, OcrPrimitive, OcrRequest,
    OcrRetryEngine, OcrSuccess, UnconfiguredOcr,
};
pub use tier::{PriorityTier, QualityClass, TierPolicy};
