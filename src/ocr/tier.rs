//! Priority tiers and the policy that picks one.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Governs retry timing and how aggressively the ladder is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    /// No delay; retries go straight to aggressive compression.
    Immediate,
    /// One ladder step per retry with a pause in between.
    Batch,
    /// Maximum compression from the first attempt.
    Background,
}

impl PriorityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Batch => "batch",
            Self::Background => "background",
        }
    }
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller's quality-of-service class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityClass {
    High,
    #[default]
    Standard,
    Low,
}

/// Thresholds for tier selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    /// At or below this size a document counts as small.
    pub small_bytes: u64,
    /// Above this size a document goes to the background tier.
    pub large_bytes: u64,
    /// Load (0.0-1.0) above which everything goes to the background tier.
    pub high_load: f64,
    /// First business hour (inclusive, 0-23).
    pub business_hours_start: u32,
    /// Last business hour (exclusive, 0-24).
    pub business_hours_end: u32,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            small_bytes: 1024 * 1024,
            large_bytes: 10 * 1024 * 1024,
            high_load: 0.8,
            business_hours_start: 9,
            business_hours_end: 17,
        }
    }
}

impl TierPolicy {
    /// Pick a tier. Rules are checked in order; first match wins.
    pub fn select(&self, size_bytes: u64, quality: QualityClass, hour: u32, load: f64) -> PriorityTier {
        let small = size_bytes <= self.small_bytes;

        if small && quality == QualityClass::High {
            return PriorityTier::Immediate;
        }
        if size_bytes > self.large_bytes || load > self.high_load {
            return PriorityTier::Background;
        }
        if !small && self.is_business_hour(hour) {
            return PriorityTier::Batch;
        }
        // Off-peak: assume spare capacity.
        PriorityTier::Immediate
    }

    /// A window with `start > end` wraps past midnight.
    pub fn is_business_hour(&self, hour: u32) -> bool {
        let (start, end) = (self.business_hours_start, self.business_hours_end);
        if start <= end {
            (start..end).contains(&hour)
        } else {
            hour >= start || hour < end
        }
    }
}
