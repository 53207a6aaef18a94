//! Conversion-engine selection.
//!
//! One [`EngineDecision`] is produced per ingestion. Precedence:
//! 1. operator override (environment)
//! 2. feature flags from the [`FlagService`], failing closed on error
//! 3. baseline default

pub mod decision;
pub mod flags;

pub use decision::{BodyEngine, EngineDecision, EngineDecisionResolver, FlagOutcome, decide};
pub use flags::{FlagContext, FlagService, HttpFlagService, StaticFlagService};
