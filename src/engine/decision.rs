//! Engine decision: which engine renders the body, and whether attachments
//! are converted.
//!
//! The precedence chain lives in [`decide`], a pure function over the
//! override config and the already-gathered flag results. The resolver's only
//! job is to gather those inputs (one bounded read from the flag service).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::EngineOverrides;
use crate::engine::flags::{
    ATTACHMENT_CONVERSION_FLAG, BODY_ENGINE_FLAG, FlagContext, FlagService,
};
use crate::error::FlagError;

/// Reason-trail marker for a failed flag evaluation.
pub const FLAG_EVAL_ERROR: &str = "flag_eval_error";

/// Conversion backend for the email body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEngine {
    /// Engine A: remote conversion service.
    Remote,
    /// Engine B: local rendering engine. The baseline.
    Local,
}

impl BodyEngine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::Local => "local",
        }
    }

    /// Parse an operator override value. Accepts engine names and the
    /// historical `a`/`b` aliases, case-insensitively.
    pub fn parse_override(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "remote" | "a" => Some(Self::Remote),
            "local" | "b" => Some(Self::Local),
            _ => None,
        }
    }
}

impl fmt::Display for BodyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single per-ingestion engine decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineDecision {
    pub body_engine: BodyEngine,
    pub convert_attachments: bool,
    /// How the decision was reached. Audit only; never branch on it.
    pub reason_trail: Vec<String>,
}

/// Result of asking the flag service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOutcome {
    /// Flags were not consulted (a valid override took precedence).
    NotEvaluated,
    Evaluated { body_remote: bool, attachments: bool },
    /// At least one flag request failed or timed out.
    Failed,
}

/// Apply the precedence chain: override → flags → default.
pub fn decide(overrides: &EngineOverrides, flags: FlagOutcome) -> EngineDecision {
    let mut trail = Vec::new();

    let body_override = match overrides.body_engine.as_deref() {
        Some(raw) => {
            let parsed = BodyEngine::parse_override(raw);
            if parsed.is_none() {
                trail.push(format!("override:invalid={raw}"));
            }
            parsed
        }
        None => None,
    };

    let (body_engine, mut convert_attachments) = match body_override {
        Some(engine) => {
            trail.push(format!("override:body={engine}"));
            (engine, false)
        }
        None => match flags {
            FlagOutcome::Evaluated {
                body_remote,
                attachments,
            } => {
                trail.push(format!("flag:body={body_remote}"));
                trail.push(format!("flag:att={attachments}"));
                let engine = if body_remote {
                    BodyEngine::Remote
                } else {
                    BodyEngine::Local
                };
                (engine, attachments)
            }
            FlagOutcome::Failed => {
                trail.push(FLAG_EVAL_ERROR.to_string());
                trail.push(format!("default:body={}", BodyEngine::Local));
                (BodyEngine::Local, false)
            }
            FlagOutcome::NotEvaluated => {
                trail.push(format!("default:body={}", BodyEngine::Local));
                (BodyEngine::Local, false)
            }
        },
    };

    if overrides.force_attachment_conversion {
        trail.push("override:attachments=forced".to_string());
        convert_attachments = true;
    }

    EngineDecision {
        body_engine,
        convert_attachments,
        reason_trail: trail,
    }
}

/// Gathers override and flag inputs, then delegates to [`decide`].
pub struct EngineDecisionResolver {
    flags: Arc<dyn FlagService>,
    overrides: EngineOverrides,
    flag_timeout: Duration,
}

impl EngineDecisionResolver {
    pub fn new(
        flags: Arc<dyn FlagService>,
        overrides: EngineOverrides,
        flag_timeout: Duration,
    ) -> Self {
        Self {
            flags,
            overrides,
            flag_timeout,
        }
    }

    /// Produce the engine decision for one ingestion.
    ///
    /// Never fails: a slow or broken flag service yields the disabled
    /// decision tagged with `flag_eval_error`.
    pub async fn decide(&self, context: &FlagContext) -> EngineDecision {
        let has_valid_override = self
            .overrides
            .body_engine
            .as_deref()
            .and_then(BodyEngine::parse_override)
            .is_some();

        let outcome = if has_valid_override {
            FlagOutcome::NotEvaluated
        } else {
            self.evaluate_flags(context).await
        };

        let decision = decide(&self.overrides, outcome);
        info!(
            user_id = context.user_id.as_deref().unwrap_or("-"),
            body_engine = %decision.body_engine,
            convert_attachments = decision.convert_attachments,
            trail = ?decision.reason_trail,
            "Engine decision"
        );
        decision
    }

    async fn evaluate_flags(&self, context: &FlagContext) -> FlagOutcome {
        let (body, attachments) = tokio::join!(
            self.evaluate(BODY_ENGINE_FLAG, context),
            self.evaluate(ATTACHMENT_CONVERSION_FLAG, context),
        );

        match (body, attachments) {
            (Ok(body_remote), Ok(attachments)) => {
                debug!(body_remote, attachments, "Flags evaluated");
                FlagOutcome::Evaluated {
                    body_remote,
                    attachments,
                }
            }
            (body, attachments) => {
                for err in [body.err(), attachments.err()].into_iter().flatten() {
                    warn!(error = %err, "Flag evaluation failed, failing closed");
                }
                FlagOutcome::Failed
            }
        }
    }

    async fn evaluate(&self, flag: &str, context: &FlagContext) -> Result<bool, FlagError> {
        match tokio::time::timeout(self.flag_timeout, self.flags.is_enabled(flag, context)).await
        {
            Ok(result) => result,
            Err(_) => Err(FlagError::Timeout {
                flag: flag.to_string(),
                timeout: self.flag_timeout,
            }),
        }
    }
}
