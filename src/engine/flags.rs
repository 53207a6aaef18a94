//! Feature-flag service seam.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::FlagError;

/// Flag controlling whether the body goes to the remote engine.
pub const BODY_ENGINE_FLAG: &str = "body_engine_remote";
/// Flag controlling whether attachments are converted at all.
pub const ATTACHMENT_CONVERSION_FLAG: &str = "attachment_conversion";

/// Evaluation context sent with every flag request, for staged rollout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagContext {
    pub user_id: Option<String>,
    /// Subscription tier of the owner (e.g. "free", "pro").
    pub tier: Option<String>,
    pub session_id: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl FlagContext {
    /// Context for a known user with nothing else attached.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Default::default()
        }
    }
}

/// External flag evaluation. Implementations may fail; callers fail closed.
#[async_trait]
pub trait FlagService: Send + Sync {
    async fn is_enabled(&self, flag: &str, context: &FlagContext) -> Result<bool, FlagError>;
}

/// Fixed flag values. Unknown flags evaluate to `false`.
#[derive(Debug, Clone, Default)]
pub struct StaticFlagService {
    flags: HashMap<String, bool>,
}

impl StaticFlagService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flag(mut self, flag: &str, enabled: bool) -> Self {
        self.flags.insert(flag.to_string(), enabled);
        self
    }
}

#[async_trait]
impl FlagService for StaticFlagService {
    async fn is_enabled(&self, flag: &str, _context: &FlagContext) -> Result<bool, FlagError> {
        Ok(self.flags.get(flag).copied().unwrap_or(false))
    }
}

#[derive(Serialize)]
struct FlagRequest<'a> {
    flag: &'a str,
    context: &'a FlagContext,
}

#[derive(Deserialize)]
struct FlagResponse {
    enabled: bool,
}

/// Flag service reached over HTTP.
///
/// POSTs `{"flag": ..., "context": {...}}` and expects `{"enabled": bool}`.
pub struct HttpFlagService {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpFlagService {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl FlagService for HttpFlagService {
    async fn is_enabled(&self, flag: &str, context: &FlagContext) -> Result<bool, FlagError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&FlagRequest { flag, context })
            .send()
            .await
            .map_err(|e| FlagError::RequestFailed {
                flag: flag.to_string(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(FlagError::RequestFailed {
                flag: flag.to_string(),
                reason: format!("HTTP {}", resp.status()),
            });
        }

        let body: FlagResponse = resp.json().await.map_err(|e| FlagError::InvalidResponse {
            flag: flag.to_string(),
            reason: e.to_string(),
        })?;

        Ok(body.enabled)
    }
}
