//! OCR with escalating compression.
//!
//! A run is a small state machine over ladder indices: start at the plan's
//! first index, advance on every failed attempt (never backwards), stop on
//! success, on running off the end of the ladder, or at the attempt cap.
//! Each run builds its own [`AttemptPlan`]; the ladder itself is never
//! changed, so concurrent runs of any tier cannot affect one another.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::OcrConfig;
use crate::error::OcrError;
use crate::metrics::{ConversionType, MetricContext, MetricsRecorder};
use crate::ocr::ladder::{CompressionLadder, CompressionLevel, compress};
use crate::ocr::tier::PriorityTier;

/// Engine name used in metrics for OCR work.
pub const OCR_ENGINE: &str = "ocr";

// ── Collaborator ───────────────────────────────────────────────────────

/// The text-recognition primitive. May fail, or succeed with too little
/// text to be useful.
#[async_trait]
pub trait OcrPrimitive: Send + Sync {
    async fn recognize(&self, bytes: &[u8], content_type: &str) -> Result<String, OcrError>;
}

#[derive(Deserialize)]
struct OcrResponse {
    text: String,
}

/// OCR service reached over HTTP: the raw bytes are POSTed, `{"text": ...}`
/// comes back.
pub struct HttpOcrPrimitive {
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpOcrPrimitive {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl OcrPrimitive for HttpOcrPrimitive {
    async fn recognize(&self, bytes: &[u8], content_type: &str) -> Result<String, OcrError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OcrError::Timeout(self.timeout)
                } else {
                    OcrError::RequestFailed(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(OcrError::RequestFailed(format!("HTTP {}", resp.status())));
        }

        let body: OcrResponse = resp
            .json()
            .await
            .map_err(|e| OcrError::RequestFailed(format!("invalid response: {e}")))?;
        Ok(body.text)
    }
}

/// Stand-in when no OCR service is configured. Every call fails with a
/// configuration error.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredOcr;

#[async_trait]
impl OcrPrimitive for UnconfiguredOcr {
    async fn recognize(&self, _bytes: &[u8], _content_type: &str) -> Result<String, OcrError> {
        Err(OcrError::RequestFailed("OCR service is not configured".to_string()))
    }
}

// ── Request / result ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OcrRequest {
    pub document_id: String,
    pub owner_id: String,
    pub content_type: String,
    pub bytes: Arc<[u8]>,
    pub tier: PriorityTier,
}

impl OcrRequest {
    pub fn new(
        document_id: impl Into<String>,
        owner_id: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
        tier: PriorityTier,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            owner_id: owner_id.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
            tier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success { text: String },
    Failure { error: String },
}

/// One attempt within a run. Lives only as long as the run's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrAttempt {
    /// 1-based.
    pub attempt_number: u32,
    pub level_index: usize,
    pub level: String,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrSuccess {
    pub text: String,
    pub attempts: u32,
    /// Telemetry label, e.g. `batch_progressive_compression`.
    pub strategy: String,
    pub final_level: String,
    pub history: Vec<OcrAttempt>,
}

// ── Plan ───────────────────────────────────────────────────────────────

/// Request-scoped view of the ladder for one tier.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptPlan {
    pub tier: PriorityTier,
    /// Index of the first attempt.
    pub start: usize,
    /// Lowest index any retry may use.
    pub retry_floor: usize,
    /// Highest usable index.
    pub last: usize,
    pub max_attempts: u32,
    pub delay: Duration,
    pub jitter: Duration,
}

impl AttemptPlan {
    pub fn for_tier(tier: PriorityTier, ladder: &CompressionLadder, config: &OcrConfig) -> Self {
        let last = ladder.last_index();
        let (start, retry_floor, delay, jitter) = match tier {
            PriorityTier::Immediate => (0, ladder.aggressive_from(), Duration::ZERO, Duration::ZERO),
            PriorityTier::Batch => (0, 0, config.batch_delay, config.batch_jitter),
            PriorityTier::Background => (last, last, Duration::ZERO, Duration::ZERO),
        };
        Self {
            tier,
            start,
            retry_floor,
            last,
            max_attempts: config.max_attempts.max(1),
            delay,
            jitter,
        }
    }

    /// Index after a failure at `current`, or `None` when the ladder is spent.
    pub fn next(&self, current: usize) -> Option<usize> {
        let next = (current + 1).max(self.retry_floor);
        (next <= self.last).then_some(next)
    }

    /// Every index this plan will try, in order, if every attempt fails.
    pub fn indices(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut index = Some(self.start.min(self.last));
        while let Some(i) = index {
            if out.len() as u32 >= self.max_attempts {
                break;
            }
            out.push(i);
            index = self.next(i);
        }
        out
    }

    /// Pause before the next attempt.
    pub fn pause(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.delay;
        }
        self.delay + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    fn strategy(&self, attempts: u32) -> &'static str {
        match self.tier {
            PriorityTier::Immediate if attempts <= 1 => "immediate_direct",
            PriorityTier::Immediate => "immediate_retry_with_compression",
            PriorityTier::Batch => "batch_progressive_compression",
            PriorityTier::Background => "background_aggressive_compression",
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────────────

pub struct OcrRetryEngine {
    ladder: CompressionLadder,
    config: OcrConfig,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl OcrRetryEngine {
    pub fn new(ladder: CompressionLadder, config: OcrConfig) -> Self {
        Self {
            ladder,
            config,
            metrics: None,
        }
    }

    /// Record one outcome (and a retry count) per run.
    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn ladder(&self) -> &CompressionLadder {
        &self.ladder
    }

    pub fn plan(&self, tier: PriorityTier) -> AttemptPlan {
        AttemptPlan::for_tier(tier, &self.ladder, &self.config)
    }

    /// OCR one document, escalating compression until text comes back.
    ///
    /// `Err` is always [`OcrError::Exhausted`]; callers should not retry it.
    pub async fn run(&self, request: &OcrRequest, primitive: &dyn OcrPrimitive) -> Result<OcrSuccess, OcrError> {
        let Some(metrics) = &self.metrics else {
            return self.run_plan(request, primitive).await;
        };

        let ctx = MetricContext {
            email_id: None,
            owner_id: Some(request.owner_id.clone()),
            filename: Some(request.document_id.clone()),
            file_size: Some(request.bytes.len() as u64),
        };
        let result = metrics
            .measure_conversion(OCR_ENGINE, ConversionType::Attachment, &ctx, || {
                self.run_plan(request, primitive)
            })
            .await;

        let attempts = match &result {
            Ok(success) => success.attempts,
            Err(OcrError::Exhausted { attempts, .. }) => *attempts,
            Err(_) => 1,
        };
        if attempts > 1 {
            metrics.record_retry(OCR_ENGINE, ConversionType::Attachment, attempts - 1, &ctx);
        }
        result
    }

    async fn run_plan(&self, request: &OcrRequest, primitive: &dyn OcrPrimitive) -> Result<OcrSuccess, OcrError> {
        let plan = self.plan(request.tier);
        let started = Instant::now();
        let mut history: Vec<OcrAttempt> = Vec::new();
        let mut last_error: Option<OcrError> = None;
        let mut index = Some(plan.start.min(plan.last));

        while let Some(i) = index {
            if history.len() as u32 >= plan.max_attempts {
                break;
            }
            let Some(level) = self.ladder.level(i) else {
                break;
            };
            if !history.is_empty() {
                let pause = plan.pause();
                if !pause.is_zero() {
                    tokio::time::sleep(pause).await;
                }
            }

            let attempt_number = history.len() as u32 + 1;
            debug!(
                document_id = %request.document_id,
                tier = %plan.tier,
                attempt = attempt_number,
                level = %level.name,
                "OCR attempt"
            );

            match self.attempt(request, level, primitive).await {
                Ok(text) => {
                    history.push(OcrAttempt {
                        attempt_number,
                        level_index: i,
                        level: level.name.clone(),
                        outcome: AttemptOutcome::Success { text: text.clone() },
                    });
                    let strategy = plan.strategy(attempt_number).to_string();
                    info!(
                        document_id = %request.document_id,
                        attempts = attempt_number,
                        strategy = %strategy,
                        level = %level.name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "OCR succeeded"
                    );
                    return Ok(OcrSuccess {
                        text,
                        attempts: attempt_number,
                        strategy,
                        final_level: level.name.clone(),
                        history,
                    });
                }
                Err(e) => {
                    warn!(
                        document_id = %request.document_id,
                        attempt = attempt_number,
                        level = %level.name,
                        error = %e,
                        "OCR attempt failed"
                    );
                    history.push(OcrAttempt {
                        attempt_number,
                        level_index: i,
                        level: level.name.clone(),
                        outcome: AttemptOutcome::Failure { error: e.to_string() },
                    });
                    last_error = Some(e);
                    index = plan.next(i);
                }
            }
        }

        let attempts = history.len() as u32;
        let last_error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt was made".to_string());
        warn!(
            document_id = %request.document_id,
            tier = %plan.tier,
            attempts,
            error = %last_error,
            "OCR exhausted"
        );
        Err(OcrError::Exhausted {
            document_id: request.document_id.clone(),
            attempts,
            last_error,
        })
    }

    async fn attempt(
        &self,
        request: &OcrRequest,
        level: &CompressionLevel,
        primitive: &dyn OcrPrimitive,
    ) -> Result<String, OcrError> {
        let (input, content_type) = if level.is_passthrough() {
            (request.bytes.to_vec(), request.content_type.clone())
        } else {
            let bytes = Arc::clone(&request.bytes);
            let source_type = request.content_type.clone();
            let owned_level = level.clone();
            let compressed = tokio::task::spawn_blocking(move || compress(&bytes, &source_type, &owned_level))
                .await
                .map_err(|e| OcrError::Compression {
                    level: level.name.clone(),
                    reason: e.to_string(),
                })??;
            let content_type = if compressed.as_slice() == &request.bytes[..] {
                request.content_type.clone()
            } else {
                "image/jpeg".to_string()
            };
            (compressed, content_type)
        };

        let text = primitive.recognize(&input, &content_type).await?;
        let found = text.chars().filter(|c| !c.is_whitespace()).count();
        if found < self.config.min_text_chars {
            return Err(OcrError::InadequateText {
                found,
                required: self.config.min_text_chars,
            });
        }
        Ok(text)
    }
}
