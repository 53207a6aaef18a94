//! Configuration types.
//!
//! Everything is read from `MAIL_INGEST_*` environment variables once at
//! startup. Unparseable values fall back to defaults with a warning; the raw
//! body-engine override is kept as a string so an invalid value shows up in
//! the decision's reason trail instead of being silently dropped.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use tracing::warn;

use crate::ocr::tier::TierPolicy;

/// Operator-set overrides for engine selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineOverrides {
    /// Raw `MAIL_INGEST_BODY_ENGINE` value, if set.
    pub body_engine: Option<String>,
    /// Force attachment conversion regardless of flags.
    pub force_attachment_conversion: bool,
}

impl EngineOverrides {
    fn from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Self {
        Self {
            body_engine: lookup("MAIL_INGEST_BODY_ENGINE")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            force_attachment_conversion: lookup("MAIL_INGEST_FORCE_ATTACHMENT_CONVERSION")
                .map(|s| parse_bool(&s))
                .unwrap_or(false),
        }
    }
}

/// Endpoints and credentials for the external collaborators.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Feature-flag evaluation endpoint. `None` → static flags (all off).
    pub flag_url: Option<String>,
    /// Upper bound on a single flag evaluation.
    pub flag_timeout: Duration,
    /// Remote conversion service (engine A).
    pub remote_converter_url: Option<String>,
    /// Local rendering sidecar (engine B).
    pub local_renderer_url: Option<String>,
    /// Bearer token for the conversion services.
    pub converter_api_key: Option<SecretString>,
    /// Upper bound on a single conversion request.
    pub convert_timeout: Duration,
    /// OCR service endpoint.
    pub ocr_url: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            flag_url: None,
            flag_timeout: Duration::from_millis(1500),
            remote_converter_url: None,
            local_renderer_url: None,
            converter_api_key: None,
            convert_timeout: Duration::from_secs(60),
            ocr_url: None,
        }
    }
}

/// Attachment storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory backing the local object store.
    pub base_dir: PathBuf,
    /// Logical root prefix of every object path.
    pub path_root: String,
    /// Attachments above this size are rejected before any write.
    pub max_attachment_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./data/objects"),
            path_root: "emails".to_string(),
            max_attachment_bytes: 25 * 1024 * 1024,
        }
    }
}

/// OCR retry engine configuration.
#[derive(Debug, Clone)]
pub struct OcrConfig {
    /// Hard cap on attempts per document, applied to every tier.
    pub max_attempts: u32,
    /// Base pause between attempts for the batch tier.
    pub batch_delay: Duration,
    /// Random jitter added on top of `batch_delay`.
    pub batch_jitter: Duration,
    /// Minimum non-whitespace characters for OCR text to count as a result.
    pub min_text_chars: usize,
    /// Concurrent OCR runs considered "full load".
    pub capacity: usize,
    /// Thresholds for picking a priority tier.
    pub tier_policy: TierPolicy,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            batch_delay: Duration::from_millis(2000),
            batch_jitter: Duration::from_millis(500),
            min_text_chars: 3,
            capacity: 4,
            tier_policy: TierPolicy::default(),
        }
    }
}

/// Retention caps for the metrics recorder.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub max_metrics: usize,
    pub max_summaries: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_metrics: 1000,
            max_summaries: 100,
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub overrides: EngineOverrides,
    pub services: ServiceConfig,
    pub storage: StorageConfig,
    pub ocr: OcrConfig,
    pub metrics: MetricsConfig,
}

impl PipelineConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let services_default = ServiceConfig::default();
        let storage_default = StorageConfig::default();
        let ocr_default = OcrConfig::default();
        let metrics_default = MetricsConfig::default();
        let tier_default = TierPolicy::default();

        let services = ServiceConfig {
            flag_url: non_empty(lookup("MAIL_INGEST_FLAG_URL")),
            flag_timeout: Duration::from_millis(parse_or(
                &lookup,
                "MAIL_INGEST_FLAG_TIMEOUT_MS",
                services_default.flag_timeout.as_millis() as u64,
            )),
            remote_converter_url: non_empty(lookup("MAIL_INGEST_REMOTE_CONVERTER_URL")),
            local_renderer_url: non_empty(lookup("MAIL_INGEST_LOCAL_RENDERER_URL")),
            converter_api_key: non_empty(lookup("MAIL_INGEST_CONVERTER_API_KEY"))
                .map(SecretString::from),
            convert_timeout: Duration::from_secs(parse_or(
                &lookup,
                "MAIL_INGEST_CONVERT_TIMEOUT_SECS",
                services_default.convert_timeout.as_secs(),
            )),
            ocr_url: non_empty(lookup("MAIL_INGEST_OCR_URL")),
        };

        let storage = StorageConfig {
            base_dir: non_empty(lookup("MAIL_INGEST_STORAGE_DIR"))
                .map(PathBuf::from)
                .unwrap_or(storage_default.base_dir),
            path_root: non_empty(lookup("MAIL_INGEST_STORAGE_ROOT"))
                .unwrap_or(storage_default.path_root),
            max_attachment_bytes: parse_or(
                &lookup,
                "MAIL_INGEST_MAX_ATTACHMENT_BYTES",
                storage_default.max_attachment_bytes,
            ),
        };

        let tier_policy = TierPolicy {
            small_bytes: parse_or(&lookup, "MAIL_INGEST_TIER_SMALL_BYTES", tier_default.small_bytes),
            large_bytes: parse_or(&lookup, "MAIL_INGEST_TIER_LARGE_BYTES", tier_default.large_bytes),
            high_load: parse_or(&lookup, "MAIL_INGEST_TIER_HIGH_LOAD", tier_default.high_load),
            business_hours_start: parse_or(
                &lookup,
                "MAIL_INGEST_TIER_BUSINESS_START",
                tier_default.business_hours_start,
            ),
            business_hours_end: parse_or(
                &lookup,
                "MAIL_INGEST_TIER_BUSINESS_END",
                tier_default.business_hours_end,
            ),
        };

        let ocr = OcrConfig {
            max_attempts: parse_or(&lookup, "MAIL_INGEST_OCR_MAX_ATTEMPTS", ocr_default.max_attempts)
                .max(1),
            batch_delay: Duration::from_millis(parse_or(
                &lookup,
                "MAIL_INGEST_OCR_BATCH_DELAY_MS",
                ocr_default.batch_delay.as_millis() as u64,
            )),
            batch_jitter: Duration::from_millis(parse_or(
                &lookup,
                "MAIL_INGEST_OCR_BATCH_JITTER_MS",
                ocr_default.batch_jitter.as_millis() as u64,
            )),
            min_text_chars: parse_or(
                &lookup,
                "MAIL_INGEST_OCR_MIN_TEXT_CHARS",
                ocr_default.min_text_chars,
            ),
            capacity: parse_or(&lookup, "MAIL_INGEST_OCR_CAPACITY", ocr_default.capacity).max(1),
            tier_policy,
        };

        let metrics = MetricsConfig {
            max_metrics: parse_or(&lookup, "MAIL_INGEST_METRICS_CAP", metrics_default.max_metrics)
                .max(1),
            max_summaries: parse_or(
                &lookup,
                "MAIL_INGEST_SUMMARY_CAP",
                metrics_default.max_summaries,
            )
            .max(1),
        };

        Self {
            overrides: EngineOverrides::from_lookup(&lookup),
            services,
            storage,
            ocr,
            metrics,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Unparseable configuration value, using default");
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let config = PipelineConfig::from_lookup(|_| None);
        assert_eq!(config.overrides, EngineOverrides::default());
        assert!(config.services.flag_url.is_none());
        assert_eq!(config.storage.path_root, "emails");
        assert_eq!(config.ocr.max_attempts, 4);
        assert_eq!(config.metrics.max_metrics, 1000);
        assert_eq!(config.metrics.max_summaries, 100);
    }

    #[test]
    fn reads_overrides() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("MAIL_INGEST_BODY_ENGINE", " Remote "),
            ("MAIL_INGEST_FORCE_ATTACHMENT_CONVERSION", "yes"),
        ]));
        assert_eq!(config.overrides.body_engine.as_deref(), Some("Remote"));
        assert!(config.overrides.force_attachment_conversion);
    }

    #[test]
    fn blank_override_is_unset() {
        let config =
            PipelineConfig::from_lookup(lookup_from(&[("MAIL_INGEST_BODY_ENGINE", "   ")]));
        assert!(config.overrides.body_engine.is_none());
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("MAIL_INGEST_OCR_MAX_ATTEMPTS", "lots"),
            ("MAIL_INGEST_FLAG_TIMEOUT_MS", "250"),
        ]));
        assert_eq!(config.ocr.max_attempts, 4);
        assert_eq!(config.services.flag_timeout, Duration::from_millis(250));
    }

    #[test]
    fn zero_caps_are_clamped() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("MAIL_INGEST_OCR_MAX_ATTEMPTS", "0"),
            ("MAIL_INGEST_METRICS_CAP", "0"),
        ]));
        assert_eq!(config.ocr.max_attempts, 1);
        assert_eq!(config.metrics.max_metrics, 1);
    }

    #[test]
    fn tier_thresholds_are_tunable() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("MAIL_INGEST_TIER_LARGE_BYTES", "1024"),
            ("MAIL_INGEST_TIER_HIGH_LOAD", "0.5"),
        ]));
        assert_eq!(config.ocr.tier_policy.large_bytes, 1024);
        assert!((config.ocr.tier_policy.high_load - 0.5).abs() < f64::EPSILON);
    }
}
