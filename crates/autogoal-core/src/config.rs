//! Layered configuration
//!
//! Precedence, lowest first:
//! 1. [`Default`] values
//! 2. An optional `.toml` / `.yaml` file
//! 3. `GOAL_*` environment variables
//!
//! [`AutonomyConfig::clamped`] runs last so out-of-range values never reach
//! the dispatch path.

use crate::error::ConfigError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// Retry, lease and idempotency settings of the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub lease_ttl_seconds: u64,
    pub idempotency_ttl_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff_ms: 15_000,
            max_backoff_ms: 300_000,
            lease_ttl_seconds: 120,
            idempotency_ttl_seconds: 3_600,
        }
    }
}

impl OrchestratorConfig {
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.base_backoff_ms = base_ms;
        self.max_backoff_ms = max_ms;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_lease_ttl_seconds(mut self, seconds: u64) -> Self {
        self.lease_ttl_seconds = seconds;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_idempotency_ttl_seconds(mut self, seconds: u64) -> Self {
        self.idempotency_ttl_seconds = seconds;
        self
    }

    /// Clamp every option into its supported range
    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            max_retries: self.max_retries.min(10),
            base_backoff_ms: self.base_backoff_ms.clamp(1_000, 900_000),
            max_backoff_ms: self.max_backoff_ms.clamp(1_000, 3_600_000),
            lease_ttl_seconds: self.lease_ttl_seconds.clamp(30, 3_600),
            idempotency_ttl_seconds: self.idempotency_ttl_seconds.clamp(30, 604_800),
        }
    }

    /// `min(base * 2^(failed_attempts - 1), max)`
    #[must_use]
    pub fn backoff_ms(&self, failed_attempts: u32) -> u64 {
        let exponent = failed_attempts.saturating_sub(1).min(32);
        self.base_backoff_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.max_backoff_ms)
    }

    #[inline]
    #[must_use]
    pub fn lease_ttl(&self) -> Duration {
        Duration::seconds(i64::try_from(self.lease_ttl_seconds).unwrap_or(i64::MAX / 1_000))
    }

    #[inline]
    #[must_use]
    pub fn idempotency_ttl(&self) -> Duration {
        Duration::seconds(i64::try_from(self.idempotency_ttl_seconds).unwrap_or(i64::MAX / 1_000))
    }
}

/// One week; upper bound of every minute-valued admission window
const MAX_WINDOW_MINUTES: i64 = 10_080;
/// Snapshots older than a day are never fresh
const MAX_STALE_SIGNAL_MINUTES: i64 = 1_440;

/// Admission thresholds of the priority engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityPolicy {
    pub min_confidence: f64,
    pub dedup_window_minutes: i64,
    pub stale_signal_minutes: i64,
    pub default_ttl_minutes: i64,
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            dedup_window_minutes: 30,
            stale_signal_minutes: 90,
            default_ttl_minutes: 60,
        }
    }
}

impl PriorityPolicy {
    #[inline]
    #[must_use]
    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_stale_signal_minutes(mut self, minutes: i64) -> Self {
        self.stale_signal_minutes = minutes;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_dedup_window_minutes(mut self, minutes: i64) -> Self {
        self.dedup_window_minutes = minutes;
        self
    }

    #[must_use]
    pub fn clamped(self) -> Self {
        let min_confidence = if self.min_confidence.is_nan() {
            Self::default().min_confidence
        } else {
            self.min_confidence.clamp(0.0, 1.0)
        };
        Self {
            min_confidence,
            dedup_window_minutes: self.dedup_window_minutes.clamp(0, MAX_WINDOW_MINUTES),
            stale_signal_minutes: self.stale_signal_minutes.clamp(1, MAX_STALE_SIGNAL_MINUTES),
            default_ttl_minutes: self.default_ttl_minutes.clamp(1, MAX_WINDOW_MINUTES),
        }
    }

    #[inline]
    #[must_use]
    pub fn goal_ttl(&self) -> Duration {
        Duration::minutes(self.default_ttl_minutes)
    }
}

/// Transport settings of the LLM enhancer
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancerConfig {
    pub base_url: String,
    pub model: String,
    /// Never serialized back out
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for EnhancerConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_ms: 8_000,
        }
    }
}

impl std::fmt::Debug for EnhancerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnhancerConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Candidate generator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub max_candidates: usize,
    pub llm_enhancer_enabled: bool,
    pub enhancer: EnhancerConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_candidates: 5,
            llm_enhancer_enabled: false,
            enhancer: EnhancerConfig::default(),
        }
    }
}

/// Full engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutonomyConfig {
    pub orchestrator: OrchestratorConfig,
    pub priority: PriorityPolicy,
    pub generator: GeneratorConfig,
}

impl AutonomyConfig {
    /// Defaults, then `path` if given, then the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(base.with_env_overrides(|name| std::env::var(name).ok()).clamped())
    }

    /// Parse a `.toml`, `.yaml` or `.yml` file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_err = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&raw).map_err(|e| parse_err(e.to_string())),
            Some("yaml" | "yml") => serde_yaml::from_str(&raw).map_err(|e| parse_err(e.to_string())),
            other => Err(ConfigError::UnsupportedFormat(other.unwrap_or("").to_string())),
        }
    }

    /// Apply `GOAL_*` overrides read through `lookup`
    #[must_use]
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let o = &mut self.orchestrator;
        override_parsed(&lookup, "GOAL_ORCHESTRATOR_MAX_RETRIES", &mut o.max_retries);
        override_parsed(&lookup, "GOAL_ORCHESTRATOR_BASE_BACKOFF_MS", &mut o.base_backoff_ms);
        override_parsed(&lookup, "GOAL_ORCHESTRATOR_MAX_BACKOFF_MS", &mut o.max_backoff_ms);
        override_parsed(&lookup, "GOAL_ORCHESTRATOR_LEASE_TTL_SECONDS", &mut o.lease_ttl_seconds);
        override_parsed(
            &lookup,
            "GOAL_ORCHESTRATOR_IDEMPOTENCY_TTL_SECONDS",
            &mut o.idempotency_ttl_seconds,
        );

        let p = &mut self.priority;
        override_parsed(&lookup, "GOAL_MIN_CONFIDENCE", &mut p.min_confidence);
        override_parsed(&lookup, "GOAL_DEDUP_WINDOW_MINUTES", &mut p.dedup_window_minutes);
        override_parsed(&lookup, "GOAL_STALE_SIGNAL_MINUTES", &mut p.stale_signal_minutes);
        override_parsed(&lookup, "GOAL_DEFAULT_TTL_MINUTES", &mut p.default_ttl_minutes);

        let g = &mut self.generator;
        if let Some(raw) = lookup("GOAL_CANDIDATE_LLM_ENABLED") {
            match parse_flag(&raw) {
                Some(flag) => g.llm_enhancer_enabled = flag,
                None => tracing::warn!(var = "GOAL_CANDIDATE_LLM_ENABLED", value = %raw, "ignoring invalid flag"),
            }
        }
        if let Some(key) = lookup("GOAL_ENHANCER_API_KEY").filter(|k| !k.trim().is_empty()) {
            g.enhancer.api_key = Some(key);
        }
        if let Some(url) = lookup("GOAL_ENHANCER_BASE_URL").filter(|u| !u.trim().is_empty()) {
            g.enhancer.base_url = url;
        }
        if let Some(model) = lookup("GOAL_ENHANCER_MODEL").filter(|m| !m.trim().is_empty()) {
            g.enhancer.model = model;
        }
        self
    }

    #[must_use]
    pub fn clamped(self) -> Self {
        Self {
            orchestrator: self.orchestrator.clamped(),
            priority: self.priority.clamped(),
            generator: GeneratorConfig {
                max_candidates: self.generator.max_candidates.max(1),
                ..self.generator
            },
        }
    }
}

fn override_parsed<T, F>(lookup: &F, name: &str, slot: &mut T)
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else { return };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(var = name, value = %raw, "ignoring unparseable environment override"),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
