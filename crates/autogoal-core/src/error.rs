//! Error types for Autogoal Core
//!
//! Goal-level outcomes (suppression, contention, retries, DLQ) are not
//! errors; they travel as structured results. The types here cover:
//! - Signal collection and store failures surfaced by the engine facade
//! - Enhancer transport and parse failures (always downgraded to a fallback)
//! - Planner exceptions (fed into the retry loop)
//! - Configuration loading

use autogoal_store::StoreError;
use std::path::PathBuf;

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum AutonomyError {
    /// Persistence failure
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The signal source could not produce a snapshot
    #[error("signal collection failed: {0}")]
    SignalCollection(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Enhancer failure that escaped the fallback path
    #[error("enhancer error: {0}")]
    Enhancer(#[from] EnhancerError),
}

impl AutonomyError {
    /// Check if the failed call is worth repeating
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            Self::SignalCollection(_) => true,
            Self::Enhancer(e) => e.is_retryable(),
            Self::Config(_) => false,
        }
    }
}

/// Why enhancement was skipped or rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    Disabled,
    MissingApiKey,
    RequestFailed,
    ParseFailed,
    EmptyResponse,
}

impl FallbackReason {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::MissingApiKey => "missing_api_key",
            Self::RequestFailed => "request_failed",
            Self::ParseFailed => "parse_failed",
            Self::EmptyResponse => "empty_response",
        }
    }
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text completion / enhancer failures
#[derive(Debug, thiserror::Error)]
pub enum EnhancerError {
    /// No credential configured
    #[error("no API key configured for the enhancer")]
    MissingApiKey,

    /// Transport failure
    #[error("completion request failed: {0}")]
    Request(String),

    /// Non-success HTTP status
    #[error("completion endpoint returned {status}: {body}")]
    Http { status: u16, body: String },

    /// Response was not the expected JSON shape
    #[error("could not parse completion: {0}")]
    Parse(String),

    /// Completion carried no usable rewrite
    #[error("completion returned no candidates")]
    EmptyResponse,
}

impl EnhancerError {
    /// Fallback code reported when this error aborts enhancement
    #[must_use]
    pub const fn fallback_reason(&self) -> FallbackReason {
        match self {
            Self::MissingApiKey => FallbackReason::MissingApiKey,
            Self::Request(_) | Self::Http { .. } => FallbackReason::RequestFailed,
            Self::Parse(_) => FallbackReason::ParseFailed,
            Self::EmptyResponse => FallbackReason::EmptyResponse,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Exceptions thrown by a goal planner
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlannerError {
    /// Execution aborted with a message
    #[error("{0}")]
    Execution(String),

    /// Planner gave up waiting on infrastructure
    #[error("planner timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// Planner backend not reachable
    #[error("planner unavailable: {0}")]
    Unavailable(String),
}

impl PlannerError {
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Execution(_))
    }
}

/// Configuration loading failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File contents did not match the config schema
    #[error("cannot parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// Extension is neither toml nor yaml
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),
}
