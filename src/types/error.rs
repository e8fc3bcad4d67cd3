//! Unified Error Type System
//!
//! Two layers of errors flow through the pipeline:
//!
//! - [`CompletionError`]: a failed completion call, tagged with an
//!   [`ErrorCategory`] so stage logic can decide between falling back and
//!   propagating.
//! - [`ReportError`]: everything else a stage can hit (missing artifacts,
//!   unreadable sources, configuration problems) plus wrapped completion
//!   failures.
//!
//! Designated fallback points (the retrieval lens, per-chapter citation
//! annotation, per-chapter revision) match on `CompletionError`; every other
//! completion failure propagates and aborts the current stage.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Error categories used for retry and fallback decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Rate limited by the backend
    RateLimit,
    /// Prompt or completion exceeded the model's context
    TokenLimit,
    /// Credential rejected by the backend
    Auth,
    /// Credential absent from the environment
    MissingCredential,
    /// Connectivity problems, DNS, timeouts
    Network,
    /// Backend or model not reachable
    Unavailable,
    /// Request rejected as malformed
    BadRequest,
    /// Response body could not be decoded
    ParseError,
    /// Temporary server-side failure
    Transient,
    /// Anything else
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::TokenLimit => write!(f, "TOKEN_LIMIT"),
            Self::Auth => write!(f, "AUTH"),
            Self::MissingCredential => write!(f, "MISSING_CREDENTIAL"),
            Self::Network => write!(f, "NETWORK"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
            Self::ParseError => write!(f, "PARSE_ERROR"),
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl ErrorCategory {
    /// Whether the same call might succeed if repeated later
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimit | Self::Network | Self::Transient)
    }

    /// Whether the failure stems from local configuration rather than the backend
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::MissingCredential | Self::Auth)
    }
}

// =============================================================================
// Completion Error
// =============================================================================

/// A failed completion call with category and backend context
#[derive(Debug, Clone)]
pub struct CompletionError {
    pub category: ErrorCategory,
    pub message: String,
    /// Backend that produced the error
    pub backend: Option<String>,
    /// Retry hint parsed from the response, when present
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for CompletionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(backend) = &self.backend {
            write!(f, "[{}:{}] {}", backend, self.category, self.message)
        } else {
            write!(f, "[{}] {}", self.category, self.message)
        }
    }
}

impl std::error::Error for CompletionError {}

impl CompletionError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            backend: None,
            retry_after: None,
        }
    }

    pub fn with_backend(
        category: ErrorCategory,
        message: impl Into<String>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            backend: Some(backend.into()),
            retry_after: None,
        }
    }

    /// Credential for `backend` is not configured
    pub fn missing_credential(backend: &str, env_var: &str) -> Self {
        Self::with_backend(
            ErrorCategory::MissingCredential,
            format!("no credential configured; set {}", env_var),
            backend,
        )
    }

    pub fn retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn is_transient(&self) -> bool {
        self.category.is_transient()
    }

    pub fn is_configuration(&self) -> bool {
        self.category.is_configuration()
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Maps raw backend failures onto [`ErrorCategory`]
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify a free-form error message
    pub fn classify(message: &str, backend: &str) -> CompletionError {
        let lower = message.to_lowercase();

        if lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("quota")
        {
            return CompletionError::with_backend(ErrorCategory::RateLimit, message, backend)
                .retry_after(Duration::from_secs(30));
        }

        if lower.contains("context length")
            || lower.contains("too long")
            || lower.contains("token") && (lower.contains("limit") || lower.contains("exceed"))
        {
            return CompletionError::with_backend(ErrorCategory::TokenLimit, message, backend);
        }

        if lower.contains("unauthorized")
            || lower.contains("invalid api key")
            || lower.contains("authentication")
        {
            return CompletionError::with_backend(ErrorCategory::Auth, message, backend);
        }

        if lower.contains("timed out")
            || lower.contains("timeout")
            || lower.contains("connection")
            || lower.contains("dns")
        {
            return CompletionError::with_backend(ErrorCategory::Network, message, backend)
                .retry_after(Duration::from_secs(5));
        }

        if lower.contains("overloaded") || lower.contains("temporar") {
            return CompletionError::with_backend(ErrorCategory::Transient, message, backend);
        }

        if lower.contains("decode") || lower.contains("json") || lower.contains("parse") {
            return CompletionError::with_backend(ErrorCategory::ParseError, message, backend);
        }

        CompletionError::with_backend(ErrorCategory::Unknown, message, backend)
    }

    /// Classify from an HTTP status code
    pub fn classify_http_status(status: u16, message: &str, backend: &str) -> CompletionError {
        match status {
            429 => CompletionError::with_backend(ErrorCategory::RateLimit, message, backend)
                .retry_after(Duration::from_secs(30)),
            401 | 403 => CompletionError::with_backend(ErrorCategory::Auth, message, backend),
            400 | 422 => CompletionError::with_backend(ErrorCategory::BadRequest, message, backend),
            413 => CompletionError::with_backend(ErrorCategory::TokenLimit, message, backend),
            404 => CompletionError::with_backend(ErrorCategory::Unavailable, message, backend),
            500 | 502 | 503 | 504 | 529 => {
                CompletionError::with_backend(ErrorCategory::Transient, message, backend)
                    .retry_after(Duration::from_secs(5))
            }
            _ => CompletionError::with_backend(ErrorCategory::Unknown, message, backend),
        }
    }

    /// Classify a transport-level reqwest failure
    pub fn classify_transport(err: &reqwest::Error, backend: &str) -> CompletionError {
        if err.is_timeout() || err.is_connect() {
            CompletionError::with_backend(ErrorCategory::Network, err.to_string(), backend)
                .retry_after(Duration::from_secs(5))
        } else if err.is_decode() {
            CompletionError::with_backend(ErrorCategory::ParseError, err.to_string(), backend)
        } else {
            Self::classify(&err.to_string(), backend)
        }
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Completion failed: {0}")]
    Completion(CompletionError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Required input not found: {}", path.display())]
    MissingArtifact { path: PathBuf },

    #[error("Unsupported source: {0}")]
    UnsupportedSource(String),

    #[error("Failed to extract text from {path}: {message}")]
    Extract { path: String, message: String },

    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Render error: {0}")]
    Render(String),
}

impl From<CompletionError> for ReportError {
    fn from(err: CompletionError) -> Self {
        ReportError::Completion(err)
    }
}

pub type Result<T> = std::result::Result<T, ReportError>;

/// Result of a single completion call
pub type CompletionResult<T> = std::result::Result<T, CompletionError>;

impl ReportError {
    pub fn missing(path: impl Into<PathBuf>) -> Self {
        Self::MissingArtifact { path: path.into() }
    }

    pub fn extract(path: impl AsRef<std::path::Path>, message: impl Into<String>) -> Self {
        Self::Extract {
            path: path.as_ref().display().to_string(),
            message: message.into(),
        }
    }

    /// The completion category, when this wraps a completion failure
    pub fn completion_category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Completion(e) => Some(e.category),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_transient() {
        assert!(ErrorCategory::RateLimit.is_transient());
        assert!(ErrorCategory::Network.is_transient());
        assert!(!ErrorCategory::Auth.is_transient());
        assert!(!ErrorCategory::MissingCredential.is_transient());
    }

    #[test]
    fn test_missing_credential_is_configuration() {
        let err = CompletionError::missing_credential("kimi", "KIMI_API_KEY");
        assert!(err.is_configuration());
        assert!(err.to_string().contains("KIMI_API_KEY"));
        assert!(err.to_string().starts_with("[kimi:MISSING_CREDENTIAL]"));
    }

    #[test]
    fn test_classify_http_status() {
        assert_eq!(
            ErrorClassifier::classify_http_status(429, "slow down", "kimi").category,
            ErrorCategory::RateLimit
        );
        assert_eq!(
            ErrorClassifier::classify_http_status(401, "nope", "kimi").category,
            ErrorCategory::Auth
        );
        assert_eq!(
            ErrorClassifier::classify_http_status(503, "busy", "kimi").category,
            ErrorCategory::Transient
        );
        assert_eq!(
            ErrorClassifier::classify_http_status(418, "teapot", "kimi").category,
            ErrorCategory::Unknown
        );
    }

    #[test]
    fn test_classify_message() {
        let err = ErrorClassifier::classify("Rate limit reached for requests", "openai");
        assert_eq!(err.category, ErrorCategory::RateLimit);
        assert_eq!(err.retry_after, Some(Duration::from_secs(30)));

        let err = ErrorClassifier::classify("maximum context length is 128k tokens, too long", "grok");
        assert_eq!(err.category, ErrorCategory::TokenLimit);

        let err = ErrorClassifier::classify("operation timed out", "claude");
        assert_eq!(err.category, ErrorCategory::Network);

        let err = ErrorClassifier::classify("something odd", "gemini");
        assert_eq!(err.category, ErrorCategory::Unknown);
    }

    #[test]
    fn test_report_error_wraps_completion() {
        let err: ReportError =
            CompletionError::new(ErrorCategory::Transient, "server hiccup").into();
        assert_eq!(err.completion_category(), Some(ErrorCategory::Transient));
        assert!(err.to_string().contains("server hiccup"));
    }

    #[test]
    fn test_missing_artifact_display() {
        let err = ReportError::missing("output/reports/demo_report_v1.md");
        assert_eq!(
            err.to_string(),
            "Required input not found: output/reports/demo_report_v1.md"
        );
    }
}
