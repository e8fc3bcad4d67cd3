//! Completion Backend Abstraction
//!
//! Defines the [`CompletionBackend`] trait every model vendor implements and
//! the request/response types shared across them. Stage code never talks to
//! a backend directly; it goes through [`crate::ai::Gateway`], which picks the
//! backend, records metrics, and maps failures onto [`CompletionError`].
//!
//! ## Modules
//!
//! - `openai`: OpenAI-compatible chat completions (Kimi, OpenAI, Grok, Perplexity)
//! - `anthropic`: Anthropic Messages API
//! - `gemini`: Google Generative Language API

mod anthropic;
mod gemini;
mod openai;

#[cfg(test)]
pub mod testing;

pub use anthropic::AnthropicBackend;
pub use gemini::GeminiBackend;
pub use openai::OpenAiCompatibleBackend;

pub use crate::types::{CompletionError, CompletionResult, ErrorCategory, ErrorClassifier};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendKind, Credentials, LlmConfig};

// =============================================================================
// Messages & Requests
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One text completion call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Explicit backend; `None` uses the configured default
    pub backend: Option<BackendKind>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            max_tokens: 4096,
            temperature: 0.4,
            backend: None,
        }
    }

    /// System instruction plus a single user turn
    pub fn prompt(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self::new(vec![Message::system(system), Message::user(user)])
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn settings(self, settings: crate::config::CallSettings) -> Self {
        self.max_tokens(settings.max_tokens)
            .temperature(settings.temperature)
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.backend = Some(backend);
        self
    }

    /// The combined system instructions, if any
    pub fn system_text(&self) -> Option<String> {
        let parts: Vec<&str> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        (!parts.is_empty()).then(|| parts.join("\n\n"))
    }

    /// Content of the last user turn
    pub fn last_user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Text extraction from one image
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub instruction: String,
    pub system: Option<String>,
    /// `data:<mime>;base64,<payload>`
    pub image_data_uri: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub backend: Option<BackendKind>,
}

impl VisionRequest {
    /// The MIME type and base64 payload of the embedded image
    pub fn image_parts(&self) -> (&str, &str) {
        let rest = self
            .image_data_uri
            .strip_prefix("data:")
            .unwrap_or(&self.image_data_uri);
        match rest.split_once(";base64,") {
            Some((mime, data)) => (mime, data),
            None => ("image/jpeg", rest),
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: TokenUsage,
    pub timing: ResponseTiming,
    pub metadata: ResponseMetadata,
}

/// A source returned by a retrieval-augmented backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone)]
pub struct CitedCompletion {
    pub completion: Completion,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseTiming {
    pub total_ms: u64,
}

impl ResponseTiming {
    pub fn from_duration(duration: Duration) -> Self {
        Self {
            total_ms: duration.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseMetadata {
    pub model: String,
    pub backend: String,
}

// =============================================================================
// Backend Trait
// =============================================================================

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Run a text completion
    async fn complete(&self, request: &CompletionRequest) -> CompletionResult<Completion>;

    /// Run a completion that also returns source citations.
    ///
    /// Backends without retrieval return no citations.
    async fn complete_with_citations(
        &self,
        request: &CompletionRequest,
    ) -> CompletionResult<CitedCompletion> {
        let completion = self.complete(request).await?;
        Ok(CitedCompletion {
            completion,
            citations: Vec::new(),
        })
    }

    /// Extract text from an image
    async fn vision_complete(&self, request: &VisionRequest) -> CompletionResult<Completion>;

    fn name(&self) -> &str;

    fn model(&self) -> &str;
}

pub type SharedBackend = Arc<dyn CompletionBackend>;

/// HTTP settings shared by every backend
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl HttpSettings {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            read_timeout: Duration::from_secs(config.read_timeout_secs),
        }
    }

    pub fn client(&self, backend: &str) -> CompletionResult<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.connect_timeout + self.read_timeout)
            .build()
            .map_err(|e| {
                CompletionError::with_backend(
                    ErrorCategory::Unknown,
                    format!("failed to create HTTP client: {}", e),
                    backend,
                )
            })
    }
}

/// Build a backend from configuration and credentials
///
/// Fails with [`ErrorCategory::MissingCredential`] before any network call
/// when the backend's key is absent.
pub fn create_backend(
    kind: BackendKind,
    config: &LlmConfig,
    credentials: &Credentials,
) -> CompletionResult<SharedBackend> {
    let key = credentials
        .get(kind)
        .cloned()
        .ok_or_else(|| CompletionError::missing_credential(kind.as_str(), kind.credential_var()))?;
    let http = HttpSettings::from_config(config);

    let backend: SharedBackend = match kind {
        BackendKind::Kimi | BackendKind::OpenAi | BackendKind::Grok | BackendKind::Perplexity => {
            Arc::new(OpenAiCompatibleBackend::new(
                kind,
                key,
                config.base_url(kind),
                config.model(kind),
                config.vision_model(kind),
                &http,
            )?)
        }
        BackendKind::Claude => Arc::new(AnthropicBackend::new(
            key,
            config.base_url(kind),
            config.model(kind),
            &http,
        )?),
        BackendKind::Gemini => Arc::new(GeminiBackend::new(
            key,
            config.base_url(kind),
            config.model(kind),
            &http,
        )?),
    };

    Ok(backend)
}

/// Error for a 2xx response with nothing usable in it
pub(crate) fn empty_response(backend: &str) -> CompletionError {
    CompletionError::with_backend(
        ErrorCategory::ParseError,
        "response contained no text",
        backend,
    )
}

/// Turn a non-2xx response into a classified error
pub(crate) async fn status_error(response: reqwest::Response, backend: &str) -> CompletionError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(500).collect();
    ErrorClassifier::classify_http_status(
        status.as_u16(),
        &format!("HTTP {}: {}", status, snippet),
        backend,
    )
}
