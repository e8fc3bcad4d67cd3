//! Google Gemini Backend
//!
//! The conversation is flattened into a single prompt with `[System]`,
//! `[User]` and `[Assistant]` blocks, then sent to `generateContent`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::{
    Completion, CompletionBackend, CompletionRequest, CompletionResult, ErrorClassifier,
    HttpSettings, Message, ResponseMetadata, ResponseTiming, Role, TokenUsage, VisionRequest,
    empty_response, status_error,
};

const NAME: &str = "gemini";

pub struct GeminiBackend {
    api_key: SecretString,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

/// Flatten role-tagged turns into one prompt
pub(crate) fn flatten_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let tag = match m.role {
                Role::System => "[System]",
                Role::User => "[User]",
                Role::Assistant => "[Assistant]",
            };
            format!("{}\n{}", tag, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

impl GeminiBackend {
    pub fn new(
        api_key: SecretString,
        base_url: String,
        model: String,
        http: &HttpSettings,
    ) -> CompletionResult<Self> {
        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client: http.client(NAME)?,
        })
    }

    async fn generate(&self, parts: Vec<Part>, max_tokens: u32, temperature: f32) -> CompletionResult<Completion> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        debug!(backend = NAME, model = %self.model, "POST {}", url);

        let body = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                max_output_tokens: max_tokens,
                temperature,
            },
        };

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e, NAME))?;

        if !response.status().is_success() {
            return Err(status_error(response, NAME).await);
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e, NAME))?;

        let candidate = parsed.candidates.first().ok_or_else(|| empty_response(NAME))?;
        let text: String = candidate
            .content
            .as_ref()
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(Completion {
            text: text.trim().to_string(),
            usage: parsed
                .usage_metadata
                .map(|u| TokenUsage::new(u.prompt_token_count, u.candidates_token_count))
                .unwrap_or_default(),
            timing: ResponseTiming::from_duration(start.elapsed()),
            metadata: ResponseMetadata {
                model: self.model.clone(),
                backend: NAME.to_string(),
            },
        })
    }
}

#[async_trait]
impl CompletionBackend for GeminiBackend {
    async fn complete(&self, request: &CompletionRequest) -> CompletionResult<Completion> {
        let prompt = flatten_messages(&request.messages);
        self.generate(
            vec![Part::Text { text: prompt }],
            request.max_tokens,
            request.temperature,
        )
        .await
    }

    async fn vision_complete(&self, request: &VisionRequest) -> CompletionResult<Completion> {
        let (mime_type, data) = request.image_parts();
        let mut text = request.instruction.clone();
        if let Some(system) = &request.system {
            text = format!("[System]\n{}\n\n[User]\n{}", system, text);
        }
        self.generate(
            vec![
                Part::InlineData {
                    inline_data: InlineData {
                        mime_type: mime_type.to_string(),
                        data: data.to_string(),
                    },
                },
                Part::Text { text },
            ],
            request.max_tokens,
            request.temperature,
        )
        .await
    }

    fn name(&self) -> &str {
        NAME
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_messages() {
        let flat = flatten_messages(&[
            Message::system("规则"),
            Message::user("问题"),
            Message::assistant("回答"),
        ]);
        assert_eq!(flat, "[System]\n规则\n\n[User]\n问题\n\n[Assistant]\n回答");
    }
}
