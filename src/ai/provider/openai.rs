//! OpenAI-compatible Chat Completions Backend
//!
//! Serves every vendor that speaks the `/chat/completions` wire format:
//! Kimi (Moonshot), OpenAI, Grok and Perplexity. Perplexity additionally
//! returns `citations` / `search_results`, which surface through
//! [`CompletionBackend::complete_with_citations`].

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::{
    Citation, CitedCompletion, Completion, CompletionBackend, CompletionRequest,
    CompletionResult, ErrorClassifier, HttpSettings, ResponseMetadata, ResponseTiming, TokenUsage,
    VisionRequest, empty_response, status_error,
};
use crate::config::BackendKind;

pub struct OpenAiCompatibleBackend {
    kind: BackendKind,
    api_key: SecretString,
    base_url: String,
    model: String,
    vision_model: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompatibleBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleBackend")
            .field("kind", &self.kind)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("vision_model", &self.vision_model)
            .finish()
    }
}

impl OpenAiCompatibleBackend {
    pub fn new(
        kind: BackendKind,
        api_key: SecretString,
        base_url: String,
        model: String,
        vision_model: String,
        http: &HttpSettings,
    ) -> CompletionResult<Self> {
        Ok(Self {
            kind,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            vision_model,
            client: http.client(kind.as_str())?,
        })
    }

    async fn send(&self, body: &ChatCompletionRequest) -> CompletionResult<(ChatCompletionResponse, u64)> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(backend = %self.kind, model = %body.model, "POST {}", url);

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e, self.kind.as_str()))?;

        if !response.status().is_success() {
            return Err(status_error(response, self.kind.as_str()).await);
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e, self.kind.as_str()))?;

        Ok((parsed, start.elapsed().as_millis() as u64))
    }

    fn completion(&self, response: &ChatCompletionResponse, model: &str, elapsed_ms: u64) -> CompletionResult<Completion> {
        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| empty_response(self.kind.as_str()))?;

        let usage = response
            .usage
            .as_ref()
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(Completion {
            text: text.trim().to_string(),
            usage,
            timing: ResponseTiming { total_ms: elapsed_ms },
            metadata: ResponseMetadata {
                model: model.to_string(),
                backend: self.kind.as_str().to_string(),
            },
        })
    }

    fn text_request(&self, request: &CompletionRequest) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|m| ChatMessage {
                    role: m.role.as_str().to_string(),
                    content: MessageContent::Text(m.content.clone()),
                })
                .collect(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[async_trait]
impl CompletionBackend for OpenAiCompatibleBackend {
    async fn complete(&self, request: &CompletionRequest) -> CompletionResult<Completion> {
        let body = self.text_request(request);
        let (response, elapsed) = self.send(&body).await?;
        self.completion(&response, &self.model, elapsed)
    }

    async fn complete_with_citations(
        &self,
        request: &CompletionRequest,
    ) -> CompletionResult<CitedCompletion> {
        let body = self.text_request(request);
        let (response, elapsed) = self.send(&body).await?;
        let completion = self.completion(&response, &self.model, elapsed)?;
        Ok(CitedCompletion {
            completion,
            citations: response.citations(),
        })
    }

    async fn vision_complete(&self, request: &VisionRequest) -> CompletionResult<Completion> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: MessageContent::Text(system.clone()),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: MessageContent::Parts(vec![
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: request.image_data_uri.clone(),
                    },
                },
                ContentPart::Text {
                    text: request.instruction.clone(),
                },
            ]),
        });

        let body = ChatCompletionRequest {
            model: self.vision_model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };
        let (response, elapsed) = self.send(&body).await?;
        self.completion(&response, &self.vision_model, elapsed)
    }

    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: MessageContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Option<UsageInfo>,
    #[serde(default)]
    citations: Vec<String>,
    #[serde(default)]
    search_results: Vec<SearchResult>,
}

impl ChatCompletionResponse {
    /// Sources in the order the backend numbered them
    fn citations(&self) -> Vec<Citation> {
        if !self.search_results.is_empty() {
            return self
                .search_results
                .iter()
                .map(|r| {
                    let url = r.url.clone().unwrap_or_default();
                    let title = r
                        .title
                        .clone()
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| url.clone());
                    Citation { url, title }
                })
                .collect();
        }
        self.citations
            .iter()
            .map(|url| Citation {
                url: url.clone(),
                title: url.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    title: Option<String>,
    url: Option<String>,
}
