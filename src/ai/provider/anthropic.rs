//! Anthropic Messages API Backend
//!
//! System turns are lifted out of the conversation into the top-level
//! `system` field; the remaining user/assistant turns are sent in order.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

use super::{
    Completion, CompletionBackend, CompletionRequest, CompletionResult, ErrorClassifier,
    HttpSettings, ResponseMetadata, ResponseTiming, Role, TokenUsage, VisionRequest,
    empty_response, status_error,
};
use crate::constants::gateway::ANTHROPIC_VERSION;

const NAME: &str = "claude";

pub struct AnthropicBackend {
    api_key: SecretString,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicBackend")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl AnthropicBackend {
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

    async fn send(&self, body: &MessagesRequest) -> CompletionResult<Completion> {
        let url = format!("{}/messages", self.base_url);
        debug!(backend = NAME, model = %self.model, "POST {}", url);

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e, NAME))?;

        if !response.status().is_success() {
            return Err(status_error(response, NAME).await);
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ErrorClassifier::classify_transport(&e, NAME))?;

        let text: String = parsed
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        if text.trim().is_empty() && parsed.content.is_empty() {
            return Err(empty_response(NAME));
        }

        Ok(Completion {
            text: text.trim().to_string(),
            usage: parsed
                .usage
                .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
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
impl CompletionBackend for AnthropicBackend {
    async fn complete(&self, request: &CompletionRequest) -> CompletionResult<Completion> {
        let messages = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: vec![ContentBlock::Text {
                    text: m.content.clone(),
                }],
            })
            .collect();

        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system_text(),
            messages,
        };
        self.send(&body).await
    }

    async fn vision_complete(&self, request: &VisionRequest) -> CompletionResult<Completion> {
        let (media_type, data) = request.image_parts();
        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system.clone(),
            messages: vec![ApiMessage {
                role: "user".to_string(),
                content: vec![
                    ContentBlock::Image {
                        source: ImageSource {
                            source_type: "base64".to_string(),
                            media_type: media_type.to_string(),
                            data: data.to_string(),
                        },
                    },
                    ContentBlock::Text {
                        text: request.instruction.clone(),
                    },
                ],
            }],
        };
        self.send(&body).await
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
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    usage: Option<UsageInfo>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsageInfo {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::Message;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_system_prompt_sent_separately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "k"))
            .and(body_partial_json(serde_json::json!({
                "system": "rules",
                "messages": [{"role": "user", "content": [{"type": "text", "text": "q"}]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [{"type": "text", "text": "answer"}],
                "usage": {"input_tokens": 5, "output_tokens": 1}
            })))
            .mount(&server)
            .await;

        let http = HttpSettings {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
        };
        let backend = AnthropicBackend::new(
            SecretString::from("k".to_string()),
            server.uri(),
            "claude-test".to_string(),
            &http,
        )
        .unwrap();

        let completion = backend
            .complete(&CompletionRequest::new(vec![
                Message::system("rules"),
                Message::user("q"),
            ]))
            .await
            .unwrap();
        assert_eq!(completion.text, "answer");
        assert_eq!(completion.usage.total(), 6);
    }
}
