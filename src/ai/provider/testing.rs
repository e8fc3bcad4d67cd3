//! Scripted backend for stage tests.
//!
//! Answers every request through a closure and records what it was asked,
//! so tests can assert on prompt contents and call counts without a network.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{
    Citation, CitedCompletion, Completion, CompletionBackend, CompletionError, CompletionRequest,
    CompletionResult, ErrorCategory, ResponseMetadata, ResponseTiming, TokenUsage, VisionRequest,
};

type Responder = Box<dyn Fn(&CompletionRequest) -> CompletionResult<String> + Send + Sync>;
type CitingResponder =
    Box<dyn Fn(&CompletionRequest) -> CompletionResult<(String, Vec<Citation>)> + Send + Sync>;

pub struct ScriptedBackend {
    name: String,
    responder: Responder,
    citing: Option<CitingResponder>,
    calls: Mutex<Vec<CompletionRequest>>,
    vision_calls: AtomicU32,
}

impl ScriptedBackend {
    pub fn new(
        respond: impl Fn(&CompletionRequest) -> CompletionResult<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: "scripted".to_string(),
            responder: Box::new(respond),
            citing: None,
            calls: Mutex::new(Vec::new()),
            vision_calls: AtomicU32::new(0),
        }
    }

    /// Always answers with `text`
    pub fn fixed(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Always fails with `category`
    pub fn failing(category: ErrorCategory) -> Self {
        Self::new(move |_| Err(CompletionError::with_backend(category, "scripted failure", "scripted")))
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Answer citation requests through `respond` instead of the plain responder
    pub fn with_citations(
        mut self,
        respond: impl Fn(&CompletionRequest) -> CompletionResult<(String, Vec<Citation>)>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.citing = Some(Box::new(respond));
        self
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }

    pub fn vision_call_count(&self) -> u32 {
        self.vision_calls.load(Ordering::SeqCst)
    }

    fn record(&self, request: &CompletionRequest) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.clone());
        }
    }

    fn wrap(&self, text: String) -> Completion {
        Completion {
            usage: TokenUsage::new(
                request_len(&text),
                request_len(&text),
            ),
            text,
            timing: ResponseTiming::default(),
            metadata: ResponseMetadata {
                model: "scripted-model".to_string(),
                backend: self.name.clone(),
            },
        }
    }
}

fn request_len(text: &str) -> u32 {
    text.chars().count() as u32
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, request: &CompletionRequest) -> CompletionResult<Completion> {
        self.record(request);
        (self.responder)(request).map(|text| self.wrap(text))
    }

    async fn complete_with_citations(
        &self,
        request: &CompletionRequest,
    ) -> CompletionResult<CitedCompletion> {
        self.record(request);
        match &self.citing {
            Some(citing) => {
                let (text, citations) = citing(request)?;
                Ok(CitedCompletion {
                    completion: self.wrap(text),
                    citations,
                })
            }
            None => (self.responder)(request).map(|text| CitedCompletion {
                completion: self.wrap(text),
                citations: Vec::new(),
            }),
        }
    }

    async fn vision_complete(&self, request: &VisionRequest) -> CompletionResult<Completion> {
        self.vision_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.wrap(format!("图片文字：{}", request.instruction.chars().take(8).collect::<String>())))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        "scripted-model"
    }
}
