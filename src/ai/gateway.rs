//! Completion Gateway
//!
//! Single entry point for every model call made by the pipeline. Routes a
//! request to `request.backend` or the configured default, builds backends
//! lazily from configuration and caches them, and records per-stage metrics.
//!
//! Credentials are resolved when a backend is first used, so a missing key
//! fails with [`ErrorCategory::MissingCredential`] before any network call.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::metrics::{SharedMetrics, create_shared_metrics};
use super::provider::{
    Citation, CompletionError, CompletionRequest, CompletionResult, SharedBackend, VisionRequest,
    create_backend,
};
use crate::config::{BackendKind, Config, Credentials, LlmConfig};
use crate::constants::gateway::VISION_MAX_TOKENS;

pub struct Gateway {
    llm: LlmConfig,
    credentials: Credentials,
    backends: DashMap<BackendKind, SharedBackend>,
    metrics: SharedMetrics,
}

pub type SharedGateway = Arc<Gateway>;

impl Gateway {
    pub fn new(config: &Config, run_label: impl Into<String>) -> Self {
        Self {
            llm: config.llm.clone(),
            credentials: config.credentials.clone(),
            backends: DashMap::new(),
            metrics: create_shared_metrics(run_label),
        }
    }

    /// Register a prebuilt backend, bypassing credential lookup
    pub fn with_backend(self, kind: BackendKind, backend: SharedBackend) -> Self {
        self.backends.insert(kind, backend);
        self
    }

    pub fn default_backend(&self) -> BackendKind {
        self.llm.provider
    }

    pub fn retrieval_backend(&self) -> BackendKind {
        self.llm.retrieval_provider
    }

    pub fn vision_backend(&self) -> BackendKind {
        self.llm.vision_provider
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    fn backend(&self, kind: BackendKind) -> CompletionResult<SharedBackend> {
        if let Some(existing) = self.backends.get(&kind) {
            return Ok(existing.clone());
        }
        let built = create_backend(kind, &self.llm, &self.credentials)?;
        debug!(backend = %kind, model = built.model(), "Initialized completion backend");
        Ok(self
            .backends
            .entry(kind)
            .or_insert(built)
            .value()
            .clone())
    }

    fn route(&self, request: &CompletionRequest) -> BackendKind {
        request.backend.unwrap_or(self.llm.provider)
    }

    fn fail(&self, stage: &str, err: CompletionError) -> CompletionError {
        self.metrics.record_failure(stage);
        warn!(stage, error = %err, "Completion call failed");
        err
    }

    /// Run a text completion and return its text
    pub async fn complete(&self, stage: &str, request: CompletionRequest) -> CompletionResult<String> {
        let kind = self.route(&request);
        let backend = self.backend(kind).map_err(|e| self.fail(stage, e))?;
        match backend.complete(&request).await {
            Ok(completion) => {
                self.metrics
                    .record(stage, &completion.usage, completion.timing.total_ms);
                Ok(completion.text)
            }
            Err(e) => Err(self.fail(stage, e)),
        }
    }

    /// Run a completion that also returns the backend's source list
    pub async fn complete_with_citations(
        &self,
        stage: &str,
        request: CompletionRequest,
    ) -> CompletionResult<(String, Vec<Citation>)> {
        let kind = self.route(&request);
        let backend = self.backend(kind).map_err(|e| self.fail(stage, e))?;
        match backend.complete_with_citations(&request).await {
            Ok(cited) => {
                self.metrics.record(
                    stage,
                    &cited.completion.usage,
                    cited.completion.timing.total_ms,
                );
                Ok((cited.completion.text, cited.citations))
            }
            Err(e) => Err(self.fail(stage, e)),
        }
    }

    /// Extract text from an image with the vision backend
    pub async fn vision_complete(
        &self,
        stage: &str,
        instruction: &str,
        system: Option<&str>,
        image_data_uri: String,
    ) -> CompletionResult<String> {
        let request = VisionRequest {
            instruction: instruction.to_string(),
            system: system.map(str::to_string),
            image_data_uri,
            max_tokens: VISION_MAX_TOKENS,
            temperature: 0.3,
            backend: Some(self.llm.vision_provider),
        };
        let kind = request.backend.unwrap_or(self.llm.provider);
        let backend = self.backend(kind).map_err(|e| self.fail(stage, e))?;
        match backend.vision_complete(&request).await {
            Ok(completion) => {
                self.metrics
                    .record(stage, &completion.usage, completion.timing.total_ms);
                Ok(completion.text)
            }
            Err(e) => Err(self.fail(stage, e)),
        }
    }
}
