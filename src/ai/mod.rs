//! AI Integration Layer
//!
//! Completion backends, the gateway that routes stage calls to them, usage
//! metrics, and recovery of structured output.

pub mod gateway;
pub mod metrics;
pub mod provider;
pub mod validation;

pub use gateway::{Gateway, SharedGateway};
pub use metrics::{MetricsCollector, MetricsSummary, SharedMetrics, StageMetrics};
pub use provider::{
    Citation, CompletionBackend, CompletionRequest, ErrorCategory, Message, Role, SharedBackend,
    TokenUsage,
};
pub use validation::{JsonRepairer, RepairKind};
