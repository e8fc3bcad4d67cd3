pub mod error;
pub mod utils;

pub use error::{
    CompletionError, CompletionResult, ErrorCategory, ErrorClassifier, ReportError, Result,
};
pub use utils::{
    char_len, char_slice, json_string, json_string_array, json_string_or, skip_chars,
    truncate_chars, truncate_with_notice,
};

// =============================================================================
// Domain Newtypes
// =============================================================================

use std::fmt;

/// Identifier of an isolated pipeline run
///
/// Artifacts of a run live under `output/runs/<id>/` so that concurrent or
/// repeated runs never overwrite each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id: timestamp plus a short random suffix
    pub fn generate() -> Self {
        let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}", stamp, &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
