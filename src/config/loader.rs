//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (`<config dir>/reportweave/config.toml`)
//! 3. Project config (`./reportweave.toml`)
//! 4. Environment variables (`REPORTWEAVE_*`, nested with `__`)
//! 5. `LLM_PROVIDER` as a shorthand for `llm.provider`
//!
//! Backend credentials are read from `<BACKEND>_API_KEY` variables after
//! extraction and kept out of the serialized config.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::{Config, Credentials};
use crate::types::{ReportError, Result};

const PROJECT_CONFIG_FILE: &str = "reportweave.toml";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain:
    /// defaults → global → project → env vars
    pub fn load() -> Result<Config> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        // REPORTWEAVE_PIPELINE__CHUNK_SIZE -> pipeline.chunk_size
        figment = figment.merge(Env::prefixed("REPORTWEAVE_").split("__").lowercase(true));

        if let Ok(provider) = std::env::var("LLM_PROVIDER")
            && !provider.trim().is_empty()
        {
            figment = figment.merge(Serialized::default(
                "llm.provider",
                provider.trim().to_lowercase(),
            ));
        }

        Self::finish(figment)
    }

    /// Load configuration from a specific file only
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path));
        Self::finish(figment)
    }

    fn finish(figment: Figment) -> Result<Config> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| ReportError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;
        config.credentials = Credentials::from_env();

        Ok(config)
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Global config directory (e.g. `~/.config/reportweave/`)
    pub fn global_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "reportweave")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join("config.toml"))
    }

    pub fn project_config_path() -> PathBuf {
        PathBuf::from(PROJECT_CONFIG_FILE)
    }

    // =========================================================================
    // Config Commands
    // =========================================================================

    /// Render the effective configuration as TOML or JSON
    pub fn render(config: &Config, as_json: bool) -> Result<String> {
        if as_json {
            Ok(serde_json::to_string_pretty(config)?)
        } else {
            toml::to_string_pretty(config).map_err(|e| ReportError::Config(e.to_string()))
        }
    }

    /// Write a starter config file; returns its path
    pub fn init(global: bool, force: bool) -> Result<PathBuf> {
        let path = if global {
            Self::global_config_path().ok_or_else(|| {
                ReportError::Config("Cannot determine global config directory".to_string())
            })?
        } else {
            Self::project_config_path()
        };

        if path.exists() && !force {
            info!("Config exists: {}", path.display());
            return Ok(path);
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, Self::starter_config())?;
        info!("Created config: {}", path.display());

        Ok(path)
    }

    fn starter_config() -> &'static str {
        r#"# reportweave configuration
# Credentials are never stored here: export KIMI_API_KEY, PERPLEXITY_API_KEY, ...

version = "1.0"

[llm]
provider = "kimi"
retrieval_provider = "perplexity"
vision_provider = "kimi"
connect_timeout_secs = 60
read_timeout_secs = 180

# [llm.backends.kimi]
# model = "kimi-k2-turbo-preview"
# base_url = "https://api.moonshot.cn/v1"

[output]
root = "output"
isolate_runs = false
render_docx = true

[ingest]
min_content_bytes = 1000
crawl_max_retries = 5
crawl_retry_wait_secs = 15

[pipeline]
chunk_size = 50000
section_threshold = 4
citation_pause_ms = 1500
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;
    use tempfile::TempDir;

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reportweave.toml");
        fs::write(
            &path,
            r#"
[llm]
provider = "claude"

[pipeline]
chunk_size = 30000

[llm.backends.claude]
model = "claude-opus-4"
"#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.llm.provider, BackendKind::Claude);
        assert_eq!(config.pipeline.chunk_size, 30000);
        assert_eq!(config.pipeline.section_threshold, 4);
        assert_eq!(config.llm.model(BackendKind::Claude), "claude-opus-4");
    }

    #[test]
    fn test_load_from_file_rejects_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[pipeline]\nchunk_size = 0\n").unwrap();

        let err = ConfigLoader::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_starter_config_parses() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("starter.toml");
        fs::write(&path, ConfigLoader::starter_config()).unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.llm.retrieval_provider, BackendKind::Perplexity);
        assert!(config.output.render_docx);
    }

    #[test]
    fn test_render_hides_credentials() {
        let mut config = Config::default();
        config.credentials.insert(BackendKind::Kimi, "sk-hidden");
        let rendered = ConfigLoader::render(&config, false).unwrap();
        assert!(rendered.contains("provider = \"kimi\""));
        assert!(!rendered.contains("sk-hidden"));
    }
}
