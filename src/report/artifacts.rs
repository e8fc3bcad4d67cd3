//! Artifact Store
//!
//! Every stage reads the previous stage's file and writes its own under a
//! fixed tree:
//!
//! ```text
//! output/
//! ├── raw/{name}.txt
//! ├── reports/{base}_meta.json, {base}_report_v1.md, … {base}_report_v4.docx
//! └── experts/{base}_{lens}.md, {base}_专家意见汇总.md, {base}_排除清单.md
//! ```
//!
//! With a run id the same tree lives under `output/runs/<id>/`.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::OutputConfig;
use crate::types::{ReportError, Result, RunId};

const RAW_DIR: &str = "raw";
const REPORTS_DIR: &str = "reports";
const EXPERTS_DIR: &str = "experts";
const RUNS_DIR: &str = "runs";

/// Report versions produced by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReportVersion {
    /// Assembled, gap-filled and deduplicated draft
    V1,
    /// Revised against critique and exclusions
    V2,
    /// Style-transformed
    V3,
    /// Citation-annotated
    V4,
}

impl ReportVersion {
    pub const ALL: [ReportVersion; 4] = [Self::V1, Self::V2, Self::V3, Self::V4];

    pub fn tag(&self) -> &'static str {
        match self {
            Self::V1 => "report_v1",
            Self::V2 => "report_v2",
            Self::V3 => "report_v3",
            Self::V4 => "report_v4",
        }
    }
}

impl fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Output basename of a stage artifact: its file stem without the version
/// tag or a `_new` suffix
pub fn base_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = stem.strip_suffix("_new").unwrap_or(&stem);
    ReportVersion::ALL
        .iter()
        .find_map(|v| stem.strip_suffix(&format!("_{}", v.tag())))
        .unwrap_or(stem)
        .to_string()
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store rooted at `output/runs/<id>` when a run id is given
    pub fn for_run(base: impl AsRef<Path>, run_id: Option<&RunId>) -> Self {
        let base = base.as_ref();
        match run_id {
            Some(id) => Self::new(base.join(RUNS_DIR).join(id.as_str())),
            None => Self::new(base),
        }
    }

    /// Resolve the store from configuration; `isolate_runs` generates a run
    /// id when none was given
    pub fn from_config(config: &OutputConfig, run_id: Option<RunId>) -> (Self, Option<RunId>) {
        let run_id = run_id.or_else(|| config.isolate_runs.then(RunId::generate));
        (Self::for_run(&config.root, run_id.as_ref()), run_id)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join(RAW_DIR)
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.root.join(REPORTS_DIR)
    }

    pub fn experts_dir(&self) -> PathBuf {
        self.root.join(EXPERTS_DIR)
    }

    pub fn raw_path(&self, name: &str) -> PathBuf {
        self.raw_dir().join(format!("{}.txt", name))
    }

    pub fn meta_path(&self, base: &str) -> PathBuf {
        self.reports_dir().join(format!("{}_meta.json", base))
    }

    pub fn report_path(&self, base: &str, version: ReportVersion) -> PathBuf {
        self.reports_dir()
            .join(format!("{}_{}.md", base, version.tag()))
    }

    pub fn docx_path(&self, base: &str, version: ReportVersion) -> PathBuf {
        self.reports_dir()
            .join(format!("{}_{}.docx", base, version.tag()))
    }

    /// `experts/{base}_{name}.{ext}`
    pub fn expert_path(&self, base: &str, name: &str, ext: &str) -> PathBuf {
        self.experts_dir().join(format!("{}_{}.{}", base, name, ext))
    }

    /// Write `contents`, creating parent directories, and confirm the file
    /// reads back at the expected size
    pub async fn write(&self, path: &Path, contents: &str) -> Result<PathBuf> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;

        let written = tokio::fs::metadata(path).await?.len();
        if written != contents.len() as u64 {
            return Err(ReportError::Io(std::io::Error::other(format!(
                "short write to {}: {} of {} bytes",
                path.display(),
                written,
                contents.len()
            ))));
        }
        debug!(path = %path.display(), bytes = written, "Artifact written");
        Ok(path.to_path_buf())
    }

    /// Serialize `value` as pretty JSON and write it
    pub async fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(value)?;
        self.write(path, &json).await
    }
}

/// Read a prior-stage artifact, failing with its path when it is absent
pub async fn read_required(path: &Path) -> Result<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ReportError::missing(path)),
        Err(e) => Err(e.into()),
    }
}

/// Read an optional artifact; `None` when it does not exist
pub async fn read_optional(path: &Path) -> Result<Option<String>> {
    match read_required(path).await {
        Ok(text) => Ok(Some(text)),
        Err(ReportError::MissingArtifact { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths() {
        let store = ArtifactStore::new("output");
        assert_eq!(store.raw_path("chat"), PathBuf::from("output/raw/chat.txt"));
        assert_eq!(
            store.report_path("chat", ReportVersion::V2),
            PathBuf::from("output/reports/chat_report_v2.md")
        );
        assert_eq!(
            store.expert_path("chat", "专家意见汇总", "md"),
            PathBuf::from("output/experts/chat_专家意见汇总.md")
        );
    }

    #[test]
    fn test_run_isolation() {
        let a = ArtifactStore::for_run("output", Some(&RunId::new("a")));
        let b = ArtifactStore::for_run("output", Some(&RunId::new("b")));
        assert_ne!(
            a.report_path("chat", ReportVersion::V1),
            b.report_path("chat", ReportVersion::V1)
        );
        assert!(a.root().ends_with("runs/a"));
    }

    #[test]
    fn test_isolate_runs_generates_id() {
        let config = OutputConfig {
            isolate_runs: true,
            ..OutputConfig::default()
        };
        let (store, id) = ArtifactStore::from_config(&config, None);
        let id = id.unwrap();
        assert!(store.root().ends_with(id.as_str()));
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name(Path::new("out/chat_report_v1.md")), "chat");
        assert_eq!(base_name(Path::new("chat_report_v3_new.docx")), "chat");
        assert_eq!(base_name(Path::new("raw/chat.txt")), "chat");
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path());
        let path = store.report_path("t", ReportVersion::V1);
        store.write(&path, "# 报告\n").await.unwrap();
        assert_eq!(read_required(&path).await.unwrap(), "# 报告\n");
    }

    #[tokio::test]
    async fn test_missing_artifact_names_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports/none_report_v1.md");
        let err = read_required(&path).await.unwrap_err();
        assert!(matches!(err, ReportError::MissingArtifact { .. }));
        assert!(err.to_string().contains("none_report_v1.md"));
        assert!(read_optional(&path).await.unwrap().is_none());
    }
}
