//! Local file import: conversation exports, documents and images to plain
//! corpus text.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use scraper::Html;
use serde_json::Value;
use tracing::{debug, info};

use super::docx;
use crate::ai::Gateway;
use crate::report::prompts::{VISION_INSTRUCTION, VISION_SYSTEM};
use crate::types::{ReportError, Result};

const USER_PREFIX: &str = "用户：";
const ASSISTANT_PREFIX: &str = "助手：";

/// Conversation list keys tried in order for object-shaped exports
const MESSAGE_KEYS: &[&str] = &["conversations", "messages", "chat", "turns", "items"];

/// MIME type of a supported image extension
pub fn image_mime(extension: &str) -> Option<&'static str> {
    match extension {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

// =============================================================================
// Text Formats
// =============================================================================

/// Trimmed non-empty lines, blank-line separated
pub fn normalize_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn field_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => {
            let joined = parts
                .iter()
                .map(|p| match p {
                    Value::String(s) => s.clone(),
                    Value::Object(_) => p
                        .get("text")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| p.to_string()),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            Some(joined)
        }
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn message_turn(message: &Value) -> Option<String> {
    let obj = message.as_object()?;
    let content = ["content", "text", "message", "parts"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(field_text))?;
    if content.trim().is_empty() {
        return None;
    }
    let role = ["role", "author", "type"]
        .iter()
        .find_map(|k| obj.get(*k))
        .map(|r| match r {
            Value::String(s) => s.to_lowercase(),
            Value::Object(o) => o
                .get("role")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_lowercase(),
            _ => String::new(),
        })
        .unwrap_or_default();
    let prefix = if role == "user" || role == "human" {
        USER_PREFIX
    } else {
        ASSISTANT_PREFIX
    };
    Some(format!("{}\n{}", prefix, content.trim()))
}

/// Conversation JSON exports: an object holding a message list under a
/// known key, or a top-level message array. Anything unrecognized falls
/// back to plain text.
pub fn parse_json_conversation(raw: &str) -> String {
    let Ok(data) = serde_json::from_str::<Value>(raw) else {
        return normalize_text(raw);
    };
    let messages = match &data {
        Value::Array(items) => Some(items),
        Value::Object(obj) => MESSAGE_KEYS
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_array)),
        _ => None,
    };
    let turns: Vec<String> = messages
        .map(|items| items.iter().filter_map(message_turn).collect())
        .unwrap_or_default();
    if turns.is_empty() {
        return normalize_text(raw);
    }
    turns.join("\n\n")
}

/// Visible text of an HTML page, scripts and styles dropped
pub fn html_text(raw: &str) -> String {
    let document = Html::parse_document(raw);
    let mut lines = Vec::new();
    for node in document.tree.nodes() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript"))
        });
        if !hidden && !text.trim().is_empty() {
            lines.push(text.trim().to_string());
        }
    }
    normalize_text(&lines.join("\n"))
}

// =============================================================================
// Importer
// =============================================================================

/// Reads one local source into corpus text. Images go through the vision
/// backend, so the importer holds the gateway.
pub struct FileImporter<'a> {
    gateway: &'a Gateway,
}

impl<'a> FileImporter<'a> {
    pub fn new(gateway: &'a Gateway) -> Self {
        Self { gateway }
    }

    pub async fn import(&self, path: &Path) -> Result<String> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ReportError::missing(path));
            }
            Err(e) => return Err(e.into()),
        };
        let ext = extension(path);
        debug!(path = %path.display(), ext = %ext, bytes = bytes.len(), "Importing file");

        match ext.as_str() {
            "docx" => docx::extract_text(&bytes).map_err(|e| ReportError::extract(path, e.to_string())),
            "pdf" => extract_pdf(path, bytes).await,
            _ if image_mime(&ext).is_some() => self.extract_image(path, &ext, &bytes).await,
            _ => {
                let raw = String::from_utf8_lossy(&bytes);
                Ok(match ext.as_str() {
                    "json" => parse_json_conversation(&raw),
                    "html" | "htm" => html_text(&raw),
                    _ => normalize_text(&raw),
                })
            }
        }
    }

    async fn extract_image(&self, path: &Path, ext: &str, bytes: &[u8]) -> Result<String> {
        let mime = image_mime(ext).unwrap_or("image/jpeg");
        let data_uri = format!("data:{};base64,{}", mime, STANDARD.encode(bytes));
        info!(file = %path.display(), "Submitting image to the vision backend");
        let text = self
            .gateway
            .vision_complete("vision", VISION_INSTRUCTION, Some(VISION_SYSTEM), data_uri)
            .await?;
        Ok(text.trim().to_string())
    }
}

async fn extract_pdf(path: &Path, bytes: Vec<u8>) -> Result<String> {
    let extracted = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .map_err(|e| ReportError::extract(path, e.to_string()))?
        .map_err(|e| ReportError::extract(path, e.to_string()))?;
    Ok(normalize_text(&extracted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::testing::ScriptedBackend;
    use crate::config::{BackendKind, Config};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  a \r\n\n\n b\n"), "a\n\nb");
    }

    #[test]
    fn test_json_shapes() {
        let conversations = r#"{"conversations":[{"role":"user","content":"问"},{"role":"assistant","content":"答"}]}"#;
        assert_eq!(parse_json_conversation(conversations), "用户：\n问\n\n助手：\n答");

        let parts = r#"{"messages":[{"author":"human","parts":["甲",{"text":"乙"}]}]}"#;
        assert_eq!(parse_json_conversation(parts), "用户：\n甲 乙");

        let array = r#"[{"role":"USER","text":"一"},{"role":"model","text":"二"}]"#;
        assert_eq!(parse_json_conversation(array), "用户：\n一\n\n助手：\n二");

        assert_eq!(parse_json_conversation("{\"other\": 1}"), "{\"other\": 1}");
        assert_eq!(parse_json_conversation("不是 JSON\n\n第二行"), "不是 JSON\n\n第二行");
    }

    #[test]
    fn test_html_text_drops_scripts() {
        let html = "<html><head><style>p{}</style><script>var x=1;</script></head>\
                    <body><h1>标题</h1><p>第一段</p><p> </p><div>第二段</div></body></html>";
        assert_eq!(html_text(html), "标题\n\n第一段\n\n第二段");
    }

    fn gateway(backend: Arc<ScriptedBackend>) -> Gateway {
        Gateway::new(&Config::default(), "t").with_backend(BackendKind::Kimi, backend)
    }

    #[tokio::test]
    async fn test_import_by_extension() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(ScriptedBackend::fixed(""));
        let gateway = gateway(backend.clone());
        let importer = FileImporter::new(&gateway);

        let md = dir.path().join("chat.md");
        tokio::fs::write(&md, "# 标题\n\n\n正文  \n").await.unwrap();
        assert_eq!(importer.import(&md).await.unwrap(), "# 标题\n\n正文");

        let unknown = dir.path().join("chat.log");
        tokio::fs::write(&unknown, "一\n二").await.unwrap();
        assert_eq!(importer.import(&unknown).await.unwrap(), "一\n\n二");

        let png = dir.path().join("shot.PNG");
        tokio::fs::write(&png, [0x89u8, 0x50, 0x4e, 0x47]).await.unwrap();
        let text = importer.import(&png).await.unwrap();
        assert!(text.starts_with("图片文字："));
        assert_eq!(backend.vision_call_count(), 1);
    }

    #[tokio::test]
    async fn test_import_docx() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.docx");
        let bytes = crate::render::render_docx("## 一、背景\n\n段落内容").unwrap();
        tokio::fs::write(&path, bytes).await.unwrap();

        let gateway = gateway(Arc::new(ScriptedBackend::fixed("")));
        let text = FileImporter::new(&gateway).import(&path).await.unwrap();
        assert_eq!(text, "一、背景\n\n段落内容");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let gateway = gateway(Arc::new(ScriptedBackend::fixed("")));
        let err = FileImporter::new(&gateway)
            .import(Path::new("/nonexistent/chat.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::MissingArtifact { .. }));
    }

    #[test]
    fn test_image_mime() {
        assert_eq!(image_mime("jpeg"), Some("image/jpeg"));
        assert_eq!(image_mime("webp"), Some("image/webp"));
        assert_eq!(image_mime("txt"), None);
    }
}
