//! External recognition providers: cloud OCR and the vision/LLM model.
//!
//! Only the provider *contracts* matter here; the HTTP implementations
//! speak a minimal JSON shape and can be pointed at any compatible
//! endpoint. Tests substitute the traits.

use std::path::Path;
use std::time::Duration;

use acervo_protocol::{PageExtract, PipelineError, PipelineResult, PipelineTier, Service};
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Retry policy for transient provider failures.
pub const RETRY_ATTEMPTS: u32 = 3;
pub const RETRY_BASE: Duration = Duration::from_millis(500);
pub const RETRY_FACTOR: u32 = 2;
pub const RETRY_CAP: Duration = Duration::from_secs(8);

/// Per-call timeout for provider requests.
const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Remote OCR service.
#[async_trait]
pub trait OcrClient: Send + Sync {
    /// Recognize every page of the document in one call.
    async fn recognize(&self, path: &Path) -> PipelineResult<Vec<PageExtract>>;
}

/// Output of a structured extraction pass (vision or text LLM).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructuredExtraction {
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_date: Option<String>,
}

/// Multimodal model constrained to the services-table schema.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Structured extraction over raw concatenated text.
    async fn extract_from_text(&self, text: &str) -> PipelineResult<StructuredExtraction>;

    /// Structured extraction over the document itself (vision tier).
    async fn extract_from_document(&self, path: &Path) -> PipelineResult<StructuredExtraction>;
}

/// Run `op` with exponential backoff on transient errors: base 500 ms,
/// factor 2, cap 8 s, at least `RETRY_ATTEMPTS` attempts.
pub async fn retry_with_backoff<T, F, Fut>(label: &str, mut op: F) -> PipelineResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = PipelineResult<T>>,
{
    let mut delay = RETRY_BASE;
    let mut last_err = None;
    for attempt in 1..=RETRY_ATTEMPTS {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err @ PipelineError::TransientExtractor { .. }) => {
                warn!(label, attempt, %err, "transient provider failure, backing off");
                last_err = Some(err);
                if attempt < RETRY_ATTEMPTS {
                    tokio::time::sleep(delay).await;
                    delay = (delay * RETRY_FACTOR).min(RETRY_CAP);
                }
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.expect("at least one attempt"))
}

// ============================================================================
// HTTP OCR client
// ============================================================================

#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    filename: &'a str,
    content: String,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    pages: Vec<OcrResponsePage>,
}

#[derive(Debug, Deserialize)]
struct OcrResponsePage {
    #[serde(default)]
    page: u32,
    #[serde(default)]
    text: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    tables: Vec<Vec<Vec<String>>>,
}

/// reqwest-backed OCR client for a JSON recognition endpoint.
pub struct HttpOcrClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpOcrClient {
    pub fn new(endpoint: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            client,
            endpoint,
            api_key,
        }
    }

    async fn post_once(&self, path: &Path) -> PipelineResult<Vec<PageExtract>> {
        let tier = PipelineTier::CloudOcr;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PipelineError::permanent(tier, format!("read {}: {e}", path.display())))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document");
        let request = OcrRequest {
            filename,
            content: base64::engine::general_purpose::STANDARD.encode(&bytes),
            language: "por",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .headers(self.auth_headers())
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::transient(tier, e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::transient(tier, format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::permanent(tier, format!("{status}: {body}")));
        }

        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::permanent(tier, format!("bad response: {e}")))?;

        Ok(parsed
            .pages
            .into_iter()
            .map(|p| PageExtract {
                page: p.page,
                text: p.text,
                tables: p.tables,
                confidence: p.confidence.clamp(0.0, 1.0),
            })
            .collect())
    }

    fn auth_headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = &self.api_key {
            if let Ok(value) = reqwest::header::HeaderValue::from_str(key) {
                headers.insert("x-api-key", value);
            }
        }
        headers
    }
}

#[async_trait]
impl OcrClient for HttpOcrClient {
    async fn recognize(&self, path: &Path) -> PipelineResult<Vec<PageExtract>> {
        retry_with_backoff("cloud-ocr", || self.post_once(path)).await
    }
}

// ============================================================================
// HTTP vision/LLM client (Anthropic-style messages API)
// ============================================================================

const ANTHROPIC_VERSION: &str = "2023-06-01";
const EXTRACTION_TOOL: &str = "registrar_servicos";
const MAX_TOKENS: u32 = 4096;

const TEXT_PROMPT: &str = "Extraia do texto a seguir a lista de serviços executados \
(item, descrição, quantidade, unidade) e os metadados (emissor, data de emissão). \
Use a ferramenta registrar_servicos com todos os serviços encontrados.";

const DOCUMENT_PROMPT: &str = "Extraia deste documento a lista de serviços executados \
(item, descrição, quantidade, unidade) e os metadados (emissor, data de emissão). \
Use a ferramenta registrar_servicos com todos os serviços encontrados.";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    tools: Vec<ToolDefinition<'a>>,
    tool_choice: ToolChoice<'a>,
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Serialize)]
struct ToolDefinition<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ToolChoice<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: Vec<ApiContent>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    Document {
        source: DocumentSource,
    },
    Image {
        source: DocumentSource,
    },
}

#[derive(Debug, Serialize)]
struct DocumentSource {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseContent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContent {
    Text {
        #[allow(dead_code)]
        text: String,
    },
    ToolUse {
        name: String,
        input: serde_json::Value,
    },
}

/// reqwest-backed structured-extraction client.
pub struct HttpAiClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl HttpAiClient {
    pub fn new(endpoint: String, model: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            client,
            endpoint,
            model,
            api_key,
        }
    }

    /// The services-table schema the model must fill.
    fn tool_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "services": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "item_code": {"type": ["string", "null"]},
                            "description": {"type": "string"},
                            "quantity": {"type": ["number", "null"]},
                            "unit": {"type": ["string", "null"]}
                        },
                        "required": ["description"]
                    }
                },
                "issuer": {"type": ["string", "null"]},
                "issue_date": {"type": ["string", "null"]}
            },
            "required": ["services"]
        })
    }

    async fn call(&self, content: Vec<ApiContent>) -> PipelineResult<StructuredExtraction> {
        let tier = PipelineTier::VisionAi;
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            tools: vec![ToolDefinition {
                name: EXTRACTION_TOOL,
                description: "Registra os serviços extraídos do documento.",
                input_schema: Self::tool_schema(),
            }],
            tool_choice: ToolChoice {
                kind: "tool",
                name: EXTRACTION_TOOL,
            },
            messages: vec![ApiMessage {
                role: "user",
                content,
            }],
        };

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PipelineError::transient(tier, e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::transient(tier, format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::permanent(tier, format!("{status}: {body}")));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::permanent(tier, format!("bad response: {e}")))?;

        for block in parsed.content {
            if let ResponseContent::ToolUse { name, input } = block {
                if name == EXTRACTION_TOOL {
                    let extraction: StructuredExtraction = serde_json::from_value(input)
                        .map_err(|e| {
                            PipelineError::permanent(tier, format!("bad tool input: {e}"))
                        })?;
                    debug!(
                        services = extraction.services.len(),
                        "structured extraction returned"
                    );
                    return Ok(extraction);
                }
            }
        }
        Err(PipelineError::permanent(
            tier,
            "model returned no tool call".to_string(),
        ))
    }

    async fn document_content(&self, path: &Path) -> PipelineResult<ApiContent> {
        let tier = PipelineTier::VisionAi;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PipelineError::permanent(tier, format!("read {}: {e}", path.display())))?;
        let data = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let content = match extension.as_str() {
            "pdf" => ApiContent::Document {
                source: DocumentSource {
                    kind: "base64",
                    media_type: "application/pdf".to_string(),
                    data,
                },
            },
            "png" | "webp" => ApiContent::Image {
                source: DocumentSource {
                    kind: "base64",
                    media_type: format!("image/{extension}"),
                    data,
                },
            },
            "jpg" | "jpeg" => ApiContent::Image {
                source: DocumentSource {
                    kind: "base64",
                    media_type: "image/jpeg".to_string(),
                    data,
                },
            },
            other => {
                return Err(PipelineError::permanent(
                    tier,
                    format!("unsupported media type: .{other}"),
                ))
            }
        };
        Ok(content)
    }
}

#[async_trait]
impl AiClient for HttpAiClient {
    async fn extract_from_text(&self, text: &str) -> PipelineResult<StructuredExtraction> {
        let content = vec![ApiContent::Text {
            text: format!("{TEXT_PROMPT}\n\n{text}"),
        }];
        retry_with_backoff("llm-text", || self.call(clone_content(&content))).await
    }

    async fn extract_from_document(&self, path: &Path) -> PipelineResult<StructuredExtraction> {
        let doc = self.document_content(path).await?;
        let content = vec![
            doc,
            ApiContent::Text {
                text: DOCUMENT_PROMPT.to_string(),
            },
        ];
        retry_with_backoff("vision", || self.call(clone_content(&content))).await
    }
}

fn clone_content(content: &[ApiContent]) -> Vec<ApiContent> {
    content
        .iter()
        .map(|c| match c {
            ApiContent::Text { text } => ApiContent::Text { text: text.clone() },
            ApiContent::Document { source } => ApiContent::Document {
                source: DocumentSource {
                    kind: source.kind,
                    media_type: source.media_type.clone(),
                    data: source.data.clone(),
                },
            },
            ApiContent::Image { source } => ApiContent::Image {
                source: DocumentSource {
                    kind: source.kind,
                    media_type: source.media_type.clone(),
                    data: source.data.clone(),
                },
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_backoff_retries_transients() {
        let calls = AtomicU32::new(0);
        let result: PipelineResult<u32> = retry_with_backoff("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PipelineError::transient(PipelineTier::CloudOcr, "503"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: PipelineResult<u32> = retry_with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::transient(PipelineTier::CloudOcr, "503")) }
        })
        .await;
        assert!(matches!(
            result.unwrap_err(),
            PipelineError::TransientExtractor { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), RETRY_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_permanent_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: PipelineResult<u32> = retry_with_backoff("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PipelineError::permanent(PipelineTier::CloudOcr, "400")) }
        })
        .await;
        assert!(matches!(
            result.unwrap_err(),
            PipelineError::PermanentExtractor { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tool_schema_names_services_table() {
        let schema = HttpAiClient::tool_schema();
        assert!(schema["properties"]["services"].is_object());
        assert_eq!(schema["required"][0], "services");
    }
}
