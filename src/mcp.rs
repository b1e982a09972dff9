//! MCP (Model Context Protocol) server implementation.
//!
//! Exposes scene generation as tools that AI agents can call. The server
//! owns one [`Session`], so results persist between tool calls until
//! `clear_results` is called.

use crate::batch::{
    self, validate_count, FailurePolicy, DEFAULT_COUNT, MAX_COUNT, MIN_COUNT,
};
use crate::image::providers::{api_key_from_env, GeminiModel, GeminiProvider, API_KEY_ENV_VARS};
use crate::image::{ImageProvider, SourceImage};
use crate::scene::SceneTemplate;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

/// Timeout for a whole batch (all sequential calls).
const BATCH_TIMEOUT: Duration = Duration::from_secs(1200);

/// Decodes a base64 string that may be imperfectly formatted.
///
/// Agents frequently send base64 with issues that strict decoders reject:
/// - Data URI prefix (`data:image/png;base64,...`)
/// - Missing padding (`=` characters)
/// - Embedded whitespace or newlines
fn decode_base64_lenient(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;

    let b64 = match input.find(";base64,") {
        Some(pos) => &input[pos + 8..],
        None => input,
    };

    let cleaned: String = b64.chars().filter(|c| !c.is_ascii_whitespace()).collect();

    if let Ok(data) = base64::engine::general_purpose::STANDARD.decode(&cleaned) {
        return Ok(data);
    }

    base64::engine::general_purpose::STANDARD_NO_PAD.decode(&cleaned)
}

/// Rejects paths containing `..` components.
fn validate_output_dir(path: &str) -> std::result::Result<(), String> {
    let path = std::path::Path::new(path);
    for component in path.components() {
        if matches!(component, std::path::Component::ParentDir) {
            return Err("Path must not contain '..' components".into());
        }
    }
    Ok(())
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
}

impl JsonRpcResponse {
    fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Wraps a JSON value as MCP text content.
    fn text_content(id: Value, value: &Value) -> Self {
        let content = json!([{
            "type": "text",
            "text": serde_json::to_string_pretty(value).unwrap_or_default()
        }]);
        Self::success(id, json!({ "content": content }))
    }
}

/// MCP tool definition.
#[derive(Debug, Serialize)]
struct Tool {
    name: &'static str,
    description: &'static str,
    #[serde(rename = "inputSchema")]
    input_schema: Value,
}

/// `generate_scene_images` tool parameters.
#[derive(Debug, Clone, Deserialize)]
struct GenerateSceneParams {
    #[serde(default)]
    scene: Option<String>,
    #[serde(default)]
    user_prompt: Option<String>,
    /// Number of images (1-10, default 4).
    #[serde(default)]
    count: Option<u32>,
    /// Path to the person photo.
    #[serde(default)]
    input_path: Option<String>,
    /// Base64 person photo (alternative to `input_path`).
    #[serde(default)]
    input_image: Option<String>,
    #[serde(default)]
    output_dir: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    abort_on_error: bool,
}

/// `show_results` tool parameters.
#[derive(Debug, Clone, Default, Deserialize)]
struct ShowResultsParams {
    #[serde(default)]
    include_data: bool,
}

/// MCP server for scene generation.
pub struct McpServer {
    initialized: bool,
    session: Session,
    provider: Option<Arc<dyn ImageProvider>>,
}

impl McpServer {
    /// Creates a server that builds a Gemini provider from the environment on demand.
    pub fn new() -> Self {
        Self {
            initialized: false,
            session: Session::new(),
            provider: None,
        }
    }

    /// Creates a server that always uses `provider`.
    pub fn with_provider(provider: Arc<dyn ImageProvider>) -> Self {
        Self {
            provider: Some(provider),
            ..Self::new()
        }
    }

    /// Run the MCP server, reading from stdin and writing to stdout.
    pub async fn run(&mut self) -> std::io::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut stdout = tokio::io::stdout();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }

            if let Some(resp) = self.handle_message(&line).await {
                let json = serde_json::to_string(&resp).unwrap_or_else(|e| {
                    json!({
                        "jsonrpc": "2.0",
                        "id": null,
                        "error": {"code": -32603, "message": e.to_string()}
                    })
                    .to_string()
                });
                stdout.write_all(json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        tracing::info!("stdin closed, MCP server exiting");
        Ok(())
    }

    async fn handle_message(&mut self, message: &str) -> Option<JsonRpcResponse> {
        let request: JsonRpcRequest = match serde_json::from_str(message) {
            Ok(r) => r,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    Value::Null,
                    -32700,
                    format!("Parse error: {}", e),
                ));
            }
        };

        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id.unwrap_or(Value::Null),
                -32600,
                "Invalid JSON-RPC version",
            ));
        }

        let id = request.id.clone().unwrap_or(Value::Null);

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(id, &request.params)),
            "initialized" | "notifications/initialized" => None,
            "tools/list" => Some(self.handle_tools_list(id)),
            "tools/call" => Some(self.handle_tools_call(id, &request.params).await),
            "ping" => Some(JsonRpcResponse::success(id, json!({}))),
            _ => Some(JsonRpcResponse::error(
                id,
                -32601,
                format!("Method not found: {}", request.method),
            )),
        }
    }

    fn handle_initialize(&mut self, id: Value, params: &Value) -> JsonRpcResponse {
        self.initialized = true;

        if let Some(client_info) = params.get("clientInfo") {
            tracing::info!(
                client = client_info
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown"),
                version = client_info
                    .get("version")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown"),
                "MCP client connected"
            );
        }

        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": "scenegen",
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }

    fn handle_tools_list(&self, id: Value) -> JsonRpcResponse {
        let scene_keys: Vec<&str> = SceneTemplate::all().iter().map(|s| s.key).collect();
        let models: Vec<&str> = GeminiModel::ALL.iter().map(|m| m.alias()).collect();

        let tools = vec![
            Tool {
                name: "list_scenes",
                description: "List the scene templates a person can be placed into",
                input_schema: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            },
            Tool {
                name: "generate_scene_images",
                description:
                    "Place the person from a photo into a scene template using Gemini. Issues one request per image, sequentially. Results replace the session's previous results.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "scene": {
                            "type": "string",
                            "enum": scene_keys,
                            "description": "Scene template key (default: cafe). Display labels are accepted too."
                        },
                        "user_prompt": {
                            "type": "string",
                            "description": "Optional extra instruction appended to the scene template"
                        },
                        "count": {
                            "type": "integer",
                            "minimum": MIN_COUNT,
                            "maximum": MAX_COUNT,
                            "description": "Number of images to generate (1-10, default 4)"
                        },
                        "input_path": {
                            "type": "string",
                            "description": "Path to the person photo (PNG or JPEG)"
                        },
                        "input_image": {
                            "type": "string",
                            "description": "Base64-encoded person photo (PNG or JPEG). Accepts raw base64 or data URIs."
                        },
                        "output_dir": {
                            "type": "string",
                            "description": "Directory to save generated_image_<n>.png files (optional, returns base64 if not provided)"
                        },
                        "model": {
                            "type": "string",
                            "enum": models,
                            "description": "Gemini model variant (default: nano-banana-preview)"
                        },
                        "abort_on_error": {
                            "type": "boolean",
                            "description": "Stop at the first failed request and discard the whole batch (default: false)"
                        }
                    },
                    "required": []
                }),
            },
            Tool {
                name: "show_results",
                description: "Show the images currently held in the session",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "include_data": {
                            "type": "boolean",
                            "description": "Include base64 PNG data for each image (default: false)"
                        }
                    },
                    "required": []
                }),
            },
            Tool {
                name: "clear_results",
                description: "Clear the session's generated images",
                input_schema: json!({
                    "type": "object",
                    "properties": {},
                    "required": []
                }),
            },
        ];

        JsonRpcResponse::success(id, json!({ "tools": tools }))
    }

    async fn handle_tools_call(&mut self, id: Value, params: &Value) -> JsonRpcResponse {
        let tool_name = params.get("name").and_then(|v| v.as_str()).unwrap_or("");
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

        match tool_name {
            "list_scenes" => self.list_scenes(id),
            "generate_scene_images" => self.generate_scene_images(id, arguments).await,
            "show_results" => self.show_results(id, arguments),
            "clear_results" => {
                self.session.clear();
                JsonRpcResponse::text_content(id, &json!({ "cleared": true }))
            }
            _ => JsonRpcResponse::error(id, -32602, format!("Unknown tool: {}", tool_name)),
        }
    }

    fn list_scenes(&self, id: Value) -> JsonRpcResponse {
        let scenes = json!({
            "default": SceneTemplate::default().key,
            "scenes": SceneTemplate::all(),
        });
        JsonRpcResponse::text_content(id, &scenes)
    }

    fn resolve_provider(
        &self,
        model: Option<&str>,
    ) -> std::result::Result<Arc<dyn ImageProvider>, String> {
        if let Some(provider) = &self.provider {
            return Ok(Arc::clone(provider));
        }

        let model = match model {
            Some(name) => GeminiModel::from_name(name)
                .ok_or_else(|| format!("Unknown model '{}'", name))?,
            None => GeminiModel::default(),
        };

        if api_key_from_env().is_none() {
            return Err(format!(
                "gemini requires {} environment variable to be set",
                API_KEY_ENV_VARS.join(" or ")
            ));
        }

        GeminiProvider::builder()
            .model(model)
            .build()
            .map(|p| Arc::new(p) as Arc<dyn ImageProvider>)
            .map_err(|e| e.to_string())
    }

    async fn generate_scene_images(&mut self, id: Value, arguments: Value) -> JsonRpcResponse {
        let params: GenerateSceneParams = match serde_json::from_value(arguments) {
            Ok(p) => p,
            Err(e) => {
                return JsonRpcResponse::error(id, -32602, format!("Invalid parameters: {}", e));
            }
        };

        if let Some(dir) = &params.output_dir {
            if let Err(msg) = validate_output_dir(dir) {
                return JsonRpcResponse::error(id, -32602, msg);
            }
        }

        let scene = match params.scene.as_deref() {
            Some(name) => match SceneTemplate::lookup(name) {
                Ok(scene) => scene,
                Err(e) => return JsonRpcResponse::error(id, -32602, e.to_string()),
            },
            None => &crate::scene::SCENE_TEMPLATES[0],
        };

        let count = match validate_count(params.count.unwrap_or(DEFAULT_COUNT)) {
            Ok(count) => count,
            Err(e) => return JsonRpcResponse::error(id, -32602, e.to_string()),
        };

        let source = match (&params.input_path, &params.input_image) {
            (Some(path), None) => SourceImage::from_path(path),
            (None, Some(b64)) => match decode_base64_lenient(b64) {
                Ok(data) => SourceImage::from_bytes("upload", data),
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        -32602,
                        format!("Invalid base64 in input_image: {}", e),
                    );
                }
            },
            _ => {
                return JsonRpcResponse::error(
                    id,
                    -32602,
                    "Provide exactly one of input_path or input_image",
                );
            }
        };
        let source = match source {
            Ok(s) => s,
            Err(e) => return JsonRpcResponse::error(id, -32602, e.to_string()),
        };

        let provider = match self.resolve_provider(params.model.as_deref()) {
            Ok(p) => p,
            Err(msg) => return JsonRpcResponse::error(id, -32602, msg),
        };

        let policy = if params.abort_on_error {
            FailurePolicy::AbortBatch
        } else {
            FailurePolicy::KeepPartial
        };

        let report = match tokio::time::timeout(
            BATCH_TIMEOUT,
            batch::generate(
                provider.as_ref(),
                scene.instruction,
                &source.data,
                params.user_prompt.as_deref().unwrap_or(""),
                count,
                policy,
            ),
        )
        .await
        {
            Ok(report) => report,
            Err(_) => {
                return JsonRpcResponse::error(
                    id,
                    -32603,
                    format!("timed out after {}s", BATCH_TIMEOUT.as_secs()),
                );
            }
        };

        let summary = report.summary();
        self.session.record(report);

        if summary.succeeded == 0 {
            let detail = if summary.errors.is_empty() {
                "no image parts returned".to_string()
            } else {
                summary.errors.join("\n")
            };
            return JsonRpcResponse::error(
                id,
                -32603,
                format!("All {} generations failed:\n{}", count, detail),
            );
        }

        let images = match &params.output_dir {
            Some(dir) => match self.session.save_all(dir) {
                Ok(paths) => paths
                    .iter()
                    .map(|p| json!({ "saved_to": p.display().to_string() }))
                    .collect::<Vec<_>>(),
                Err(e) => {
                    return JsonRpcResponse::error(id, -32603, format!("Failed to save: {}", e))
                }
            },
            None => match self.result_entries(true) {
                Ok(entries) => entries,
                Err(e) => return JsonRpcResponse::error(id, -32603, e),
            },
        };

        let response = json!({
            "success": true,
            "scene": scene.key,
            "source": source.summary(),
            "summary": summary,
            "images": images,
        });

        JsonRpcResponse::text_content(id, &response)
    }

    fn result_entries(&self, include_data: bool) -> std::result::Result<Vec<Value>, String> {
        use base64::Engine;

        let downloads = self.session.downloads().map_err(|e| e.to_string())?;
        Ok(self
            .session
            .visible_results()
            .iter()
            .zip(downloads)
            .map(|(image, download)| {
                let mut entry = json!({
                    "file_name": download.file_name,
                    "mime_type": download.mime_type,
                    "width": image.width(),
                    "height": image.height(),
                    "size_bytes": download.data.len(),
                });
                if include_data {
                    entry["base64"] = json!(
                        base64::engine::general_purpose::STANDARD.encode(&download.data)
                    );
                }
                entry
            })
            .collect())
    }

    fn show_results(&self, id: Value, arguments: Value) -> JsonRpcResponse {
        let params: ShowResultsParams = serde_json::from_value(arguments).unwrap_or_default();

        match self.result_entries(params.include_data) {
            Ok(images) => JsonRpcResponse::text_content(
                id,
                &json!({
                    "show_results": self.session.show_results(),
                    "columns": self.session.layout_columns(),
                    "images": images,
                }),
            ),
            Err(e) => JsonRpcResponse::error(id, -32603, e),
        }
    }
}

impl Default for McpServer {
    fn default() -> Self {
        Self::new()
    }
}
