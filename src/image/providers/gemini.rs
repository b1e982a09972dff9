//! Gemini (Google) image generation provider.

use crate::error::{parse_retry_after, sanitize_error_message, Result, SceneGenError};
use crate::image::provider::ImageProvider;
use crate::image::types::{GeneratedImage, GenerationMetadata, GenerationRequest, ImageFormat};
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Environment variables checked for the API key, in order.
pub const API_KEY_ENV_VARS: [&str; 2] = ["GOOGLE_API_KEY", "GEMINI_API_KEY"];

/// First non-blank API key found in [`API_KEY_ENV_VARS`].
pub fn api_key_from_env() -> Option<String> {
    first_non_blank_key(|var| std::env::var(var).ok())
}

fn first_non_blank_key(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    API_KEY_ENV_VARS
        .iter()
        .find_map(|var| lookup(var).filter(|key| !key.trim().is_empty()))
}

/// Gemini image model variants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeminiModel {
    /// Gemini 2.5 Flash Image preview.
    #[default]
    NanoBananaPreview,
    /// Gemini 2.5 Flash Image (GA).
    NanoBanana,
    /// Nano Banana Pro - Gemini 3 Pro Image (highest quality).
    NanoBananaPro,
}

impl GeminiModel {
    /// Every variant, default first.
    pub const ALL: [GeminiModel; 3] = [
        Self::NanoBananaPreview,
        Self::NanoBanana,
        Self::NanoBananaPro,
    ];

    /// Returns the API model identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NanoBananaPreview => "gemini-2.5-flash-image-preview",
            Self::NanoBanana => "gemini-2.5-flash-image",
            Self::NanoBananaPro => "nano-banana-pro-preview",
        }
    }

    /// Short alias accepted on the command line.
    pub fn alias(&self) -> &'static str {
        match self {
            Self::NanoBananaPreview => "nano-banana-preview",
            Self::NanoBanana => "nano-banana",
            Self::NanoBananaPro => "nano-banana-pro",
        }
    }

    /// Parses an alias or an API model identifier.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.alias() == name || m.as_str() == name)
    }
}

impl std::fmt::Display for GeminiModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builder for GeminiProvider.
#[derive(Debug, Clone, Default)]
pub struct GeminiProviderBuilder {
    api_key: Option<String>,
    model: GeminiModel,
    base_url: Option<String>,
    timeout: Option<Duration>,
}

impl GeminiProviderBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key. Falls back to `GOOGLE_API_KEY`, then `GEMINI_API_KEY`.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Sets the Gemini model variant.
    pub fn model(mut self, model: GeminiModel) -> Self {
        self.model = model;
        self
    }

    /// Overrides the API origin (scheme + host, no trailing path).
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Sets the per-request timeout (default 120s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the provider, resolving the API key.
    pub fn build(self) -> Result<GeminiProvider> {
        let api_key = match self.api_key {
            Some(key) => Some(key).filter(|key| !key.trim().is_empty()),
            None => api_key_from_env(),
        }
        .ok_or_else(|| {
                SceneGenError::Auth(
                    "GOOGLE_API_KEY / GEMINI_API_KEY not set and no API key provided".into(),
                )
            })?;

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(GeminiProvider {
            client,
            api_key,
            model: self.model,
            base_url: self
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            timeout,
        })
    }
}

/// Gemini image generation provider.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
    model: GeminiModel,
    base_url: String,
    timeout: Duration,
}

impl GeminiProvider {
    /// Creates a new `GeminiProviderBuilder`.
    pub fn builder() -> GeminiProviderBuilder {
        GeminiProviderBuilder::new()
    }

    /// The configured model.
    pub fn model(&self) -> GeminiModel {
        self.model
    }

    async fn generate_impl(&self, request: &GenerationRequest) -> Result<Option<GeneratedImage>> {
        let start = Instant::now();

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url,
            self.model.as_str(),
        );

        let body = GeminiRequest::from_generation_request(request);

        tracing::debug!(
            model = self.model.as_str(),
            prompt_chars = request.prompt.chars().count(),
            has_image = request.input_image.is_some(),
            "sending Gemini generateContent request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(self.parse_error(status.as_u16(), &text, &headers));
        }

        let gemini_response: GeminiResponse = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let duration_ms = start.elapsed().as_millis() as u64;
        gemini_response.into_image(GenerationMetadata {
            model: Some(self.model.as_str().to_string()),
            duration_ms: Some(duration_ms),
        })
    }

    fn map_transport_error(&self, e: reqwest::Error) -> SceneGenError {
        if e.is_timeout() {
            SceneGenError::Timeout(self.timeout)
        } else {
            SceneGenError::Network(e)
        }
    }

    fn parse_error(
        &self,
        status: u16,
        text: &str,
        headers: &reqwest::header::HeaderMap,
    ) -> SceneGenError {
        let text = sanitize_error_message(text);
        if status == 404 {
            return SceneGenError::InvalidRequest(format!(
                "Model '{}' not found. Verify the model name is correct.",
                self.model.as_str()
            ));
        }
        if status == 429 {
            let retry_after = parse_retry_after(headers).map(Duration::from_secs);
            return SceneGenError::RateLimited { retry_after };
        }
        if status == 401 || status == 403 {
            return SceneGenError::Auth(text);
        }
        let lower = text.to_lowercase();
        if lower.contains("api key not valid") || lower.contains("api_key_invalid") {
            return SceneGenError::Auth(text);
        }
        if lower.contains("safety") || lower.contains("blocked") || lower.contains("prohibited")
        {
            return SceneGenError::ContentBlocked(text);
        }
        SceneGenError::Api {
            status,
            message: text,
        }
    }
}

#[async_trait]
impl ImageProvider for GeminiProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<Option<GeneratedImage>> {
        self.generate_impl(request).await
    }

    fn name(&self) -> &str {
        "Gemini (Google)"
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/v1beta/models/{}", self.base_url, self.model.as_str());

        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        match response.status().as_u16() {
            400 | 401 | 403 => Err(SceneGenError::Auth("Invalid API key".into())),
            404 => Err(SceneGenError::InvalidRequest(
                "Model not found. Verify the model name is correct.".into(),
            )),
            s if !(200..300).contains(&s) => Err(SceneGenError::Api {
                status: s,
                message: "Health check failed".into(),
            }),
            _ => Ok(()),
        }
    }
}

// Request/Response types
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiRequestPart>,
}

/// A part in a Gemini request - can be text or inline image data.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiRequestPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiConfig {
    response_modalities: Vec<String>,
}

impl GeminiRequest {
    fn from_generation_request(req: &GenerationRequest) -> Self {
        // Prompt first, then the photo.
        let mut parts = vec![GeminiRequestPart::Text {
            text: req.prompt.clone(),
        }];

        if let Some(ref image_data) = req.input_image {
            let mime_type = ImageFormat::from_magic_bytes(image_data)
                .map(|f| f.mime_type())
                .unwrap_or("image/png")
                .to_string();

            parts.push(GeminiRequestPart::InlineData {
                inline_data: GeminiInlineData {
                    mime_type,
                    data: base64::engine::general_purpose::STANDARD.encode(image_data),
                },
            });
        }

        Self {
            contents: vec![GeminiContent { parts }],
            generation_config: GeminiConfig {
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContentResponse>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
    #[serde(default)]
    block_reason_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPartResponse {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[serde(default)]
    mime_type: Option<String>,
    data: String,
}

impl GeminiResponse {
    /// Takes the first inline image of the first candidate.
    fn into_image(self, metadata: GenerationMetadata) -> Result<Option<GeneratedImage>> {
        // Blocked prompts come back as HTTP 200 with prompt feedback.
        if let Some(feedback) = self.prompt_feedback {
            if let Some(reason) = feedback.block_reason {
                let msg = feedback
                    .block_reason_message
                    .unwrap_or_else(|| format!("Prompt blocked: {}", reason));
                return Err(SceneGenError::ContentBlocked(msg));
            }
        }

        let candidate = self.candidates.into_iter().next().ok_or_else(|| {
            SceneGenError::UnexpectedResponse("No candidates in Gemini response".into())
        })?;

        if let Some(ref finish_reason) = candidate.finish_reason {
            match finish_reason.as_str() {
                "SAFETY"
                | "IMAGE_SAFETY"
                | "IMAGE_PROHIBITED_CONTENT"
                | "RECITATION"
                | "IMAGE_RECITATION"
                | "PROHIBITED_CONTENT"
                | "BLOCKLIST" => {
                    return Err(SceneGenError::ContentBlocked(format!(
                        "Content blocked by Gemini safety filter: {}",
                        finish_reason
                    )));
                }
                _ => {} // STOP, MAX_TOKENS, NO_IMAGE etc. fall through to part inspection
            }
        }

        let content = candidate.content.ok_or_else(|| {
            SceneGenError::UnexpectedResponse("No content in Gemini candidate".into())
        })?;

        // A text-only answer is a valid response without an image.
        let Some(inline_data) = content.parts.into_iter().find_map(|p| p.inline_data) else {
            return Ok(None);
        };

        let data = base64::engine::general_purpose::STANDARD
            .decode(inline_data.data.trim())
            .map_err(|e| SceneGenError::Decode(e.to_string()))?;
        let hint = inline_data
            .mime_type
            .as_deref()
            .and_then(ImageFormat::from_mime_type);

        GeneratedImage::decode(data, hint, metadata).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::test_support::solid_image;

    fn png_response(width: u32, height: u32) -> String {
        let b64 = base64::engine::general_purpose::STANDARD
            .encode(solid_image(width, height, ImageFormat::Png));
        format!(
            r#"{{
                "candidates": [{{
                    "content": {{
                        "parts": [
                            {{ "text": "Here is the person in the scene." }},
                            {{ "inlineData": {{ "mimeType": "image/png", "data": "{b64}" }} }}
                        ]
                    }},
                    "finishReason": "STOP"
                }}]
            }}"#
        )
    }

    fn parse(json: &str) -> Result<Option<GeneratedImage>> {
        let resp: GeminiResponse = serde_json::from_str(json).unwrap();
        resp.into_image(GenerationMetadata::default())
    }

    #[test]
    fn test_gemini_model_names() {
        assert_eq!(GeminiModel::default(), GeminiModel::NanoBananaPreview);
        assert_eq!(
            GeminiModel::NanoBananaPreview.as_str(),
            "gemini-2.5-flash-image-preview"
        );
        assert_eq!(
            GeminiModel::from_name("nano-banana"),
            Some(GeminiModel::NanoBanana)
        );
        assert_eq!(
            GeminiModel::from_name("nano-banana-pro-preview"),
            Some(GeminiModel::NanoBananaPro)
        );
        assert_eq!(GeminiModel::from_name("imagen"), None);
    }

    #[test]
    fn test_builder_with_explicit_key() {
        let provider = GeminiProviderBuilder::new()
            .api_key("test-key")
            .model(GeminiModel::NanoBanana)
            .base_url("http://localhost:9999/")
            .build()
            .unwrap();
        assert_eq!(provider.model(), GeminiModel::NanoBanana);
        assert_eq!(provider.base_url, "http://localhost:9999");
    }

    #[test]
    fn test_env_key_skips_blank_values() {
        let lookup = |var: &str| match var {
            "GOOGLE_API_KEY" => Some("   ".to_string()),
            "GEMINI_API_KEY" => Some("real-key".to_string()),
            _ => None,
        };
        assert_eq!(first_non_blank_key(lookup).as_deref(), Some("real-key"));

        let first_wins = |var: &str| Some(format!("{var}-value"));
        assert_eq!(
            first_non_blank_key(first_wins).as_deref(),
            Some("GOOGLE_API_KEY-value")
        );

        assert_eq!(first_non_blank_key(|_| Some(String::new())), None);
        assert_eq!(first_non_blank_key(|_| None), None);
    }

    #[test]
    fn test_builder_rejects_blank_key() {
        let result = GeminiProviderBuilder::new().api_key("  ").build();
        assert!(matches!(result, Err(SceneGenError::Auth(_))));
    }

    #[test]
    fn test_request_puts_prompt_before_image() {
        let png = solid_image(2, 2, ImageFormat::Png);
        let prompt = "将以下人物放置在海滩上，生成一张图片";
        let req = GenerationRequest::new(prompt).with_input_image(png);
        let json = serde_json::to_value(GeminiRequest::from_generation_request(&req)).unwrap();

        let parts = json["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0]["text"], prompt);
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/png");
        assert!(parts[1]["inlineData"]["data"].is_string());
        assert_eq!(
            json["generationConfig"]["responseModalities"],
            serde_json::json!(["TEXT", "IMAGE"])
        );
        assert!(json.get("generation_config").is_none());
    }

    #[test]
    fn test_request_without_image() {
        let req = GenerationRequest::new("prompt only");
        let gemini_req = GeminiRequest::from_generation_request(&req);
        assert_eq!(gemini_req.contents[0].parts.len(), 1);
    }

    #[test]
    fn test_response_first_inline_image() {
        let image = parse(&png_response(16, 9)).unwrap().unwrap();
        assert_eq!(image.format, ImageFormat::Png);
        assert_eq!(image.dimensions(), (16, 9));
    }

    #[test]
    fn test_response_text_only_yields_none() {
        let json = r#"{
            "candidates": [{
                "content": { "parts": [{ "text": "I cannot do that." }] },
                "finishReason": "STOP"
            }]
        }"#;
        assert!(parse(json).unwrap().is_none());
    }

    #[test]
    fn test_response_without_candidates_is_unexpected() {
        for json in [r#"{"candidates": []}"#, r#"{}"#] {
            match parse(json) {
                Err(SceneGenError::UnexpectedResponse(msg)) => assert!(msg.contains("candidates")),
                other => panic!("expected UnexpectedResponse, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_response_candidate_without_content_is_unexpected() {
        let json = r#"{"candidates": [{"finishReason": "STOP"}]}"#;
        match parse(json) {
            Err(SceneGenError::UnexpectedResponse(msg)) => assert!(msg.contains("content")),
            other => panic!("expected UnexpectedResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_response_empty_parts_yields_none() {
        let json = r#"{"candidates": [{"content": {"parts": []}, "finishReason": "STOP"}]}"#;
        assert!(parse(json).unwrap().is_none());
    }

    #[test]
    fn test_response_with_prompt_feedback_block() {
        let json = r#"{
            "candidates": [],
            "promptFeedback": {
                "blockReason": "SAFETY",
                "blockReasonMessage": "Prompt was blocked due to safety"
            }
        }"#;
        match parse(json) {
            Err(SceneGenError::ContentBlocked(msg)) => {
                assert_eq!(msg, "Prompt was blocked due to safety")
            }
            other => panic!("expected ContentBlocked, got {other:?}"),
        }
    }

    #[test]
    fn test_response_safety_finish_reason() {
        let json = r#"{ "candidates": [{ "finishReason": "IMAGE_SAFETY" }] }"#;
        assert!(matches!(
            parse(json),
            Err(SceneGenError::ContentBlocked(_))
        ));
    }

    #[test]
    fn test_response_bad_base64_is_decode_error() {
        let json = r#"{
            "candidates": [{
                "content": {
                    "parts": [{ "inlineData": { "mimeType": "image/png", "data": "***" } }]
                }
            }]
        }"#;
        assert!(matches!(parse(json), Err(SceneGenError::Decode(_))));
    }

    #[test]
    fn test_parse_error_mapping() {
        let provider = GeminiProvider::builder().api_key("k").build().unwrap();
        let headers = reqwest::header::HeaderMap::new();

        assert!(matches!(
            provider.parse_error(403, "forbidden", &headers),
            SceneGenError::Auth(_)
        ));
        assert!(matches!(
            provider.parse_error(400, "API key not valid. Please pass a valid API key.", &headers),
            SceneGenError::Auth(_)
        ));
        assert!(matches!(
            provider.parse_error(404, "", &headers),
            SceneGenError::InvalidRequest(_)
        ));
        assert!(matches!(
            provider.parse_error(429, "quota", &headers),
            SceneGenError::RateLimited { retry_after: None }
        ));
        assert!(matches!(
            provider.parse_error(500, "internal", &headers),
            SceneGenError::Api { status: 500, .. }
        ));
    }
}
