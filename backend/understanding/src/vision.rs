//! Vision LLM providers: send an image plus a prompt, get text back.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use slipscan_core::{SlipError, SlipResult};
use slipscan_logging::redact_sensitive_data;
use tracing::{debug, info};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com";
const MAX_ERROR_BODY: usize = 500;

/// Supported vision providers.
#[derive(Debug, Clone)]
pub enum VisionProvider {
    Gemini {
        api_key: String,
        model: String,
        base_url: String,
    },
    OpenAI {
        api_key: String,
        model: String,
        base_url: String,
    },
}

impl VisionProvider {
    pub fn gemini(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::Gemini {
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::OpenAI {
            api_key: api_key.into(),
            model: model.into(),
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }

    /// Point the provider at a different host (proxies, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into().trim_end_matches('/').to_string();
        match &mut self {
            Self::Gemini { base_url, .. } | Self::OpenAI { base_url, .. } => *base_url = url,
        }
        self
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gemini { .. } => "gemini",
            Self::OpenAI { .. } => "openai",
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::Gemini { model, .. } | Self::OpenAI { model, .. } => model,
        }
    }
}

/// Describe an image from raw bytes using a vision LLM.
pub async fn describe_image(
    client: &reqwest::Client,
    provider: &VisionProvider,
    image_bytes: &[u8],
    mime_type: &str,
    prompt: &str,
) -> SlipResult<String> {
    let b64 = STANDARD.encode(image_bytes);
    match provider {
        VisionProvider::Gemini { api_key, model, base_url } => {
            describe_via_gemini(client, base_url, api_key, model, &b64, mime_type, prompt).await
        }
        VisionProvider::OpenAI { api_key, model, base_url } => {
            describe_via_openai(client, base_url, api_key, model, &b64, mime_type, prompt).await
        }
    }
}

#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default, rename = "promptFeedback")]
    prompt_feedback: Option<GeminiFeedback>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct GeminiFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

async fn describe_via_gemini(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    b64: &str,
    mime_type: &str,
    prompt: &str,
) -> SlipResult<String> {
    info!(model, "Describing image via Gemini");
    let url = format!("{base_url}/v1beta/models/{model}:generateContent");
    let body = serde_json::json!({
        "contents": [{ "parts": [
            { "text": prompt },
            { "inlineData": { "mimeType": mime_type, "data": b64 } }
        ]}],
        "generationConfig": {
            "responseMimeType": "application/json",
            "temperature": 0
        }
    });
    let resp = client
        .post(&url)
        .header("x-goog-api-key", api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| SlipError::transport("gemini", e))?;

    let resp = check_status("gemini", resp).await?;
    let parsed: GeminiResponse = resp
        .json()
        .await
        .map_err(|e| SlipError::Parse(format!("gemini response body: {e}")))?;

    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        let reason = parsed
            .prompt_feedback
            .and_then(|f| f.block_reason)
            .unwrap_or_else(|| "no candidates".to_string());
        return Err(SlipError::Parse(format!("gemini returned no text ({reason})")));
    }
    debug!(chars = text.len(), "Gemini response received");
    Ok(text)
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

async fn describe_via_openai(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    b64: &str,
    mime_type: &str,
    prompt: &str,
) -> SlipResult<String> {
    info!(model, "Describing image via OpenAI");
    let body = serde_json::json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                { "type": "image_url",
                  "image_url": { "url": format!("data:{};base64,{}", mime_type, b64) } }
            ]
        }],
        "response_format": { "type": "json_object" },
        "max_tokens": 2048
    });
    let resp = client
        .post(format!("{base_url}/v1/chat/completions"))
        .bearer_auth(api_key)
        .json(&body)
        .send()
        .await
        .map_err(|e| SlipError::transport("openai", e))?;

    let resp = check_status("openai", resp).await?;
    let parsed: ChatResponse = resp
        .json()
        .await
        .map_err(|e| SlipError::Parse(format!("openai response body: {e}")))?;

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| SlipError::Parse("openai returned no text".to_string()))
}

async fn check_status(service: &str, resp: reqwest::Response) -> SlipResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    Err(SlipError::upstream(service, status.as_u16(), redact_sensitive_data(&body)))
}
