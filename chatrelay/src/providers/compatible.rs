//! Adapter for backends speaking the OpenAI-compatible `/chat/completions`
//! and `/images/generations` endpoints (OpenRouter, Together).

use super::models::{self, ModelTable};
use super::{Adapter, missing_key, no_model, normalize_key, probe, read_json, send};
use crate::error::{AiError, ErrorKind};
use crate::types::{AiResponse, ImageOptions, Mode, Usage};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Hard cap on how many candidate models one `generate_text` call walks.
pub const MAX_MODEL_CANDIDATES: usize = 3;

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const TOGETHER_BASE_URL: &str = "https://api.together.xyz/v1";

pub struct OpenAiCompatibleAdapter {
    name: String,
    base_url: String,
    api_key: Option<String>,
    models: ModelTable,
    extra_headers: HashMap<String, String>,
    client: Client,
}

impl OpenAiCompatibleAdapter {
    pub fn new(name: &str, base_url: &str, api_key: Option<&str>, models: ModelTable) -> Self {
        let api_key = normalize_key(api_key);
        if api_key.is_none() {
            warn!(provider = %name, "no API key configured; requests will fail authentication");
        }
        Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            models,
            extra_headers: HashMap::new(),
            client: Client::new(),
        }
    }

    pub fn openrouter(api_key: Option<&str>) -> Self {
        Self::new("openrouter", OPENROUTER_BASE_URL, api_key, models::openrouter_models())
            .with_header("HTTP-Referer", "https://github.com/chatrelay/chatrelay")
            .with_header("X-Title", "chatrelay")
    }

    pub fn together(api_key: Option<&str>) -> Self {
        Self::new("together", TOGETHER_BASE_URL, api_key, models::together_models())
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_models(mut self, models: ModelTable) -> Self {
        self.models = models;
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers.insert(name.to_string(), value.to_string());
        self
    }

    /// The ranked model list `generate_text` walks for `mode`.
    pub fn candidates_for(&self, mode: Mode) -> Vec<&str> {
        self.models
            .candidates(mode)
            .iter()
            .take(MAX_MODEL_CANDIDATES)
            .map(String::as_str)
            .collect()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorized(&self, req: reqwest::RequestBuilder, key: &str) -> reqwest::RequestBuilder {
        let mut req = req.bearer_auth(key);
        for (k, v) in &self.extra_headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req
    }

    async fn chat_once(
        &self,
        model: &str,
        prompt: &str,
        system_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AiResponse, AiError> {
        let key = self.api_key.as_deref().ok_or_else(|| missing_key(&self.name))?;

        let mut messages = Vec::with_capacity(2);
        if let Some(sys) = system_prompt.filter(|s| !s.trim().is_empty()) {
            messages.push(ChatMsg { role: "system", content: sys });
        }
        messages.push(ChatMsg { role: "user", content: prompt });

        let body = ChatRequest {
            model,
            messages,
            stream: false,
        };
        let req = self.authorized(self.client.post(self.endpoint("chat/completions")), key);
        let resp = send(&self.name, req.json(&body), cancel).await?;
        let parsed: ChatResponse = read_json(&self.name, resp).await?;

        // Some gateways report failures inside a 200.
        if let Some(err) = parsed.error.filter(|e| !e.is_null()) {
            return Err(reported_error(&self.name, err));
        }

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| AiError::new(&self.name, ErrorKind::Unknown, "empty response from model"))?;

        Ok(AiResponse {
            text,
            provider: self.name.clone(),
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            usage: parsed.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens.unwrap_or(0),
                completion_tokens: u.completion_tokens.unwrap_or(0),
                total_tokens: u
                    .total_tokens
                    .unwrap_or(u.prompt_tokens.unwrap_or(0) + u.completion_tokens.unwrap_or(0)),
            }),
        })
    }
}

// ---- Wire format ----

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMsg<'a>>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMsg<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    model: Option<String>,
    usage: Option<UsageResp>,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResp,
}

#[derive(Deserialize)]
struct ChatMessageResp {
    content: Option<String>,
}

#[derive(Deserialize)]
struct UsageResp {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct WireError {
    message: Option<String>,
    code: Option<serde_json::Value>,
}

/// Classify an `error` field found in a 200 body. Gateways send either a
/// bare string or an object with `message` and `code`.
fn reported_error(provider: &str, error: serde_json::Value) -> AiError {
    let wire = match error {
        serde_json::Value::String(message) => return super::classify_message(provider, &message),
        other => serde_json::from_value::<WireError>(other.clone()).unwrap_or(WireError {
            message: Some(other.to_string()),
            code: None,
        }),
    };
    let message = wire.message.unwrap_or_else(|| "provider reported an error".into());
    let status = wire
        .code
        .as_ref()
        .and_then(serde_json::Value::as_u64)
        .and_then(|c| u16::try_from(c).ok());
    match status {
        Some(status) => super::classify_response(provider, status, &message),
        None => super::classify_message(provider, &message),
    }
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    width: u32,
    height: u32,
    n: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    url: Option<String>,
    b64_json: Option<String>,
}

#[async_trait]
impl Adapter for OpenAiCompatibleAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn modes(&self) -> Vec<Mode> {
        self.models.modes()
    }

    async fn generate_text(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        mode: Mode,
        cancel: &CancellationToken,
    ) -> Result<AiResponse, AiError> {
        let candidates = self.candidates_for(mode);
        if candidates.is_empty() {
            return Err(no_model(&self.name, mode));
        }

        let mut last_err = None;
        for (i, model) in candidates.iter().enumerate() {
            debug!(provider = %self.name, model = %model, mode = %mode, "chat completion");
            match self.chat_once(model, prompt, system_prompt, cancel).await {
                Ok(resp) => return Ok(resp),
                Err(e) if e.kind == ErrorKind::RateLimit && i + 1 < candidates.len() => {
                    warn!(
                        provider = %self.name,
                        model = %model,
                        next = %candidates[i + 1],
                        "model rate limited; trying next candidate"
                    );
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| no_model(&self.name, mode)))
    }

    async fn generate_image(
        &self,
        prompt: &str,
        options: &ImageOptions,
        cancel: &CancellationToken,
    ) -> Result<String, AiError> {
        let model = self
            .models
            .primary(Mode::Image)
            .ok_or_else(|| no_model(&self.name, Mode::Image))?;
        let key = self.api_key.as_deref().ok_or_else(|| missing_key(&self.name))?;

        let body = ImageRequest {
            model,
            prompt,
            width: options.width,
            height: options.height,
            n: 1,
            steps: options.steps,
            negative_prompt: options.negative_prompt.as_deref(),
        };
        let req = self.authorized(self.client.post(self.endpoint("images/generations")), key);
        let resp = send(&self.name, req.json(&body), cancel).await?;
        let parsed: ImageResponse = read_json(&self.name, resp).await?;

        let datum = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| AiError::new(&self.name, ErrorKind::Unknown, "no image in response"))?;
        match (datum.url, datum.b64_json) {
            (Some(url), _) if !url.is_empty() => Ok(url),
            (_, Some(b64)) if !b64.is_empty() => {
                // Decode first so a corrupt payload is reported here.
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(b64.as_bytes())
                    .map_err(|e| {
                        AiError::new(&self.name, ErrorKind::Unknown, format!("malformed image data: {}", e))
                    })?;
                Ok(super::huggingface::data_url("image/png", &bytes))
            }
            _ => Err(AiError::new(&self.name, ErrorKind::Unknown, "no image in response")),
        }
    }

    async fn is_available(&self) -> bool {
        let Some(key) = self.api_key.as_deref() else {
            return false;
        };
        probe(&self.name, self.authorized(self.client.get(self.endpoint("models")), key)).await
    }
}
