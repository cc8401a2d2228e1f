//! Hugging Face inference API: text-to-image models answer with raw image
//! bytes, which are handed back as a base64 `data:` URL.

use super::models::{self, ModelTable};
use super::{Adapter, missing_key, no_model, normalize_key, probe, send};
use crate::error::{AiError, ErrorKind};
use crate::types::{ImageOptions, Mode};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const INFERENCE_BASE_URL: &str = "https://api-inference.huggingface.co";
pub const HUB_BASE_URL: &str = "https://huggingface.co";

pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime_type,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

pub struct HuggingFaceAdapter {
    name: String,
    base_url: String,
    hub_url: String,
    api_key: Option<String>,
    models: ModelTable,
    client: Client,
}

impl HuggingFaceAdapter {
    pub fn new(api_key: Option<&str>) -> Self {
        let api_key = normalize_key(api_key);
        if api_key.is_none() {
            warn!(provider = "huggingface", "no API token configured; requests will fail authentication");
        }
        Self {
            name: "huggingface".to_string(),
            base_url: INFERENCE_BASE_URL.to_string(),
            hub_url: HUB_BASE_URL.to_string(),
            api_key,
            models: models::huggingface_models(),
            client: Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_hub_url(mut self, hub_url: &str) -> Self {
        self.hub_url = hub_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_models(mut self, models: ModelTable) -> Self {
        self.models = models;
        self
    }
}

#[async_trait]
impl Adapter for HuggingFaceAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn modes(&self) -> Vec<Mode> {
        self.models.modes()
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

        let mut parameters = json!({
            "width": options.width,
            "height": options.height,
        });
        if let Some(negative) = &options.negative_prompt {
            parameters["negative_prompt"] = json!(negative);
        }
        if let Some(steps) = options.steps {
            parameters["num_inference_steps"] = json!(steps);
        }

        debug!(provider = %self.name, model = %model, "text-to-image request");
        let url = format!("{}/models/{}", self.base_url, model);
        let req = self
            .client
            .post(&url)
            .bearer_auth(key)
            .header("Accept", "image/png")
            .json(&json!({ "inputs": prompt, "parameters": parameters }));
        let resp = send(&self.name, req, cancel).await?;

        let mime_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or_else(|| "image/png".to_string());
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| super::classify_transport(&self.name, &e))?;

        if !mime_type.starts_with("image/") {
            // A JSON body here is an error report (e.g. model still loading).
            let text = String::from_utf8_lossy(&bytes);
            return Err(super::classify_message(&self.name, &text));
        }
        if bytes.is_empty() {
            return Err(AiError::new(&self.name, ErrorKind::Unknown, "empty image body"));
        }
        Ok(data_url(&mime_type, &bytes))
    }

    async fn is_available(&self) -> bool {
        let Some(key) = self.api_key.as_deref() else {
            return false;
        };
        let url = format!("{}/api/whoami-v2", self.hub_url);
        probe(&self.name, self.client.get(&url).bearer_auth(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_encodes_bytes() {
        assert_eq!(data_url("image/png", b"abc"), "data:image/png;base64,YWJj");
    }

    #[tokio::test]
    async fn text_generation_is_unsupported() {
        let adapter = HuggingFaceAdapter::new(Some("hf_token"));
        let err = adapter
            .generate_text("hi", None, Mode::Chat, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert_eq!(adapter.modes(), [Mode::Image]);
    }
}
