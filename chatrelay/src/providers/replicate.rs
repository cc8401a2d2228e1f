//! Replicate predictions: asynchronous image backend. One POST creates the
//! prediction, then GET polls follow until it settles.

use super::models::{self, ModelTable};
use super::{Adapter, missing_key, no_model, normalize_key, probe, read_json, send, with_cancel};
use crate::error::{AiError, ErrorKind};
use crate::types::{ImageOptions, Mode};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const REPLICATE_BASE_URL: &str = "https://api.replicate.com/v1";
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_POLLS: u32 = 60;

pub struct ReplicateAdapter {
    name: String,
    base_url: String,
    api_key: Option<String>,
    models: ModelTable,
    poll_interval: Duration,
    max_polls: u32,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl Prediction {
    fn first_output(&self) -> Option<String> {
        match self.output.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => items.iter().find_map(|v| v.as_str().map(String::from)),
            _ => None,
        }
    }

    fn error_text(&self) -> String {
        match &self.error {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => format!("prediction {}", self.status),
        }
    }
}

impl ReplicateAdapter {
    pub fn new(api_key: Option<&str>) -> Self {
        let api_key = normalize_key(api_key);
        if api_key.is_none() {
            warn!(provider = "replicate", "no API token configured; requests will fail authentication");
        }
        Self {
            name: "replicate".to_string(),
            base_url: REPLICATE_BASE_URL.to_string(),
            api_key,
            models: models::replicate_models(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
            client: Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_models(mut self, models: ModelTable) -> Self {
        self.models = models;
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    async fn poll(
        &self,
        key: &str,
        mut prediction: Prediction,
        cancel: &CancellationToken,
    ) -> Result<String, AiError> {
        let url = format!("{}/predictions/{}", self.base_url, prediction.id);
        for poll in 0..=self.max_polls {
            match prediction.status.as_str() {
                "succeeded" => {
                    return prediction.first_output().ok_or_else(|| {
                        AiError::new(&self.name, ErrorKind::Unknown, "prediction succeeded without output")
                    });
                }
                "failed" | "canceled" => {
                    return Err(super::classify_message(&self.name, &prediction.error_text()));
                }
                _ if poll == self.max_polls => break,
                status => {
                    debug!(provider = %self.name, id = %prediction.id, status = %status, poll, "prediction pending");
                }
            }

            with_cancel(&self.name, cancel, async {
                tokio::time::sleep(self.poll_interval).await;
                Ok(())
            })
            .await?;
            let resp = send(&self.name, self.client.get(&url).bearer_auth(key), cancel).await?;
            prediction = read_json(&self.name, resp).await?;
        }

        Err(AiError::new(
            &self.name,
            ErrorKind::ServiceUnavailable,
            format!("prediction {} did not finish after {} polls", prediction.id, self.max_polls),
        ))
    }
}

#[async_trait]
impl Adapter for ReplicateAdapter {
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

        let mut input = json!({
            "prompt": prompt,
            "width": options.width,
            "height": options.height,
        });
        if let Some(negative) = &options.negative_prompt {
            input["negative_prompt"] = json!(negative);
        }
        if let Some(steps) = options.steps {
            input["num_inference_steps"] = json!(steps);
        }

        let url = format!("{}/models/{}/predictions", self.base_url, model);
        let req = self.client.post(&url).bearer_auth(key).json(&json!({ "input": input }));
        let resp = send(&self.name, req, cancel).await?;
        let prediction: Prediction = read_json(&self.name, resp).await?;
        debug!(provider = %self.name, id = %prediction.id, model = %model, "prediction created");

        self.poll(key, prediction, cancel).await
    }

    async fn is_available(&self) -> bool {
        let Some(key) = self.api_key.as_deref() else {
            return false;
        };
        let url = format!("{}/account", self.base_url);
        probe(&self.name, self.client.get(&url).bearer_auth(key)).await
    }
}
