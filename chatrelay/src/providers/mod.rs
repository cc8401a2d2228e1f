pub mod classify;
pub mod compatible;
pub mod huggingface;
pub mod models;
pub mod replicate;
pub mod sanitize;

use crate::error::{AiError, ErrorKind};
use crate::types::{AiResponse, ImageOptions, Mode};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use classify::{classify_message, classify_response, classify_transport};
pub use compatible::OpenAiCompatibleAdapter;
pub use huggingface::HuggingFaceAdapter;
pub use models::ModelTable;
pub use replicate::ReplicateAdapter;

/// Upper bound for `Adapter::is_available` probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// One integration with an upstream AI backend.
///
/// Every failure is returned already classified as an [`AiError`].
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    /// Modes this backend has models for.
    fn modes(&self) -> Vec<Mode>;

    async fn generate_text(
        &self,
        _prompt: &str,
        _system_prompt: Option<&str>,
        mode: Mode,
        _cancel: &CancellationToken,
    ) -> Result<AiResponse, AiError> {
        Err(AiError::new(
            self.name(),
            ErrorKind::InvalidRequest,
            format!("{} does not support text generation ({})", self.name(), mode),
        ))
    }

    /// Generate an image and return its URL (possibly a `data:` URL).
    async fn generate_image(
        &self,
        _prompt: &str,
        _options: &ImageOptions,
        _cancel: &CancellationToken,
    ) -> Result<String, AiError> {
        Err(AiError::new(
            self.name(),
            ErrorKind::InvalidRequest,
            format!("{} does not support image generation", self.name()),
        ))
    }

    /// Cheap authenticated liveness probe. Never errors.
    async fn is_available(&self) -> bool;
}

pub(crate) fn missing_key(provider: &str) -> AiError {
    AiError::new(
        provider,
        ErrorKind::AuthenticationError,
        format!("authentication failed: no API key configured for {}", provider),
    )
}

pub(crate) fn no_model(provider: &str, mode: Mode) -> AiError {
    AiError::new(
        provider,
        ErrorKind::InvalidRequest,
        format!("{} has no model configured for mode {}", provider, mode),
    )
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn with_cancel<T>(
    provider: &str,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, AiError>>,
) -> Result<T, AiError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AiError::cancelled(provider)),
        res = fut => res,
    }
}

/// Send a request and turn transport failures and non-2xx statuses into
/// classified errors.
pub(crate) async fn send(
    provider: &str,
    req: reqwest::RequestBuilder,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, AiError> {
    with_cancel(provider, cancel, async {
        let resp = req
            .send()
            .await
            .map_err(|e| classify_transport(provider, &e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(classify_response(provider, status.as_u16(), &body));
        }
        Ok(resp)
    })
    .await
}

pub(crate) async fn read_json<T: DeserializeOwned>(
    provider: &str,
    resp: reqwest::Response,
) -> Result<T, AiError> {
    let body = resp
        .text()
        .await
        .map_err(|e| classify_transport(provider, &e))?;
    if body.trim().is_empty() {
        return Err(AiError::new(provider, ErrorKind::Unknown, "empty response body"));
    }
    serde_json::from_str(&body).map_err(|e| {
        // A body we cannot parse may still say what went wrong.
        if classify::kind_from_message(&body) != ErrorKind::Unknown {
            return classify_message(provider, &body);
        }
        AiError::new(provider, ErrorKind::Unknown, format!("malformed response: {}", e))
    })
}

/// Fire a probe request with [`PROBE_TIMEOUT`]; true only on a 2xx.
pub(crate) async fn probe(provider: &str, req: reqwest::RequestBuilder) -> bool {
    match tokio::time::timeout(PROBE_TIMEOUT, req.send()).await {
        Ok(Ok(resp)) if resp.status().is_success() => true,
        Ok(Ok(resp)) => {
            tracing::debug!(provider = %provider, status = resp.status().as_u16(), "probe rejected");
            false
        }
        Ok(Err(e)) => {
            tracing::debug!(provider = %provider, error = %e, "probe failed");
            false
        }
        Err(_) => {
            tracing::debug!(provider = %provider, "probe timed out");
            false
        }
    }
}

/// Trim, and drop a key that is empty after trimming.
pub(crate) fn normalize_key(key: Option<&str>) -> Option<String> {
    key.map(str::trim).filter(|k| !k.is_empty()).map(String::from)
}
