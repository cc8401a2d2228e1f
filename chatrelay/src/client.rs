use crate::apology;
use crate::clock::Clock;
use crate::config::{self, RelayConfig};
use crate::error::{AiError, ErrorKind, RelayError};
use crate::fallback::{FallbackManager, FallbackPolicy};
use crate::providers::models::ModelTable;
use crate::providers::{Adapter, HuggingFaceAdapter, OpenAiCompatibleAdapter, ReplicateAdapter};
use crate::registry::ProviderRegistry;
use crate::retry::{self, RetryConfig, RetryDriver};
use crate::types::{AiResponse, ImageOptions, Mode, ProviderDescriptor, ProviderStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Caller-facing entry point: routes text requests through the fallback
/// manager and image requests to a single backend with retries.
pub struct RelayClient {
    adapters: HashMap<String, Arc<dyn Adapter>>,
    registry: Arc<ProviderRegistry>,
    driver: RetryDriver,
}

impl RelayClient {
    pub fn builder() -> RelayBuilder {
        RelayBuilder::new()
    }

    /// Build the built-in adapters from configuration and the environment.
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        Ok(RelayBuilder::from_config(config)?.build())
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn fallback(&self) -> &Arc<FallbackManager> {
        self.driver.fallback()
    }

    pub fn retry_config(&self) -> &RetryConfig {
        self.driver.config()
    }

    pub fn adapter(&self, name: &str) -> Option<&Arc<dyn Adapter>> {
        self.adapters.get(name)
    }

    /// Swap in another fallback manager, e.g. one per user session.
    /// It must be built over this client's registry.
    pub fn with_fallback_manager(mut self, fallback: Arc<FallbackManager>) -> Self {
        let config = *self.driver.config();
        self.driver = RetryDriver::new(fallback, config);
        self
    }

    /// A fresh manager over this client's registry with the same policy.
    pub fn session_fallback_manager(&self) -> Arc<FallbackManager> {
        Arc::new(FallbackManager::new(self.registry.clone()).with_policy(self.fallback().policy()))
    }

    fn lookup(&self, name: &str) -> Result<Arc<dyn Adapter>, AiError> {
        self.adapters.get(name).cloned().ok_or_else(|| {
            AiError::new(name, ErrorKind::InvalidRequest, format!("no adapter registered for {}", name))
        })
    }

    pub async fn generate_text(
        &self,
        mode: Mode,
        prompt: &str,
        system_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AiResponse, RelayError> {
        if !mode.is_text() {
            return Err(RelayError::NotTextMode(mode));
        }
        let span = tracing::info_span!("generate_text", request_id = %uuid::Uuid::new_v4(), mode = %mode);
        self.driver
            .run(mode, cancel, |provider| {
                let adapter = self.lookup(&provider.name);
                async move {
                    adapter?
                        .generate_text(prompt, system_prompt, mode, cancel)
                        .await
                }
            })
            .instrument(span)
            .await
    }

    /// Generate an image and return its URL.
    ///
    /// Uses `options.provider` when set, otherwise the highest-priority image
    /// provider, and retries that one backend with backoff.
    pub async fn generate_image(
        &self,
        prompt: &str,
        options: &ImageOptions,
        cancel: &CancellationToken,
    ) -> Result<String, RelayError> {
        let descriptor = self.image_backend(options.provider.as_deref())?;
        let adapter = self
            .adapters
            .get(&descriptor.name)
            .cloned()
            .ok_or_else(|| RelayError::UnknownProvider(descriptor.name.clone()))?;

        let span = tracing::info_span!(
            "generate_image",
            request_id = %uuid::Uuid::new_v4(),
            provider = %descriptor.name
        );
        retry::retry_same(self.driver.config(), cancel, |_| {
            let adapter = adapter.clone();
            async move { adapter.generate_image(prompt, options, cancel).await }
        })
        .instrument(span)
        .await
    }

    fn image_backend(&self, requested: Option<&str>) -> Result<ProviderDescriptor, RelayError> {
        let candidates = self.registry.list_for_mode(Mode::Image);
        match requested {
            Some(name) => {
                if let Some(d) = candidates.into_iter().find(|d| d.name == name) {
                    Ok(d)
                } else if self.registry.list_all().iter().any(|d| d.name == name) {
                    Err(RelayError::UnsupportedMode {
                        provider: name.to_string(),
                        mode: Mode::Image,
                    })
                } else {
                    Err(RelayError::UnknownProvider(name.to_string()))
                }
            }
            None => candidates
                .into_iter()
                .next()
                .ok_or(RelayError::NoProviders(Mode::Image)),
        }
    }

    /// Like `generate_text`, but failures come back as an apology message.
    pub async fn reply(
        &self,
        mode: Mode,
        prompt: &str,
        system_prompt: Option<&str>,
        cancel: &CancellationToken,
    ) -> String {
        match self.generate_text(mode, prompt, system_prompt, cancel).await {
            Ok(resp) => resp.text,
            Err(e) => {
                tracing::warn!(error = %e, mode = %mode, "text generation failed");
                apology::user_message(&e)
            }
        }
    }

    /// Like `generate_image`, but failures come back as an apology message.
    pub async fn image_reply(
        &self,
        prompt: &str,
        options: &ImageOptions,
        cancel: &CancellationToken,
    ) -> String {
        match self.generate_image(prompt, options, cancel).await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "image generation failed");
                apology::user_message(&e)
            }
        }
    }

    pub fn reset_all_providers(&self) {
        self.fallback().reset_all_providers();
    }

    /// Cooldown state for every registered provider, optionally with a
    /// liveness probe per provider (run concurrently).
    pub async fn provider_status(&self, probe: bool) -> Vec<ProviderStatus> {
        let descriptors = self.registry.list_all();
        let availability: Vec<Option<bool>> = if probe {
            let probes = descriptors.iter().map(|d| {
                let adapter = self.adapters.get(&d.name).cloned();
                async move {
                    match adapter {
                        Some(a) => Some(a.is_available().await),
                        None => Some(false),
                    }
                }
            });
            futures::future::join_all(probes).await
        } else {
            vec![None; descriptors.len()]
        };

        let checked_at = chrono::Utc::now();
        descriptors
            .into_iter()
            .zip(availability)
            .map(|(d, available)| {
                let health = self.fallback().health(&d.name);
                ProviderStatus {
                    cooling_down: health.cooldown_remaining.is_some(),
                    cooldown_remaining_secs: health.cooldown_remaining.map(whole_secs_remaining),
                    attempts: health.attempts,
                    available,
                    name: d.name,
                    priority: d.priority,
                    modes: d.modes,
                    checked_at,
                }
            })
            .collect()
    }
}

/// Assembles a [`RelayClient`]: adapters become registry entries at the
/// given priority.
pub struct RelayBuilder {
    entries: Vec<(ProviderDescriptor, Arc<dyn Adapter>)>,
    retry: RetryConfig,
    policy: FallbackPolicy,
    clock: Option<Arc<dyn Clock>>,
}

impl Default for RelayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayBuilder {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            retry: RetryConfig::default(),
            policy: FallbackPolicy::default(),
            clock: None,
        }
    }

    /// Register an adapter for every mode it has models for.
    pub fn with_adapter(self, adapter: Arc<dyn Adapter>, priority: i32) -> Self {
        let modes = adapter.modes();
        self.with_adapter_modes(adapter, priority, modes)
    }

    pub fn with_adapter_modes(
        mut self,
        adapter: Arc<dyn Adapter>,
        priority: i32,
        modes: impl IntoIterator<Item = Mode>,
    ) -> Self {
        let descriptor = ProviderDescriptor::new(adapter.name(), priority, modes);
        self.entries.push((descriptor, adapter));
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Built-in adapters, honouring per-provider overrides. Disabled providers
    /// are skipped; missing API keys are logged by the adapters.
    pub fn from_config(config: &RelayConfig) -> Result<Self, RelayError> {
        config
            .validate()
            .map_err(|e| RelayError::Config(format!("{:#}", e)))?;

        let mut builder = Self::new()
            .with_retry(config.retry)
            .with_policy(config.fallback.policy());

        for name in config::BUILTIN_PROVIDERS {
            let settings = config.provider(name);
            if !settings.enabled {
                tracing::info!(provider = %name, "provider disabled in config");
                continue;
            }
            let key = config::resolve_api_key(name, settings.api_key.as_deref());
            let base_url = settings.base_url.as_deref();

            let adapter: Arc<dyn Adapter> = match name {
                "openrouter" => {
                    let mut a = OpenAiCompatibleAdapter::openrouter(key.as_deref());
                    if let Some(url) = base_url {
                        a = a.with_base_url(url);
                    }
                    Arc::new(a.with_models(override_models(
                        crate::providers::models::openrouter_models(),
                        &settings.models,
                    )))
                }
                "together" => {
                    let mut a = OpenAiCompatibleAdapter::together(key.as_deref());
                    if let Some(url) = base_url {
                        a = a.with_base_url(url);
                    }
                    Arc::new(a.with_models(override_models(
                        crate::providers::models::together_models(),
                        &settings.models,
                    )))
                }
                "huggingface" => {
                    let mut a = HuggingFaceAdapter::new(key.as_deref());
                    if let Some(url) = base_url {
                        a = a.with_base_url(url);
                    }
                    Arc::new(a.with_models(override_models(
                        crate::providers::models::huggingface_models(),
                        &settings.models,
                    )))
                }
                "replicate" => {
                    let mut a = ReplicateAdapter::new(key.as_deref());
                    if let Some(url) = base_url {
                        a = a.with_base_url(url);
                    }
                    Arc::new(a.with_models(override_models(
                        crate::providers::models::replicate_models(),
                        &settings.models,
                    )))
                }
                other => return Err(RelayError::Config(format!("no built-in adapter named {}", other))),
            };

            let priority = settings.priority.unwrap_or_else(|| config::default_priority(name));
            builder = builder.with_adapter(adapter, priority);
        }

        for name in config.providers.keys() {
            if !config::BUILTIN_PROVIDERS.contains(&name.as_str()) {
                tracing::warn!(provider = %name, "ignoring settings for unknown provider");
            }
        }
        Ok(builder)
    }

    pub fn build(self) -> RelayClient {
        let mut registry = ProviderRegistry::new();
        let mut adapters = HashMap::new();
        for (descriptor, adapter) in self.entries {
            adapters.insert(descriptor.name.clone(), adapter);
            registry.register(descriptor);
        }
        let registry = Arc::new(registry);

        let mut fallback = FallbackManager::new(registry.clone()).with_policy(self.policy);
        if let Some(clock) = self.clock {
            fallback = fallback.with_clock(clock);
        }

        RelayClient {
            adapters,
            registry,
            driver: RetryDriver::new(Arc::new(fallback), self.retry),
        }
    }
}

/// Round up so a provider that is still cooling never reports `0` seconds left.
fn whole_secs_remaining(remaining: std::time::Duration) -> u64 {
    remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
}

fn override_models(
    mut table: ModelTable,
    overrides: &std::collections::BTreeMap<Mode, Vec<String>>,
) -> ModelTable {
    for (mode, models) in overrides {
        table.set(*mode, models.clone());
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ProviderSettings;
    use async_trait::async_trait;
    use std::time::Duration;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Adapter that fails with a fixed kind, or succeeds when `fail` is None.
    struct ScriptedAdapter {
        name: &'static str,
        modes: Vec<Mode>,
        fail: Option<ErrorKind>,
        calls: AtomicU32,
    }

    impl ScriptedAdapter {
        fn new(name: &'static str, modes: &[Mode], fail: Option<ErrorKind>) -> Arc<Self> {
            Arc::new(Self {
                name,
                modes: modes.to_vec(),
                fail,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Adapter for ScriptedAdapter {
        fn name(&self) -> &str {
            self.name
        }

        fn modes(&self) -> Vec<Mode> {
            self.modes.clone()
        }

        async fn generate_text(
            &self,
            prompt: &str,
            _system_prompt: Option<&str>,
            mode: Mode,
            _cancel: &CancellationToken,
        ) -> Result<AiResponse, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail {
                Some(kind) => Err(AiError::new(self.name, kind, format!("{} failed", self.name))),
                None => Ok(AiResponse {
                    text: format!("{} says {} ({})", self.name, prompt, mode),
                    provider: self.name.to_string(),
                    model: "scripted".to_string(),
                    usage: None,
                }),
            }
        }

        async fn generate_image(
            &self,
            prompt: &str,
            _options: &ImageOptions,
            _cancel: &CancellationToken,
        ) -> Result<String, AiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fail {
                Some(kind) => Err(AiError::new(self.name, kind, "image failed")),
                None => Ok(format!("https://img.test/{}/{}", self.name, prompt)),
            }
        }

        async fn is_available(&self) -> bool {
            self.fail.is_none()
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_retries: 2,
            base_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[tokio::test]
    async fn text_falls_back_to_next_provider() {
        let alpha = ScriptedAdapter::new("alpha", &[Mode::Chat], Some(ErrorKind::RateLimit));
        let beta = ScriptedAdapter::new("beta", &[Mode::Chat], None);
        let client = RelayClient::builder()
            .with_adapter(alpha.clone(), 1)
            .with_adapter(beta.clone(), 2)
            .with_retry(fast_retry())
            .build();

        let resp = client
            .generate_text(Mode::Chat, "hi", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resp.provider, "beta");
        assert_eq!(alpha.calls(), 1);
        assert_eq!(beta.calls(), 1);
    }

    #[tokio::test]
    async fn reply_turns_failure_into_apology() {
        let alpha = ScriptedAdapter::new("alpha", &[Mode::Chat], Some(ErrorKind::ServiceUnavailable));
        let client = RelayClient::builder()
            .with_adapter(alpha.clone(), 1)
            .with_retry(fast_retry())
            .build();

        let reply = client
            .reply(Mode::Chat, "hi", None, &CancellationToken::new())
            .await;
        assert!(reply.contains("temporarily unavailable"));
        assert_eq!(alpha.calls(), 3);
    }

    #[tokio::test]
    async fn image_mode_is_rejected_for_text() {
        let client = RelayClient::builder().build();
        let err = client
            .generate_text(Mode::Image, "cat", None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::NotTextMode(Mode::Image)));
    }

    #[tokio::test]
    async fn image_retries_same_backend_only() {
        let painter = ScriptedAdapter::new("painter", &[Mode::Image], Some(ErrorKind::Unknown));
        let backup = ScriptedAdapter::new("backup", &[Mode::Image], None);
        let client = RelayClient::builder()
            .with_adapter(painter.clone(), 1)
            .with_adapter(backup.clone(), 2)
            .with_retry(fast_retry())
            .build();

        let err = client
            .generate_image("cat", &ImageOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Exhausted { attempts: 3, .. }));
        assert_eq!(painter.calls(), 3);
        assert_eq!(backup.calls(), 0);
        assert!(!client.fallback().is_cooling_down("painter"));
    }

    #[tokio::test]
    async fn image_provider_can_be_pinned() {
        let painter = ScriptedAdapter::new("painter", &[Mode::Image], None);
        let writer = ScriptedAdapter::new("writer", &[Mode::Chat], None);
        let client = RelayClient::builder()
            .with_adapter(painter.clone(), 5)
            .with_adapter(writer, 1)
            .build();

        let opts = ImageOptions {
            provider: Some("painter".into()),
            ..Default::default()
        };
        let url = client
            .generate_image("cat", &opts, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(url, "https://img.test/painter/cat");

        let opts = ImageOptions {
            provider: Some("writer".into()),
            ..Default::default()
        };
        let err = client
            .generate_image("cat", &opts, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UnsupportedMode { .. }));

        let opts = ImageOptions {
            provider: Some("nobody".into()),
            ..Default::default()
        };
        let reply = client.image_reply("cat", &opts, &CancellationToken::new()).await;
        assert!(reply.contains("nobody"));
    }

    #[tokio::test]
    async fn status_reports_cooldown_and_probe() {
        let alpha = ScriptedAdapter::new("alpha", &[Mode::Chat], Some(ErrorKind::QuotaExceeded));
        let beta = ScriptedAdapter::new("beta", &[Mode::Chat], None);
        let client = RelayClient::builder()
            .with_adapter(alpha, 1)
            .with_adapter(beta, 2)
            .with_retry(fast_retry())
            .build();
        client
            .generate_text(Mode::Chat, "hi", None, &CancellationToken::new())
            .await
            .unwrap();

        let status = client.provider_status(true).await;
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].name, "alpha");
        assert!(status[0].cooling_down);
        assert_eq!(status[0].available, Some(false));
        assert!(!status[1].cooling_down);
        assert_eq!(status[1].available, Some(true));

        client.reset_all_providers();
        let status = client.provider_status(false).await;
        assert!(status.iter().all(|s| !s.cooling_down && s.available.is_none()));
    }

    #[tokio::test]
    async fn sub_second_cooldown_reports_one_second_left() {
        let clock = Arc::new(ManualClock::new());
        let alpha = ScriptedAdapter::new("alpha", &[Mode::Chat], Some(ErrorKind::AuthenticationError));
        let beta = ScriptedAdapter::new("beta", &[Mode::Chat], None);
        let client = RelayClient::builder()
            .with_adapter(alpha, 1)
            .with_adapter(beta, 2)
            .with_retry(fast_retry())
            .with_clock(clock.clone())
            .build();
        client
            .generate_text(Mode::Chat, "hi", None, &CancellationToken::new())
            .await
            .unwrap();

        clock.advance(Duration::from_millis(299_500));
        let status = client.provider_status(false).await;
        assert!(status[0].cooling_down);
        assert_eq!(status[0].cooldown_remaining_secs, Some(1));
    }

    #[test]
    fn remaining_seconds_round_up() {
        assert_eq!(whole_secs_remaining(Duration::from_millis(1)), 1);
        assert_eq!(whole_secs_remaining(Duration::from_secs(42)), 42);
        assert_eq!(whole_secs_remaining(Duration::from_millis(42_001)), 43);
    }

    #[tokio::test]
    async fn session_managers_are_isolated() {
        let alpha = ScriptedAdapter::new("alpha", &[Mode::Chat], Some(ErrorKind::RateLimit));
        let beta = ScriptedAdapter::new("beta", &[Mode::Chat], None);
        let shared = RelayClient::builder()
            .with_adapter(alpha, 1)
            .with_adapter(beta, 2)
            .with_retry(fast_retry())
            .build();
        let session = shared.session_fallback_manager();
        shared
            .generate_text(Mode::Chat, "hi", None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(shared.fallback().is_cooling_down("alpha"));
        assert!(!session.is_cooling_down("alpha"));
    }

    #[test]
    fn from_config_skips_disabled_and_applies_priorities() {
        let mut config = RelayConfig::default();
        config.providers.insert(
            "replicate".into(),
            ProviderSettings {
                enabled: false,
                ..Default::default()
            },
        );
        config.providers.insert(
            "huggingface".into(),
            ProviderSettings {
                priority: Some(0),
                ..Default::default()
            },
        );
        config.providers.insert(
            "openrouter".into(),
            ProviderSettings {
                models: [(Mode::Image, vec!["some/image-model".to_string()])]
                    .into_iter()
                    .collect(),
                ..Default::default()
            },
        );

        let client = RelayClient::from_config(&config).unwrap();
        let names: Vec<_> = client.registry().list_all().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["huggingface", "openrouter", "together"]);

        let image: Vec<_> = client
            .registry()
            .list_for_mode(Mode::Image)
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(image, ["huggingface", "openrouter", "together"]);
        assert!(client.adapter("replicate").is_none());
    }

    #[test]
    fn from_config_rejects_invalid_settings() {
        let mut config = RelayConfig::default();
        config.retry.max_backoff_ms = 0;
        assert!(matches!(RelayClient::from_config(&config), Err(RelayError::Config(_))));
    }
}
