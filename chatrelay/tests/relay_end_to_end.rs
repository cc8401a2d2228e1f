//! Config-driven relay against mock upstreams: fallback across providers,
//! cooldown bookkeeping and apology replies.

use chatrelay::config::ProviderSettings;
use chatrelay::{
    CancellationToken, ErrorKind, ImageOptions, Mode, RelayClient, RelayConfig, RelayError,
    RetryConfig,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 2,
        base_backoff_ms: 1,
        max_backoff_ms: 2,
    }
}

fn settings(base_url: String, key: &str) -> ProviderSettings {
    ProviderSettings {
        base_url: Some(base_url),
        api_key: Some(key.to_string()),
        ..Default::default()
    }
}

fn disabled() -> ProviderSettings {
    ProviderSettings {
        enabled: false,
        ..Default::default()
    }
}

fn completion(text: &str) -> serde_json::Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": text}}],
        "usage": {"prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6}
    })
}

async fn relay(openrouter: &MockServer, together: &MockServer) -> RelayClient {
    let mut config = RelayConfig {
        retry: fast_retry(),
        ..Default::default()
    };
    config.providers.insert(
        "openrouter".into(),
        settings(format!("{}/api/v1", openrouter.uri()), "sk-or-test"),
    );
    config
        .providers
        .insert("together".into(), settings(format!("{}/v1", together.uri()), "tg-test"));
    config.providers.insert("huggingface".into(), disabled());
    config.providers.insert("replicate".into(), disabled());
    RelayClient::from_config(&config).unwrap()
}

#[tokio::test]
async fn rejected_key_falls_through_to_next_provider() {
    let openrouter = MockServer::start().await;
    let together = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {"code": 401, "message": "No auth credentials found"}
        })))
        .expect(1)
        .mount(&openrouter)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("hello from together")))
        .expect(1)
        .mount(&together)
        .await;

    let client = relay(&openrouter, &together).await;
    let resp = client
        .generate_text(Mode::Chat, "hi", None, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(resp.provider, "together");
    assert_eq!(resp.text, "hello from together");

    assert!(client.fallback().is_cooling_down("openrouter"));
    assert!(!client.fallback().is_cooling_down("together"));

    let status = client.provider_status(false).await;
    let names: Vec<&str> = status.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, ["openrouter", "together"]);
    assert!(status[0].cooling_down);
    assert!(status[0].cooldown_remaining_secs.is_some());
    assert!(status[0].available.is_none());
}

#[tokio::test]
async fn cooled_provider_is_skipped_on_next_request() {
    let openrouter = MockServer::start().await;
    let together = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(402).set_body_string("insufficient credits"))
        .expect(1)
        .mount(&openrouter)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
        .expect(2)
        .mount(&together)
        .await;

    let client = relay(&openrouter, &together).await;
    let cancel = CancellationToken::new();
    for _ in 0..2 {
        let resp = client.generate_text(Mode::Chat, "hi", None, &cancel).await.unwrap();
        assert_eq!(resp.provider, "together");
    }

    client.reset_all_providers();
    assert!(!client.fallback().is_cooling_down("openrouter"));
}

#[tokio::test]
async fn every_provider_failing_yields_apology() {
    let openrouter = MockServer::start().await;
    let together = MockServer::start().await;
    for server in [&openrouter, &together] {
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(server)
            .await;
    }

    let client = relay(&openrouter, &together).await;
    let cancel = CancellationToken::new();
    let err = client
        .generate_text(Mode::Research, "why?", None, &cancel)
        .await
        .unwrap_err();
    match &err {
        RelayError::Exhausted { attempts, last } => {
            assert_eq!(*attempts, 3);
            assert_eq!(last.kind, ErrorKind::ServiceUnavailable);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let reply = client.reply(Mode::Research, "why?", None, &cancel).await;
    assert!(reply.contains("temporarily unavailable"));
}

#[tokio::test]
async fn image_mode_is_rejected_for_text_generation() {
    let openrouter = MockServer::start().await;
    let together = MockServer::start().await;
    let client = relay(&openrouter, &together).await;
    let err = client
        .generate_text(Mode::Image, "a cat", None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::NotTextMode(Mode::Image)));
}

#[tokio::test]
async fn image_request_retries_the_same_backend() {
    let openrouter = MockServer::start().await;
    let together = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&together)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/images/generations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"url": "https://cdn.test/cat.png"}]
        })))
        .mount(&together)
        .await;

    let client = relay(&openrouter, &together).await;
    let url = client
        .generate_image("a cat", &ImageOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(url, "https://cdn.test/cat.png");
}

#[tokio::test]
async fn image_request_for_text_only_provider_is_unsupported() {
    let openrouter = MockServer::start().await;
    let together = MockServer::start().await;
    let client = relay(&openrouter, &together).await;
    let options = ImageOptions {
        provider: Some("openrouter".into()),
        ..Default::default()
    };
    let err = client
        .generate_image("a cat", &options, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::UnsupportedMode { .. }));

    let options = ImageOptions {
        provider: Some("midjourney".into()),
        ..Default::default()
    };
    let reply = client
        .image_reply("a cat", &options, &CancellationToken::new())
        .await;
    assert!(reply.contains("midjourney"));
}

#[tokio::test]
async fn cancellation_stops_the_relay() {
    let openrouter = MockServer::start().await;
    let together = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("late"))
                .set_delay(Duration::from_secs(30)),
        )
        .mount(&openrouter)
        .await;

    let client = relay(&openrouter, &together).await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = client
        .generate_text(Mode::Chat, "hi", None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Cancelled));
    assert!(!client.fallback().is_cooling_down("openrouter"));
}
