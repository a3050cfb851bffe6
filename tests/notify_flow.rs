use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::post;
use axum::{Json, Router};
use deploy_notify::context::{self, ContextInputs, Invocation};
use deploy_notify::error::NotifyError;
use deploy_notify::{
    BROWSER_USER_AGENT, DiscordConfig, NotifyConfig, OpenAiConfig, StyleVariant, notify,
};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Clone)]
struct Receiver {
    webhook_status: StatusCode,
    openai_status: StatusCode,
    webhook_delay: Duration,
    openai_delay: Duration,
    webhook_calls: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
    openai_calls: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
}

async fn webhook(
    State(state): State<Receiver>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, &'static str) {
    state.webhook_calls.lock().unwrap().push((headers, body));
    tokio::time::sleep(state.webhook_delay).await;
    if state.webhook_status.is_success() {
        (state.webhook_status, "")
    } else {
        (state.webhook_status, "{\"message\": \"Invalid Webhook Token\"}")
    }
}

async fn responses(
    State(state): State<Receiver>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.openai_calls.lock().unwrap().push((headers, body));
    tokio::time::sleep(state.openai_delay).await;
    let reply = json!({
        "output_text": "{\"headline\": \"🪝 Checkout day\", \"features\": [\"✨ One-page checkout\"], \"fixes\": [\"🔧 Cart totals round correctly\"], \"punchline\": \"Yo ho.\"}"
    });
    (state.openai_status, Json(reply))
}

/// Starts a local webhook + text-generation receiver and returns its base URL.
async fn spawn_receiver(webhook_status: StatusCode, openai_status: StatusCode) -> (String, Receiver) {
    spawn_slow_receiver(webhook_status, openai_status, Duration::ZERO, Duration::ZERO).await
}

/// Like `spawn_receiver`, but each route waits before answering.
async fn spawn_slow_receiver(
    webhook_status: StatusCode,
    openai_status: StatusCode,
    webhook_delay: Duration,
    openai_delay: Duration,
) -> (String, Receiver) {
    let receiver = Receiver {
        webhook_status,
        openai_status,
        webhook_delay,
        openai_delay,
        webhook_calls: Arc::new(Mutex::new(Vec::new())),
        openai_calls: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/api/webhooks/1/token", post(webhook))
        .route("/v1/responses", post(responses))
        .with_state(receiver.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), receiver)
}

fn inputs(base: &str, job_status: &str) -> ContextInputs {
    ContextInputs {
        webhook_url: Some(format!("{}/api/webhooks/1/token", base)),
        repository: Some("acme/app".to_string()),
        branch: Some("main".to_string()),
        actor: Some("alice".to_string()),
        run_id: Some("42".to_string()),
        server_url: Some("https://github.com".to_string()),
        commit_sha: Some("d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0c1d2e3".to_string()),
        job_status: Some(job_status.to_string()),
        commit_log: Some("a1b2c3 Add checkout flow\nd4e5f6 Fix cart total\n".to_string()),
        date_tag: Some("2026.10.19".to_string()),
        ..Default::default()
    }
}

fn invocation(base: &str, job_status: &str) -> Invocation {
    context::collect(inputs(base, job_status)).unwrap()
}

fn posted_content(receiver: &Receiver) -> String {
    let calls = receiver.webhook_calls.lock().unwrap();
    assert_eq!(calls.len(), 1, "expected exactly one webhook POST");
    calls[0].1["content"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn success_posts_commit_bullets_without_links() {
    let (base, receiver) = spawn_receiver(StatusCode::NO_CONTENT, StatusCode::OK).await;

    let digest = notify(&invocation(&base, "success"), &NotifyConfig::default())
        .await
        .unwrap();

    let content = posted_content(&receiver);
    assert_eq!(content, digest.render());
    assert!(content.starts_with("acme/app — update"));
    let first = content.find("a1b2c3 Add checkout flow").unwrap();
    let second = content.find("d4e5f6 Fix cart total").unwrap();
    assert!(first < second);
    assert!(!content.contains("http"));
    assert!(!content.contains("📊"));
    assert!(receiver.openai_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn webhook_request_carries_compatibility_headers() {
    let (base, receiver) = spawn_receiver(StatusCode::OK, StatusCode::OK).await;

    notify(&invocation(&base, "success"), &NotifyConfig::default())
        .await
        .unwrap();

    let calls = receiver.webhook_calls.lock().unwrap();
    let headers = &calls[0].0;
    assert_eq!(headers[header::USER_AGENT], BROWSER_USER_AGENT);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
}

#[tokio::test]
async fn failure_posts_facts_and_no_bullets() {
    let (base, receiver) = spawn_receiver(StatusCode::NO_CONTENT, StatusCode::OK).await;
    let mut invocation = invocation(&base, "failure");
    invocation.openai_api_key = Some("sk-test".to_string());

    let digest = notify(&invocation, &NotifyConfig::default()).await.unwrap();

    let content = posted_content(&receiver);
    assert_eq!(digest.bullet_count(), 0);
    assert!(content.contains("deploy failed"));
    assert!(content.contains("Branch: `main`"));
    assert!(content.contains("Actor: `alice`"));
    assert!(content.contains("https://github.com/acme/app/actions/runs/42"));
    assert!(content.contains("No feature list included"));
    assert!(!content.contains("Add checkout flow"));
    assert!(!content.contains("Fix cart total"));
    assert!(receiver.openai_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn unreachable_summarizer_falls_back_to_raw_bullets() {
    let (base, receiver) = spawn_receiver(StatusCode::NO_CONTENT, StatusCode::OK).await;
    let mut invocation = invocation(&base, "success");
    invocation.openai_api_key = Some("sk-test".to_string());
    let config = NotifyConfig {
        openai: OpenAiConfig {
            endpoint: "http://127.0.0.1:1/v1/responses".to_string(),
            timeout_secs: 2,
            ..Default::default()
        },
        ..Default::default()
    };

    notify(&invocation, &config).await.unwrap();

    let content = posted_content(&receiver);
    assert!(content.contains("a1b2c3 Add checkout flow"));
    assert!(content.contains("d4e5f6 Fix cart total"));
}

#[tokio::test]
async fn erroring_summarizer_falls_back_to_raw_bullets() {
    let (base, receiver) =
        spawn_receiver(StatusCode::NO_CONTENT, StatusCode::INTERNAL_SERVER_ERROR).await;
    let mut invocation = invocation(&base, "success");
    invocation.openai_api_key = Some("sk-test".to_string());
    let config = NotifyConfig {
        openai: OpenAiConfig {
            endpoint: format!("{}/v1/responses", base),
            ..Default::default()
        },
        ..Default::default()
    };

    notify(&invocation, &config).await.unwrap();

    assert_eq!(receiver.openai_calls.lock().unwrap().len(), 1);
    let content = posted_content(&receiver);
    assert!(content.contains("a1b2c3 Add checkout flow"));
    assert!(!content.contains("One-page checkout"));
}

#[tokio::test]
async fn summarizer_groups_commits_into_features_and_fixes() {
    let (base, receiver) = spawn_receiver(StatusCode::NO_CONTENT, StatusCode::OK).await;
    let mut invocation = invocation(&base, "success");
    invocation.openai_api_key = Some("sk-test".to_string());
    let mut config = NotifyConfig {
        openai: OpenAiConfig {
            endpoint: format!("{}/v1/responses", base),
            ..Default::default()
        },
        ..Default::default()
    };
    config.style.variant = StyleVariant::Narrator;

    notify(&invocation, &config).await.unwrap();

    {
        let calls = receiver.openai_calls.lock().unwrap();
        assert_eq!(calls[0].0[header::AUTHORIZATION], "Bearer sk-test");
        let prompt: Value =
            serde_json::from_str(calls[0].1["input"][1]["content"].as_str().unwrap()).unwrap();
        assert_eq!(prompt["commits"][0]["short_sha"], "a1b2c3");
    }

    let content = posted_content(&receiver);
    assert!(content.starts_with("🪝 Checkout day"));
    assert!(content.contains("⚓ App shipped to `main`"));
    assert!(content.contains("✨ Features\n✨ One-page checkout"));
    assert!(content.contains("🔧 Fixes & Improvements\n🔧 Cart totals round correctly"));
    assert!(content.contains("Yo ho."));
    assert!(!content.contains("http"));
}

#[tokio::test]
async fn slow_summarizer_times_out_to_raw_bullets() {
    let (base, receiver) = spawn_slow_receiver(
        StatusCode::NO_CONTENT,
        StatusCode::OK,
        Duration::ZERO,
        Duration::from_secs(5),
    )
    .await;
    let mut invocation = invocation(&base, "success");
    invocation.openai_api_key = Some("sk-test".to_string());
    let config = NotifyConfig {
        openai: OpenAiConfig {
            endpoint: format!("{}/v1/responses", base),
            timeout_secs: 1,
            ..Default::default()
        },
        ..Default::default()
    };

    let started = Instant::now();
    notify(&invocation, &config).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(receiver.openai_calls.lock().unwrap().len(), 1);
    let content = posted_content(&receiver);
    assert!(content.contains("a1b2c3 Add checkout flow"));
    assert!(!content.contains("One-page checkout"));
}

#[tokio::test]
async fn slow_webhook_is_a_transport_error() {
    let (base, receiver) = spawn_slow_receiver(
        StatusCode::NO_CONTENT,
        StatusCode::OK,
        Duration::from_secs(5),
        Duration::ZERO,
    )
    .await;
    let config = NotifyConfig {
        discord: DiscordConfig {
            timeout_secs: 1,
            ..Default::default()
        },
        ..Default::default()
    };

    let started = Instant::now();
    let err = notify(&invocation(&base, "success"), &config)
        .await
        .unwrap_err();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(matches!(err, NotifyError::Transport(_)));
    assert_eq!(err.exit_code(), 1);
    assert_eq!(receiver.webhook_calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn rejected_webhook_is_a_delivery_error() {
    let (base, receiver) = spawn_receiver(StatusCode::UNAUTHORIZED, StatusCode::OK).await;

    let err = notify(&invocation(&base, "success"), &NotifyConfig::default())
        .await
        .unwrap_err();

    assert_eq!(err.exit_code(), 1);
    match err {
        NotifyError::Delivery { status, body } => {
            assert_eq!(status, 401);
            assert!(body.contains("Invalid Webhook Token"));
        }
        other => panic!("expected delivery error, got {:?}", other),
    }
    assert_eq!(receiver.webhook_calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_webhook_url_fails_before_any_request() {
    let (base, receiver) = spawn_receiver(StatusCode::NO_CONTENT, StatusCode::OK).await;
    let inputs = ContextInputs {
        webhook_url: None,
        ..inputs(&base, "success")
    };

    let err = context::collect(inputs).unwrap_err();

    assert!(matches!(
        err,
        NotifyError::MissingContext {
            field: "discord-webhook-url"
        }
    ));
    assert_eq!(err.exit_code(), 2);
    assert!(receiver.webhook_calls.lock().unwrap().is_empty());
    assert!(receiver.openai_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn same_context_renders_identical_text() {
    let (base, receiver) = spawn_receiver(StatusCode::NO_CONTENT, StatusCode::OK).await;
    let invocation = invocation(&base, "success");
    let config = NotifyConfig::default();

    let first = notify(&invocation, &config).await.unwrap();
    let second = notify(&invocation, &config).await.unwrap();

    assert_eq!(first.render(), second.render());
    let calls = receiver.webhook_calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1, calls[1].1);
}
