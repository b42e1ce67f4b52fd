//! Integration tests for the Gemini client against a mocked endpoint.

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use nofx_core::config::GeminiConfig;
use nofx_core::error::ModelErrorCode;
use nofx_core::model::{GeminiModel, LanguageModel};

fn test_config(uri: &str) -> GeminiConfig {
    GeminiConfig {
        enabled: true,
        api_key: "test-key".to_string(),
        api_url: uri.to_string(),
        model: "gemini-2.5-flash".to_string(),
        temperature: 0.7,
        max_output_tokens: 8192,
        top_p: 0.95,
        top_k: 40,
        timeout_secs: 5,
    }
}

fn completion_body(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {"promptTokenCount": 100, "candidatesTokenCount": 50}
    })
}

#[tokio::test]
async fn successful_call_extracts_candidate_text() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .and(header("x-goog-api-key", "test-key"))
        .and(body_partial_json(json!({
            "generationConfig": {"temperature": 0.7, "topK": 40}
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion_body("market analysis\n[]")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let model = GeminiModel::new(test_config(&server.uri())).unwrap();
    let response = model.call("system prompt", "user prompt").await.unwrap();
    assert_eq!(response, "market analysis\n[]");
}

#[tokio::test]
async fn identical_prompts_served_from_cache() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("cached")))
        .expect(1) // only one real call despite two invocations
        .mount(&server)
        .await;

    let model = GeminiModel::new(test_config(&server.uri())).unwrap();
    model.call("s", "u").await.unwrap();
    model.call("s", "u").await.unwrap();

    let (calls, errors, cache_hits) = model.call_metrics();
    assert_eq!(calls, 1);
    assert_eq!(errors, 0);
    assert_eq!(cache_hits, 1);
}

#[tokio::test]
async fn rate_limit_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
        .expect(1)
        .mount(&server)
        .await;

    let model = GeminiModel::new(test_config(&server.uri())).unwrap();
    let err = model.call("s", "u").await.unwrap_err();
    assert_eq!(err.code, ModelErrorCode::RateLimit);
    assert!(err.retryable);
}

#[tokio::test]
async fn server_error_is_retryable_client_error_is_not() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .expect(1)
        .mount(&server)
        .await;

    let model = GeminiModel::new(test_config(&server.uri())).unwrap();
    let err = model.call("s", "u").await.unwrap_err();
    assert_eq!(err.code, ModelErrorCode::ApiError);
    assert!(err.retryable);
    assert_eq!(err.http_status, Some(500));

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let model = GeminiModel::new(test_config(&server.uri())).unwrap();
    let err = model.call("s", "u").await.unwrap_err();
    assert!(!err.retryable);
}

#[tokio::test]
async fn empty_candidates_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
        .expect(1)
        .mount(&server)
        .await;

    let model = GeminiModel::new(test_config(&server.uri())).unwrap();
    let err = model.call("s", "u").await.unwrap_err();
    assert!(err.message.contains("no candidates"));
}

#[tokio::test]
async fn embedded_api_error_is_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/models/gemini-2.5-flash:generateContent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": {"code": 400, "message": "invalid argument", "status": "INVALID_ARGUMENT"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let model = GeminiModel::new(test_config(&server.uri())).unwrap();
    let err = model.call("s", "u").await.unwrap_err();
    assert_eq!(err.http_status, Some(400));
    assert!(err.message.contains("invalid argument"));
}
