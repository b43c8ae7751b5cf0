//! Integration tests for the judge-model client.
//!
//! These tests make real API calls to an OpenAI-compatible endpoint.
//! Run with: OPENAI_API_KEY=your_key cargo test --test llm_integration -- --ignored

use std::sync::Arc;

use webjudge::judge::{JudgeConfig, KeyPointExtractor};
use webjudge::llm::{
    call_with_retry, GenerationRequest, LlmProvider, Message, OpenAiClient, RetryPolicy,
    DEFAULT_API_BASE, DEFAULT_MODEL,
};
use webjudge::trajectory::Task;
use webjudge::LlmError;

fn get_test_api_key() -> String {
    std::env::var("OPENAI_API_KEY")
        .expect("OPENAI_API_KEY environment variable must be set for integration tests")
}

fn create_test_client() -> OpenAiClient {
    let api_base =
        std::env::var("WEBJUDGE_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
    OpenAiClient::new(api_base, get_test_api_key(), DEFAULT_MODEL).expect("valid client")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_simple_generation() {
    let client = create_test_client();

    let request = GenerationRequest::new(
        "",
        vec![
            Message::system("You are a helpful assistant. Reply concisely."),
            Message::user("What is 2 + 2? Reply with just the number."),
        ],
    )
    .with_max_tokens(10)
    .with_temperature(0.0);

    let response = client.generate(request).await;
    assert!(response.is_ok(), "Generation failed: {:?}", response.err());

    let response = response.expect("Should have response");
    let content = response.first_content().expect("Should have content");
    assert!(
        content.contains('4'),
        "Response should contain '4', got: {}",
        content
    );
    assert!(response.usage.total_tokens > 0, "Should have token usage");
}

#[tokio::test]
#[ignore]
async fn test_retrying_call_parses_answer() {
    let client = create_test_client();
    let request = GenerationRequest::new(
        "",
        vec![Message::user(
            "Reply with the JSON object {\"status\": \"success\"} and nothing else.",
        )],
    )
    .with_temperature(0.0);

    let status = call_with_retry(&client, &request, &RetryPolicy::new(3), "ping", |text| {
        webjudge::utils::extract_json_value(text)
            .and_then(|v| v.get("status").and_then(|s| s.as_str()).map(str::to_string))
            .ok_or_else(|| "no status".to_string())
    })
    .await
    .expect("call should succeed");
    assert_eq!(status, "success");
}

#[tokio::test]
#[ignore]
async fn test_key_point_extraction_live() {
    let client: Arc<dyn LlmProvider> = Arc::new(create_test_client());
    let extractor = KeyPointExtractor::new(client, JudgeConfig::default());

    let task = Task::new(
        "live-1",
        "Find the cheapest one-way flight from New York to Boston on the 5th of next month",
    );
    let key_points = extractor.extract(&task).await.expect("extraction succeeds");
    assert!(!key_points.is_empty(), "Should extract at least one key point");
}

#[tokio::test]
#[ignore]
async fn test_invalid_api_key() {
    let client = OpenAiClient::new(DEFAULT_API_BASE, "invalid-key", DEFAULT_MODEL)
        .expect("client builds");

    let request = GenerationRequest::new("", vec![Message::user("test")]).with_max_tokens(5);

    let response = client.generate(request).await;
    assert!(response.is_err(), "Should fail with invalid API key");
}

#[test]
fn test_empty_api_key_rejected() {
    let result = OpenAiClient::new(DEFAULT_API_BASE, "  ", DEFAULT_MODEL);
    assert!(matches!(result, Err(LlmError::MissingApiKey)));
}
