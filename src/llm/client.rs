//! OpenAI-compatible chat-completions client for the judge model.
//!
//! Requests may carry screenshots as `image_url` content parts holding
//! base64 `data:` URLs, so the same client serves text-only and multimodal
//! judge stages.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Default judge model.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// A message in a conversation with the judge model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender (e.g., "system", "user", "assistant").
    pub role: String,
    /// Plain text or a list of typed content parts.
    pub content: MessageContent,
}

/// Message body: a bare string or multimodal parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One part of a multimodal message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: url.into(),
                detail: Some("high".to_string()),
            },
        }
    }
}

impl Message {
    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a user message from multimodal parts.
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: "user".to_string(),
            content: MessageContent::Parts(parts),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: MessageContent::Text(content.into()),
        }
    }

    /// The text of this message; for multimodal messages, the text parts joined.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Number of images attached to this message.
    pub fn image_count(&self) -> usize {
        match &self.content {
            MessageContent::Text(_) => 0,
            MessageContent::Parts(parts) => parts
                .iter()
                .filter(|p| matches!(p, ContentPart::ImageUrl { .. }))
                .count(),
        }
    }
}

/// Request for text generation from the judge model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier; empty means the client's default.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Create a new generation request with default parameters.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Set the temperature for this request.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the max tokens for this request.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from a generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl GenerationResponse {
    /// Get the text of the first choice, if available.
    pub fn first_content(&self) -> Option<String> {
        self.choices.first().map(|c| c.message.text())
    }
}

/// A single generated choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    pub finish_reason: String,
}

/// Token usage statistics for a generation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The judge-model capability: one completion per call.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a response for the given request.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Builds a provider bound to one borrowed credential.
///
/// Workers call this after acquiring a key from the credential pool so every
/// judge call of a task is made with that task's key.
pub trait ProviderFactory: Send + Sync {
    fn for_credential(&self, api_key: &str) -> Result<Arc<dyn LlmProvider>, LlmError>;

    /// Model name used in result records and output file names.
    fn model(&self) -> &str;
}

/// Client for OpenAI-compatible chat-completions APIs.
pub struct OpenAiClient {
    api_base: String,
    api_key: String,
    default_model: String,
    http_client: Client,
}

impl OpenAiClient {
    /// Create a client with explicit configuration.
    ///
    /// # Arguments
    ///
    /// * `api_base` - Base URL (e.g., "https://api.openai.com/v1")
    /// * `api_key` - Bearer credential
    /// * `default_model` - Model to use when a request leaves it empty
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        default_model: impl Into<String>,
    ) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        let http_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
            http_client,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// The API key with all but the first and last four characters hidden.
    pub fn api_key_masked(&self) -> String {
        mask_key(&self.api_key)
    }
}

/// Masks a credential for logging.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    model: String,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    #[serde(default)]
    index: u32,
    message: ApiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    role: String,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for OpenAiClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = if request.model.is_empty() {
            self.default_model.as_str()
        } else {
            request.model.as_str()
        };

        let api_request = ApiRequest {
            model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.api_base);
        let http_response = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&api_request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(e.to_string())
                } else {
                    LlmError::RequestFailed(e.to_string())
                }
            })?;

        let status = http_response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|r| r.error.message)
                .unwrap_or(error_text);

            if status_code == 429 {
                return Err(LlmError::RateLimited(message));
            }
            return Err(LlmError::ApiError {
                code: status_code,
                message,
            });
        }

        let api_response: ApiResponse = http_response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))?;

        let choices = api_response
            .choices
            .into_iter()
            .map(|choice| Choice {
                index: choice.index,
                message: Message {
                    role: choice.message.role,
                    content: MessageContent::Text(choice.message.content.unwrap_or_default()),
                },
                finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
            })
            .collect();

        Ok(GenerationResponse {
            id: api_response.id,
            model: api_response.model,
            choices,
            usage: api_response.usage,
        })
    }
}

/// Creates [`OpenAiClient`]s against one endpoint and model.
#[derive(Debug, Clone)]
pub struct OpenAiProviderFactory {
    api_base: String,
    model: String,
}

impl OpenAiProviderFactory {
    pub fn new(api_base: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            model: model.into(),
        }
    }
}

impl ProviderFactory for OpenAiProviderFactory {
    fn for_credential(&self, api_key: &str) -> Result<Arc<dyn LlmProvider>, LlmError> {
        Ok(Arc::new(OpenAiClient::new(
            self.api_base.clone(),
            api_key,
            self.model.clone(),
        )?))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Reads an image file into a base64 `data:` URL.
pub fn image_data_url(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    Ok(format!("data:{};base64,{}", mime, encoded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let system = Message::system("You are an evaluator.");
        assert_eq!(system.role, "system");
        assert_eq!(system.text(), "You are an evaluator.");

        let user = Message::user_parts(vec![
            ContentPart::text("Task: buy shoes"),
            ContentPart::image("data:image/png;base64,AAAA"),
            ContentPart::text("Action history"),
        ]);
        assert_eq!(user.image_count(), 1);
        assert_eq!(user.text(), "Task: buy shoes\nAction history");
    }

    #[test]
    fn test_multimodal_serialization() {
        let message = Message::user_parts(vec![
            ContentPart::text("look"),
            ContentPart::image("data:image/png;base64,AAAA"),
        ]);
        let json = serde_json::to_value(&message).expect("serialize");

        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert_eq!(
            json["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );

        let plain = serde_json::to_value(Message::user("hi")).expect("serialize");
        assert_eq!(plain["content"], "hi");
    }

    #[test]
    fn test_api_request_skips_unset_fields() {
        let messages = vec![Message::user("test")];
        let request = ApiRequest {
            model: "gpt-4o",
            messages: &messages,
            temperature: Some(0.0),
            max_tokens: None,
        };

        let json = serde_json::to_string(&request).expect("serialization should succeed");
        assert!(json.contains("\"model\":\"gpt-4o\""));
        assert!(json.contains("\"temperature\":0.0"));
        assert!(!json.contains("max_tokens"));
    }

    #[test]
    fn test_client_requires_key() {
        let result = OpenAiClient::new(DEFAULT_API_BASE, "  ", DEFAULT_MODEL);
        assert!(matches!(result, Err(LlmError::MissingApiKey)));
    }

    #[test]
    fn test_client_trims_base_and_masks_key() {
        let client = OpenAiClient::new("http://localhost:4000/v1/", "sk-test-1234567890", "gpt-4o")
            .expect("client");
        assert_eq!(client.api_base(), "http://localhost:4000/v1");
        assert_eq!(client.default_model(), "gpt-4o");
        assert_eq!(client.api_key_masked(), "sk-t...7890");
        assert_eq!(mask_key("short"), "*****");
    }

    #[tokio::test]
    async fn test_generate_connection_error() {
        let client = OpenAiClient::new("http://localhost:65535", "key", "gpt-4o").expect("client");
        let request = GenerationRequest::new("", vec![Message::user("test")]);
        let err = client.generate(request).await.unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed(_) | LlmError::Timeout(_)));
    }

    #[test]
    fn test_image_data_url() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("0_full_screenshot.png");
        fs::write(&path, [0x89, b'P', b'N', b'G']).expect("write");

        let url = image_data_url(&path).expect("encode");
        assert_eq!(url, "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn test_factory_builds_client() {
        let factory = OpenAiProviderFactory::new(DEFAULT_API_BASE, "gpt-4o");
        assert_eq!(factory.model(), "gpt-4o");
        assert!(factory.for_credential("sk-abc").is_ok());
        assert!(factory.for_credential("").is_err());
    }
}
