//! Judge-model integration for webjudge.
//!
//! The judgment pipeline treats the model as a replaceable capability: the
//! [`LlmProvider`] trait takes a request and returns text or a typed failure.
//! [`OpenAiClient`] is the production implementation against any
//! OpenAI-compatible endpoint; tests substitute deterministic providers.
//!
//! ```ignore
//! use webjudge::llm::{call_with_retry, GenerationRequest, Message, OpenAiClient, RetryPolicy};
//!
//! let client = OpenAiClient::new("https://api.openai.com/v1", api_key, "gpt-4o-mini")?;
//! let request = GenerationRequest::new("", vec![Message::user("Say OK")]);
//! let text = call_with_retry(&client, &request, &RetryPolicy::default(), "ping", |t| {
//!     Ok(t.to_string())
//! })
//! .await?;
//! ```

pub mod client;
pub mod retry;

pub use client::{
    image_data_url, mask_key, Choice, ContentPart, GenerationRequest, GenerationResponse,
    ImageUrl, LlmProvider, Message, MessageContent, OpenAiClient, OpenAiProviderFactory,
    ProviderFactory, Usage, DEFAULT_API_BASE, DEFAULT_MODEL,
};
pub use retry::{call_with_retry, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
