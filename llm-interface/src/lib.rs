use async_trait::async_trait;
use research_core::LlmError;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub mod openai;
pub mod scoring;
pub mod summary;

pub use openai::OpenAiProvider;
pub use scoring::{DiscoverySurface, RelevancyScorer};
pub use summary::SummaryComposer;

/// JSON schema the oracle must satisfy for a structured completion.
#[derive(Debug, Clone)]
pub struct ResponseSchema {
    pub name: &'static str,
    pub schema: Value,
}

/// A language model that answers prompts. Structured completions either
/// return the whole document or fail; they are never partially parsed.
#[async_trait]
pub trait CompletionOracle: Send + Sync {
    async fn complete_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        schema: &ResponseSchema,
    ) -> Result<Value, LlmError>;

    async fn complete_text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, LlmError>;
}

pub async fn complete_structured<T: DeserializeOwned>(
    oracle: &dyn CompletionOracle,
    system_prompt: &str,
    user_prompt: &str,
    schema: &ResponseSchema,
) -> Result<T, LlmError> {
    let value = oracle
        .complete_json(system_prompt, user_prompt, schema)
        .await?;
    serde_json::from_value(value).map_err(|e| LlmError::InvalidResponseFormat {
        provider: schema.name.to_string(),
        details: e.to_string(),
    })
}
