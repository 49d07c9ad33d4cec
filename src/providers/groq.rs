use super::openai::{build_chat_body, extract_first_choice};
use super::Dialect;
use crate::config::GenerationParams;
use crate::error::ProviderError;
use crate::types::{Message, ModelConfig};

/// Groq 的 OpenAI 兼容接口
pub struct GroqDialect;

impl Dialect for GroqDialect {
    fn name(&self) -> &'static str {
        "Groq"
    }

    fn default_base_url(&self) -> Option<&'static str> {
        Some("https://api.groq.com/openai/v1")
    }

    fn build_body(
        &self,
        model: &ModelConfig,
        messages: &[Message],
        params: &GenerationParams,
    ) -> serde_json::Value {
        build_chat_body(model, messages, params)
    }

    fn parse_reply(&self, body: &[u8]) -> Result<String, ProviderError> {
        extract_first_choice(self.name(), body)
    }
}
