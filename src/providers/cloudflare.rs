use super::openai::{build_chat_body, extract_first_choice};
use super::Dialect;
use crate::config::GenerationParams;
use crate::error::ProviderError;
use crate::types::{Message, ModelConfig};
use serde::Deserialize;

const PROVIDER: &str = "Cloudflare";

/// Workers AI 原生响应外壳
#[derive(Debug, Deserialize)]
struct WorkersAiEnvelope {
    #[serde(default)]
    success: bool,
    result: Option<WorkersAiResult>,
    #[serde(default)]
    errors: Vec<WorkersAiError>,
}

#[derive(Debug, Deserialize)]
struct WorkersAiResult {
    response: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorkersAiError {
    message: String,
}

/// Cloudflare Workers AI
///
/// OpenAI 兼容端点返回标准 choices；部分账户路由返回
/// `{"success": true, "result": {"response": "..."}}`，两种都接受。
pub struct CloudflareDialect;

impl Dialect for CloudflareDialect {
    fn name(&self) -> &'static str {
        PROVIDER
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
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))?;

        if value.get("choices").is_some() {
            return extract_first_choice(PROVIDER, body);
        }

        let envelope: WorkersAiEnvelope = serde_json::from_value(value)
            .map_err(|e| ProviderError::malformed(PROVIDER, e.to_string()))?;

        if !envelope.success {
            let detail = envelope
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ProviderError::malformed(PROVIDER, detail));
        }

        match envelope.result.and_then(|r| r.response) {
            Some(text) if !text.is_empty() => Ok(text),
            _ => Err(ProviderError::EmptyReply(PROVIDER)),
        }
    }
}
