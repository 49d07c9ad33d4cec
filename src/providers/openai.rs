use super::Dialect;
use crate::config::GenerationParams;
use crate::error::ProviderError;
use crate::types::{Message, ModelConfig};
use serde::{Deserialize, Serialize};

/// OpenAI 兼容的聊天请求
#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub temperature: f32,
    pub max_tokens: u32,
}

/// OpenAI 兼容的聊天响应，只保留需要的字段
#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
}

/// 通用 OpenAI 兼容接口
pub struct OpenAiDialect;

impl Dialect for OpenAiDialect {
    fn name(&self) -> &'static str {
        "OpenAI"
    }

    fn default_base_url(&self) -> Option<&'static str> {
        Some("https://api.openai.com/v1")
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

pub(crate) fn build_chat_body(
    model: &ModelConfig,
    messages: &[Message],
    params: &GenerationParams,
) -> serde_json::Value {
    let request = ChatCompletionRequest {
        model: &model.model,
        messages,
        temperature: params.temperature,
        max_tokens: params.max_tokens,
    };
    serde_json::json!(request)
}

/// 取 choices[0].message.content；缺字段或内容为空都算失败
pub(crate) fn extract_first_choice(
    provider: &'static str,
    body: &[u8],
) -> Result<String, ProviderError> {
    let response: ChatCompletionResponse = serde_json::from_slice(body)
        .map_err(|e| ProviderError::malformed(provider, e.to_string()))?;

    let first = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::malformed(provider, "choices 为空"))?;

    match first.message.and_then(|m| m.content) {
        Some(content) if !content.is_empty() => Ok(content),
        _ => Err(ProviderError::EmptyReply(provider)),
    }
}
