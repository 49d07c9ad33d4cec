pub mod client;
pub mod cloudflare;
pub mod groq;
pub mod openai;

pub use client::HttpInvoker;

use crate::config::GenerationParams;
use crate::error::ProviderError;
use crate::types::{ApiType, ChatTurn, Message, ModelConfig};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// 接口方言：负责构建请求体和解析回复，每种提供商一个实现
pub trait Dialect: Send + Sync {
    /// 提供商名称，用于日志和错误信息
    fn name(&self) -> &'static str;

    /// base_url 为空时使用的默认地址
    fn default_base_url(&self) -> Option<&'static str> {
        None
    }

    fn endpoint(&self, base_url: &str) -> String {
        let base = match (base_url.trim(), self.default_base_url()) {
            ("", Some(default)) => default,
            (base, _) => base,
        };
        format!("{}/chat/completions", base.trim_end_matches('/'))
    }

    fn build_body(
        &self,
        model: &ModelConfig,
        messages: &[Message],
        params: &GenerationParams,
    ) -> serde_json::Value;

    /// 从 2xx 响应体中提取回复文本
    fn parse_reply(&self, body: &[u8]) -> Result<String, ProviderError>;
}

/// 已知的接口方言
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Cloudflare,
    Groq,
}

impl ProviderKind {
    /// 根据 base_url 推断方言，未知地址按通用 OpenAI 兼容处理
    pub fn infer(base_url: &str) -> Self {
        let base_url = base_url.to_ascii_lowercase();
        if base_url.contains("cloudflare.com") {
            ProviderKind::Cloudflare
        } else if base_url.contains("groq.com") {
            ProviderKind::Groq
        } else {
            ProviderKind::OpenAi
        }
    }

    /// 确定模型使用的方言；显式配置优先
    pub fn resolve(model: &ModelConfig) -> Result<Self, ProviderError> {
        match &model.api_type {
            ApiType::OpenAi => Ok(model
                .dialect
                .unwrap_or_else(|| Self::infer(&model.base_url))),
            ApiType::Other(name) => Err(ProviderError::UnsupportedApiType(name.clone())),
        }
    }

    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            ProviderKind::OpenAi => &openai::OpenAiDialect,
            ProviderKind::Cloudflare => &cloudflare::CloudflareDialect,
            ProviderKind::Groq => &groq::GroqDialect,
        }
    }
}

/// 单次聊天调用：把提示词和历史发给一个模型，返回回复文本
///
/// 分发器只依赖这个接口，测试中可以替换为假实现。
pub trait ChatInvoker: Send + Sync {
    fn invoke(
        &self,
        model: &ModelConfig,
        prompt: &str,
        history: &[ChatTurn],
    ) -> impl Future<Output = Result<String, ProviderError>> + Send;
}

/// 把历史消息和新提示词转换为上游消息序列
pub fn build_messages(history: &[ChatTurn], prompt: &str) -> Vec<Message> {
    history
        .iter()
        .map(|turn| Message {
            role: turn.sender.into(),
            content: turn.content.clone(),
        })
        .chain(std::iter::once(Message::user(prompt)))
        .collect()
}
