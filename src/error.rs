use std::time::Duration;
use thiserror::Error;

/// 上游错误响应体的最大保留长度
const MAX_ERROR_BODY_CHARS: usize = 4096;

/// 请求级错误，只有这一类会让整个请求失败
#[derive(Error, Debug)]
pub enum MultiChatError {
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML 解析错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("JSON 解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("请求无效: {0}")]
    Validation(String),

    #[error("未找到可用模型")]
    NoTargetModels,

    #[error("未找到模型配置: {0}")]
    ModelNotFound(String),

    #[error("模型注册表错误: {0}")]
    Registry(String),

    #[error("结果组装错误: {0}")]
    Assembly(String),

    #[error("内部错误: {0}")]
    InternalError(String),
}

impl MultiChatError {
    pub fn config(msg: impl Into<String>) -> Self {
        MultiChatError::ConfigError(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        MultiChatError::InternalError(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        MultiChatError::Validation(msg.into())
    }

    /// 是否属于调用方错误（4xx）
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MultiChatError::Validation(_)
                | MultiChatError::NoTargetModels
                | MultiChatError::ModelNotFound(_)
        )
    }
}

/// 单个模型调用失败，由分发器就地转换为错误回复，不会传给调用方
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("上游 API 错误: {status} - {body}")]
    Upstream { status: u16, body: String },

    #[error("网络请求失败: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("请求超时 ({}ms)", .0.as_millis())]
    Timeout(Duration),

    #[error("{provider} API 返回格式异常: {detail}")]
    MalformedResponse {
        provider: &'static str,
        detail: String,
    },

    #[error("{0} API 返回了空回复")]
    EmptyReply(&'static str),

    #[error("不支持的API类型: {0}")]
    UnsupportedApiType(String),
}

impl ProviderError {
    pub fn upstream(status: u16, body: &str) -> Self {
        ProviderError::Upstream {
            status,
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        }
    }

    pub fn malformed(provider: &'static str, detail: impl Into<String>) -> Self {
        ProviderError::MalformedResponse {
            provider,
            detail: detail.into(),
        }
    }
}
