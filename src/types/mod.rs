use crate::providers::ProviderKind;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// 接口类型，目前只支持 OpenAI 兼容接口
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ApiType {
    #[default]
    OpenAi,
    /// 未知类型原样保留，调用时降级为该模型的错误回复
    Other(String),
}

impl From<String> for ApiType {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case("openai") {
            ApiType::OpenAi
        } else {
            ApiType::Other(value)
        }
    }
}

impl From<ApiType> for String {
    fn from(value: ApiType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ApiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiType::OpenAi => f.write_str("openai"),
            ApiType::Other(name) => f.write_str(name),
        }
    }
}

/// 一个已配置的模型后端
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub api_type: ApiType,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// 显式指定的接口方言；为空时按 base_url 推断
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<ProviderKind>,
}

fn default_active() -> bool {
    true
}

// api_key 不能出现在日志里
impl fmt::Debug for ModelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("api_type", &self.api_type)
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("active", &self.active)
            .field("color", &self.color)
            .field("dialect", &self.dialect)
            .finish()
    }
}

/// 消息发送方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
}

/// 会话中的一条消息（用户提问或模型回复）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    pub content: String,
    #[serde(default = "Utc::now", deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub sender: Sender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(
        default,
        rename = "responseTime",
        skip_serializing_if = "Option::is_none"
    )]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
}

impl ChatTurn {
    /// 服务端确认的用户消息
    pub fn user(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: new_turn_id(),
            content: content.into(),
            timestamp,
            sender: Sender::User,
            model_id: None,
            model_name: None,
            response_time_ms: None,
            error: false,
        }
    }

    /// 模型的正常回复
    pub fn reply(model: &ModelConfig, content: impl Into<String>, response_time_ms: u64) -> Self {
        Self {
            id: new_turn_id(),
            content: content.into(),
            timestamp: Utc::now(),
            sender: Sender::Ai,
            model_id: Some(model.id.clone()),
            model_name: Some(model.name.clone()),
            response_time_ms: Some(response_time_ms),
            error: false,
        }
    }

    /// 模型调用失败时的降级回复
    pub fn failure(model: &ModelConfig, reason: impl fmt::Display, response_time_ms: u64) -> Self {
        Self {
            error: true,
            ..Self::reply(model, format!("请求失败: {}", reason), response_time_ms)
        }
    }
}

/// 生成全局唯一的消息 ID：毫秒时间戳 + 随机部分，同一毫秒内也不会重复
pub fn new_turn_id() -> String {
    format!(
        "{}-{}",
        Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}

// 前端的临时 ID 可能是数字
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(optional_string_or_number(deserializer)?.unwrap_or_default())
}

/// 字符串或数字形式的 ID，`null` 视为缺省
pub(crate) fn optional_string_or_number<'de, D>(
    deserializer: D,
) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        serde_json::Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "ID 必须是字符串或数字，得到: {}",
            other
        ))),
    }
}

// 历史记录的时间戳只用于展示：前端可能发来不带时区的本地时间，
// 按 UTC 解释；无法识别时取当前时间而不是拒绝整个请求
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => {
            return Ok(n
                .as_i64()
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .unwrap_or_else(Utc::now))
        }
        _ => return Ok(Utc::now()),
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    Ok(NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| Utc::now()))
}

/// 发往上游的消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl From<Sender> for Role {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::User => Role::User,
            Sender::Ai => Role::Assistant,
        }
    }
}

/// OpenAI 兼容的聊天消息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// 创建用户消息
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}
