use crate::error::MultiChatError;
use crate::types::{ChatTurn, Sender};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 返回给调用方的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub user_message: ChatTurn,
    pub model_responses: Vec<ChatTurn>,
    /// 调用方提供的关联标记，原样返回，客户端据此匹配本地的临时消息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
}

/// 合并用户消息和各模型回复
///
/// 用户消息的 ID 总是在服务端重新生成。
pub fn assemble(
    prompt: impl Into<String>,
    received_at: DateTime<Utc>,
    model_turns: Vec<ChatTurn>,
    client_token: Option<String>,
) -> Result<ResponseEnvelope> {
    if let Some(bad) = model_turns
        .iter()
        .find(|t| t.sender != Sender::Ai || t.model_id.is_none())
    {
        return Err(MultiChatError::Assembly(format!(
            "模型回复缺少模型信息或发送方错误: {}",
            bad.id
        )));
    }

    Ok(ResponseEnvelope {
        user_message: ChatTurn::user(prompt, received_at),
        model_responses: model_turns,
        client_token,
    })
}
