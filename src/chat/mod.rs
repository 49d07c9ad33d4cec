pub mod assembler;
pub mod dispatcher;

pub use assembler::{assemble, ResponseEnvelope};
pub use dispatcher::Dispatcher;

use crate::error::MultiChatError;
use crate::metrics;
use crate::providers::ChatInvoker;
use crate::registry::{select_targets, ModelStore};
use crate::types::{optional_string_or_number, ChatTurn};
use crate::Result;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};

/// 聊天请求
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub message_history: Vec<ChatTurn>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub model_ids: Option<Vec<String>>,
    #[serde(default)]
    pub client_token: Option<String>,
}

/// 选模型 -> 并发分发 -> 组装结果
pub struct ChatService<S, I> {
    store: Arc<S>,
    dispatcher: Dispatcher<I>,
}

impl<S: ModelStore, I: ChatInvoker> ChatService<S, I> {
    pub fn new(store: Arc<S>, dispatcher: Dispatcher<I>) -> Self {
        Self { store, dispatcher }
    }

    pub async fn dispatch_chat(&self, req: ChatRequest) -> Result<ResponseEnvelope> {
        let received_at = Utc::now();
        let metrics = metrics::global_metrics();

        // 先校验，空消息不读注册表也不发请求
        if req.message.trim().is_empty() {
            metrics.record_rejected();
            return Err(MultiChatError::validation("消息不能为空"));
        }

        let all_models = self.store.list_all().await?;
        let targets = select_targets(&all_models, req.model_ids.as_deref()).inspect_err(|_| {
            metrics.record_rejected();
        })?;

        debug!(
            conversation_id = req.conversation_id.as_deref().unwrap_or("-"),
            history = req.message_history.len(),
            "分发到 {} 个模型",
            targets.len()
        );
        metrics.record_dispatch();

        let turns = self
            .dispatcher
            .dispatch(&req.message, &req.message_history, &targets)
            .await?;

        let failed = turns.iter().filter(|t| t.error).count();
        info!(
            models = turns.len(),
            failed,
            "对比请求完成"
        );

        assemble(req.message, received_at, turns, req.client_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::types::{ApiType, ModelConfig, Sender};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FixedStore(Vec<ModelConfig>);

    impl ModelStore for FixedStore {
        async fn list_all(&self) -> Result<Vec<ModelConfig>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenStore;

    impl ModelStore for BrokenStore {
        async fn list_all(&self) -> Result<Vec<ModelConfig>> {
            Err(MultiChatError::Registry("磁盘不可读".to_string()))
        }
    }

    /// 回显模型名，`fail-` 开头的模型返回错误
    #[derive(Default)]
    struct EchoInvoker {
        calls: AtomicUsize,
    }

    impl ChatInvoker for EchoInvoker {
        async fn invoke(
            &self,
            model: &ModelConfig,
            prompt: &str,
            _history: &[ChatTurn],
        ) -> std::result::Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if model.id.starts_with("fail-") {
                Err(ProviderError::UnsupportedApiType("mystery".to_string()))
            } else {
                Ok(format!("{}: {}", model.name, prompt))
            }
        }
    }

    fn model(id: &str, active: bool) -> ModelConfig {
        ModelConfig {
            id: id.to_string(),
            name: id.to_uppercase(),
            api_type: ApiType::OpenAi,
            base_url: String::new(),
            api_key: "k".to_string(),
            model: "m".to_string(),
            active,
            color: None,
            dialect: None,
        }
    }

    fn service<S: ModelStore>(store: S) -> ChatService<S, EchoInvoker> {
        ChatService::new(
            Arc::new(store),
            Dispatcher::new(EchoInvoker::default(), Duration::from_secs(5)),
        )
    }

    fn request(message: &str, model_ids: Option<Vec<&str>>) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            model_ids: model_ids.map(|ids| ids.into_iter().map(String::from).collect()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_dispatch_chat_active_models() {
        let svc = service(FixedStore(vec![model("a", true), model("b", false)]));

        let envelope = svc.dispatch_chat(request("hi", None)).await.unwrap();
        assert_eq!(envelope.user_message.content, "hi");
        assert_eq!(envelope.model_responses.len(), 1);
        assert_eq!(envelope.model_responses[0].model_id.as_deref(), Some("a"));
        assert_eq!(envelope.model_responses[0].content, "A: hi");
    }

    #[tokio::test]
    async fn test_dispatch_chat_explicit_ids_include_inactive() {
        let svc = service(FixedStore(vec![model("a", true), model("b", false)]));

        let envelope = svc.dispatch_chat(request("hi", Some(vec!["b"]))).await.unwrap();
        assert_eq!(envelope.model_responses.len(), 1);
        assert_eq!(envelope.model_responses[0].model_id.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_unsupported_provider_degrades_to_error_turn() {
        let svc = service(FixedStore(vec![
            model("a", true),
            model("fail-x", true),
            model("c", true),
        ]));

        let envelope = svc.dispatch_chat(request("hi", None)).await.unwrap();
        let flags: Vec<bool> = envelope.model_responses.iter().map(|t| t.error).collect();
        assert_eq!(flags, vec![false, true, false]);
        assert!(envelope.model_responses[1].content.contains("不支持的API类型"));
        assert!(envelope
            .model_responses
            .iter()
            .all(|t| t.sender == Sender::Ai));
    }

    #[tokio::test]
    async fn test_empty_message_rejected_before_any_call() {
        let svc = service(FixedStore(vec![model("a", true)]));

        let err = svc.dispatch_chat(request("", None)).await.unwrap_err();
        assert!(matches!(err, MultiChatError::Validation(_)));
        assert!(err.is_client_error());
        assert_eq!(svc.dispatcher_calls(), 0);
    }

    #[tokio::test]
    async fn test_no_target_models() {
        let svc = service(FixedStore(vec![model("a", false)]));

        let err = svc.dispatch_chat(request("hi", None)).await.unwrap_err();
        assert!(matches!(err, MultiChatError::NoTargetModels));
        assert!(err.is_client_error());
        assert_eq!(svc.dispatcher_calls(), 0);
    }

    #[tokio::test]
    async fn test_registry_failure_is_server_error() {
        let svc = service(BrokenStore);

        let err = svc.dispatch_chat(request("hi", None)).await.unwrap_err();
        assert!(matches!(err, MultiChatError::Registry(_)));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_client_token_echoed() {
        let svc = service(FixedStore(vec![model("a", true)]));

        let req = ChatRequest {
            client_token: Some("pending-42".to_string()),
            ..request("hi", None)
        };
        let envelope = svc.dispatch_chat(req).await.unwrap();
        assert_eq!(envelope.client_token.as_deref(), Some("pending-42"));
    }

    #[test]
    fn test_chat_request_wire_shape() {
        let json = r#"{
            "message": "你好",
            "messageHistory": [
                {"id": 1, "content": "之前的问题", "sender": "user"},
                {"id": "r-1", "content": "之前的回答", "sender": "ai", "modelId": "a"}
            ],
            "conversationId": "conv-1",
            "modelIds": ["a"]
        }"#;

        let req: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.message, "你好");
        assert_eq!(req.message_history.len(), 2);
        assert_eq!(req.message_history[1].sender, Sender::Ai);
        assert_eq!(req.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(req.model_ids, Some(vec!["a".to_string()]));
        assert_eq!(req.client_token, None);
    }

    #[test]
    fn test_chat_request_from_web_client() {
        // 前端会话 ID 是数字，历史时间戳不带时区
        let json = r#"{
            "message": "再介绍一下你自己",
            "conversationId": 1,
            "modelIds": ["llama3-70b"],
            "messageHistory": [
                {"id": 101, "content": "你是谁？", "timestamp": "2025-04-20T11:40:17", "sender": "user"},
                {
                    "id": 102,
                    "modelId": "llama3-70b",
                    "modelName": "Llama3-70B",
                    "content": "我是Llama3-70B",
                    "timestamp": "2025-04-20T11:40:20",
                    "responseTime": 3000,
                    "sender": "ai"
                },
                {
                    "id": 103,
                    "modelId": "gpt-3.5-turbo",
                    "modelName": "GPT-3.5 Turbo",
                    "content": "请求失败: 请求超时",
                    "timestamp": "2025-04-20T11:40:22.512",
                    "responseTime": 60000,
                    "sender": "ai",
                    "error": true
                }
            ]
        }"#;

        let req: ChatRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.conversation_id.as_deref(), Some("1"));
        assert_eq!(req.message_history.len(), 3);
        assert_eq!(req.message_history[0].id, "101");
        assert_eq!(
            req.message_history[1].timestamp.to_rfc3339(),
            "2025-04-20T11:40:20+00:00"
        );
        assert_eq!(req.message_history[1].response_time_ms, Some(3000));
        assert!(req.message_history[2].error);
        assert_eq!(req.message_history[2].timestamp.timestamp_subsec_millis(), 512);

        let null_id: ChatRequest =
            serde_json::from_str(r#"{"message": "hi", "conversationId": null}"#).unwrap();
        assert_eq!(null_id.conversation_id, None);

        let bad_id =
            serde_json::from_str::<ChatRequest>(r#"{"message": "hi", "conversationId": [1]}"#);
        assert!(bad_id.is_err());
    }

    #[tokio::test]
    async fn test_web_client_history_is_dispatched() {
        let svc = service(FixedStore(vec![model("llama3-70b", true)]));
        let req: ChatRequest = serde_json::from_str(
            r#"{
                "message": "继续",
                "conversationId": 2,
                "messageHistory": [
                    {"id": 201, "content": "你好", "timestamp": "2025-04-20T11:38:23", "sender": "user"},
                    {"id": 202, "modelId": "llama3-70b", "content": "你好！", "timestamp": "2025-04-20T11:38:25", "responseTime": 2000, "sender": "ai"}
                ]
            }"#,
        )
        .unwrap();

        let envelope = svc.dispatch_chat(req).await.unwrap();
        assert_eq!(envelope.model_responses.len(), 1);
        assert!(!envelope.model_responses[0].error);
        assert_eq!(svc.dispatcher_calls(), 1);
    }

    impl<S> ChatService<S, EchoInvoker> {
        fn dispatcher_calls(&self) -> usize {
            self.dispatcher.invoker().calls.load(Ordering::SeqCst)
        }
    }
}
