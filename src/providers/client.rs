use super::{build_messages, ChatInvoker, ProviderKind};
use crate::config::GenerationParams;
use crate::error::{MultiChatError, ProviderError};
use crate::types::{ChatTurn, ModelConfig};
use crate::Result;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// 基于 reqwest 的模型调用器，所有模型共享一个连接池
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: Client,
    params: GenerationParams,
    timeout: Duration,
}

impl HttpInvoker {
    pub fn new(params: GenerationParams, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| MultiChatError::internal(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self {
            client,
            params,
            timeout,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Transport(err)
        }
    }
}

impl ChatInvoker for HttpInvoker {
    async fn invoke(
        &self,
        model: &ModelConfig,
        prompt: &str,
        history: &[ChatTurn],
    ) -> std::result::Result<String, ProviderError> {
        let dialect = ProviderKind::resolve(model)?.dialect();
        let url = dialect.endpoint(&model.base_url);
        let messages = build_messages(history, prompt);
        let body = dialect.build_body(model, &messages, &self.params);

        debug!(
            provider = dialect.name(),
            model_id = %model.id,
            "调用 {} API: {}",
            dialect.name(),
            model.model
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&model.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            let error_body = String::from_utf8_lossy(&bytes);
            warn!(
                provider = dialect.name(),
                model_id = %model.id,
                status = status.as_u16(),
                "{} API 调用失败",
                dialect.name()
            );
            return Err(ProviderError::upstream(status.as_u16(), &error_body));
        }

        dialect.parse_reply(&bytes)
    }
}
