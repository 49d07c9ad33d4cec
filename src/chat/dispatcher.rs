use crate::error::{MultiChatError, ProviderError};
use crate::metrics;
use crate::providers::ChatInvoker;
use crate::types::{ChatTurn, ModelConfig};
use crate::Result;
use futures_util::future::join_all;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn, Instrument};

/// 扇出分发器：同一个提示词并发发给所有目标模型
///
/// 每个模型的调用互相独立：单个模型失败、超时甚至 panic 都只会让
/// 它自己降级为一条 `error = true` 的回复，不影响其它模型。
/// 所有调用结束后才返回，结果顺序与 `targets` 一致。
#[derive(Debug, Clone)]
pub struct Dispatcher<I> {
    invoker: I,
    call_timeout: Duration,
}

impl<I: ChatInvoker> Dispatcher<I> {
    pub fn new(invoker: I, call_timeout: Duration) -> Self {
        Self {
            invoker,
            call_timeout,
        }
    }

    pub fn invoker(&self) -> &I {
        &self.invoker
    }

    pub async fn dispatch(
        &self,
        prompt: &str,
        history: &[ChatTurn],
        targets: &[ModelConfig],
    ) -> Result<Vec<ChatTurn>> {
        if prompt.trim().is_empty() {
            return Err(MultiChatError::validation("消息不能为空"));
        }
        if targets.is_empty() {
            return Err(MultiChatError::NoTargetModels);
        }

        let span = info_span!("dispatch", models = targets.len());
        let calls = targets
            .iter()
            .map(|model| self.timed_invoke(model, prompt, history));

        let turns = join_all(calls).instrument(span).await;
        Ok(turns)
    }

    async fn timed_invoke(&self, model: &ModelConfig, prompt: &str, history: &[ChatTurn]) -> ChatTurn {
        let started = Instant::now();

        let call = tokio::time::timeout(
            self.call_timeout,
            self.invoker.invoke(model, prompt, history),
        );
        let outcome = match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(result)) => result.map_err(|e| e.to_string()),
            Ok(Err(_elapsed)) => Err(ProviderError::Timeout(self.call_timeout).to_string()),
            Err(_panic) => Err("未知错误".to_string()),
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let metrics = metrics::global_metrics();

        match outcome {
            Ok(content) => {
                metrics.record_model_success();
                info!(model_id = %model.id, elapsed_ms, "模型 {} 回复成功", model.name);
                ChatTurn::reply(model, content, elapsed_ms)
            }
            Err(reason) => {
                metrics.record_model_failure();
                warn!(model_id = %model.id, elapsed_ms, "模型 {} 请求失败: {}", model.name, reason);
                ChatTurn::failure(model, reason, elapsed_ms)
            }
        }
    }
}
