use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 简单的指标收集器
#[derive(Debug, Default)]
pub struct Metrics {
    dispatches: AtomicU64,
    rejected_requests: AtomicU64,
    model_successes: AtomicU64,
    model_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录一次扇出分发
    pub fn record_dispatch(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录在分发前被拒绝的请求
    pub fn record_rejected(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_model_success(&self) {
        self.model_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_model_failure(&self) {
        self.model_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// 导出 Prometheus 格式
    pub fn export_prometheus(&self) -> String {
        format!(
            "# HELP multichat_dispatches_total Fan-out dispatches started\n\
             # TYPE multichat_dispatches_total counter\n\
             multichat_dispatches_total {}\n\
             # HELP multichat_requests_rejected_total Requests rejected before dispatch\n\
             # TYPE multichat_requests_rejected_total counter\n\
             multichat_requests_rejected_total {}\n\
             # HELP multichat_model_replies_total Model invocations that returned a reply\n\
             # TYPE multichat_model_replies_total counter\n\
             multichat_model_replies_total {}\n\
             # HELP multichat_model_failures_total Model invocations degraded to an error reply\n\
             # TYPE multichat_model_failures_total counter\n\
             multichat_model_failures_total {}\n",
            self.dispatches.load(Ordering::Relaxed),
            self.rejected_requests.load(Ordering::Relaxed),
            self.model_successes.load(Ordering::Relaxed),
            self.model_failures.load(Ordering::Relaxed)
        )
    }
}

/// 获取全局指标实例
pub fn global_metrics() -> &'static Arc<Metrics> {
    use once_cell::sync::Lazy;
    static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| Arc::new(Metrics::new()));
    &METRICS
}
