pub mod handlers;

use crate::chat::{ChatService, Dispatcher};
use crate::config::Config;
use crate::providers::HttpInvoker;
use crate::registry::FileModelStore;
use crate::Result;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// 关闭时等待现有连接的最长时间
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// 服务共享状态
pub struct AppState {
    pub store: Arc<FileModelStore>,
    pub chat: ChatService<FileModelStore, HttpInvoker>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(FileModelStore::new(config.models_file.clone()));
        let invoker = HttpInvoker::new(config.generation, config.request_timeout())?;
        let dispatcher = Dispatcher::new(invoker, config.request_timeout());

        Ok(Self {
            chat: ChatService::new(Arc::clone(&store), dispatcher),
            store,
        })
    }
}

/// 启动 HTTP 服务器（带优雅关闭）
pub async fn start_server(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("MultiChat 服务器运行在 http://{}", listener.local_addr()?);
    info!("模型配置文件: {}", state.store.path().display());

    serve(listener, state, shutdown_signal()).await;
    info!("服务器已优雅关闭");
    Ok(())
}

/// 在已绑定的监听器上提供服务，直到 `shutdown` 完成
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            // 等待新连接
            result = listener.accept() => {
                match result {
                    Ok((stream, _)) => {
                        let io = TokioIo::new(stream);
                        let state = Arc::clone(&state);

                        connections.spawn(async move {
                            let service = service_fn(move |req| {
                                handlers::handle_request(req, Arc::clone(&state))
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!("服务连接错误: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("接受连接失败: {}", e);
                    }
                }
            }
            // 回收已结束的连接任务
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            // 等待关闭信号
            _ = &mut shutdown => {
                info!("收到关闭信号，停止接受新连接");
                break;
            }
        }
    }

    info!("等待 {} 个现有连接处理完成...", connections.len());
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!("等待连接超时，强制关闭剩余连接");
        connections.abort_all();
    }
}

/// Ctrl+C 或 SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("设置 Ctrl+C 信号处理失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("设置 SIGTERM 信号处理失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("收到 Ctrl+C 信号，开始优雅关闭..."),
        _ = terminate => warn!("收到 SIGTERM 信号，开始优雅关闭..."),
    }
}
