use anyhow::Context;
use clap::Parser;
use multichat::config::Config;
use multichat::server::{self, AppState};
use std::net::SocketAddr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "multichat")]
#[command(about = "多模型对比聊天服务：一个问题并发发给多个模型", long_about = None)]
struct Args {
    /// 配置文件路径
    #[arg(short, long, default_value = "multichat.yaml")]
    config: String,

    /// 监听地址
    #[arg(short, long, default_value = "0.0.0.0:5000")]
    bind: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // 解析命令行参数
    let args = Args::parse();

    // 加载配置
    let config = Config::load_or_default(&args.config)
        .with_context(|| format!("加载配置文件 {} 失败", args.config))?;
    let state = Arc::new(AppState::from_config(&config)?);

    // 解析监听地址
    let addr: SocketAddr = args
        .bind
        .parse()
        .with_context(|| format!("无效的监听地址: {}", args.bind))?;

    // 启动服务器
    server::start_server(state, addr).await?;

    Ok(())
}
