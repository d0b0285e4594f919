//! 采集代理：从 JSON 文件加载连接器配置，持续采集直到 Ctrl-C。

mod ingest;

use pdm_config::AppConfig;
use pdm_telemetry::init_tracing;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 日志只依赖 RUST_LOG，先于配置初始化，配置错误也能输出
    init_tracing();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env().inspect_err(|err| {
        error!(error = %err, "config_load_failed");
    })?;

    let runtime = ingest::IngestRuntime::build(&config);
    let requests = ingest::load_requests(&config.connectors_file)
        .await
        .inspect_err(|err| error!(error = %err, "connectors_load_failed"))?;
    let started = runtime.start(&requests).await;
    info!(
        requested = requests.len(),
        started,
        scorer = runtime.scorer_name(),
        "agent_started"
    );

    let flusher = runtime.spawn_flusher(config.flush_interval());

    tokio::signal::ctrl_c().await?;
    info!("shutdown_requested");
    runtime.shutdown(flusher).await;
    Ok(())
}
