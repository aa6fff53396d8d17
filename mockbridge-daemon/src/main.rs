use anyhow::Result;
use clap::Parser;

mod cli;
mod health;
mod http;
mod logging;
mod orchestrator;

use cli::Cli;
use mockbridge_core::config::MockBridgeConfig;
use orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 설정 로드
    let config = MockBridgeConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;

    // 로깅 초기화
    logging::init_tracing(&config.general)?;

    // 설정 검증 -- 여기서 실패하면 시작하지 않음
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.check_config {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    tracing::info!(config = %cli.config.display(), "mockbridge-daemon starting");

    // 오케스트레이터 빌드 (큐 도달성 확인 포함) 및 실행
    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await
}
