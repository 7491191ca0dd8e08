use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use orchestrator::cli::Cli;
use orchestrator::config::{ConfigManager, OrchestratorConfig};
use orchestrator::executor::TokioProcessExecutor;
use orchestrator::logging::init_tracing;
use orchestrator::Orchestrator;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let yaml = std::fs::read_to_string(&cli.config)
        .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", cli.config.display()))?;
    let mut config = OrchestratorConfig::from_yaml_str(&yaml)?;

    if let Some(level) = cli.log_level {
        config.orchestrator.log_level = level.into();
    }

    init_tracing(config.orchestrator.log_level);

    let config_manager = Arc::new(ConfigManager::new(config));
    let executor = Arc::new(TokioProcessExecutor::new());
    let orchestrator = Orchestrator::new(config_manager, executor).await?;

    let discovered = orchestrator.discover_services().await?;
    tracing::info!("discovered {} new service(s): {:?}", discovered.len(), discovered);

    for info in orchestrator.get_all_services().await {
        if info.enabled {
            if let Err(e) = orchestrator.start(&info.name).await {
                tracing::warn!(service = %info.name, "initial start failed: {}", e);
            }
        }
    }

    let report = orchestrator.run_until_signal().await;
    for (name, result) in &report.results {
        if let Err(e) = result {
            tracing::warn!(service = %name, "shutdown reported an error: {}", e);
        }
    }

    Ok(())
}
