use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use aegis_engine::config::AppConfig;
use aegis_engine::ingress::IngressMode;
use aegis_engine::logging::init_logging;
use aegis_engine::pipeline::Pipeline;

#[derive(Parser, Debug)]
#[command(
    name = "aegis-engine",
    about = "Low-latency ISO 20022 compliance scoring pipeline",
    version
)]
struct Cli {
    /// Replay payments from a local file instead of the live bus
    #[arg(long = "replay-mode", value_name = "PATH")]
    replay_mode: Option<PathBuf>,

    /// Configuration environment (reads config/<env>.yaml when present)
    #[arg(long, default_value = "prod")]
    env: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.env).context("loading configuration")?;
    let _log_guard = init_logging(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        env = %cli.env,
        "aegis compliance engine starting"
    );

    let mode = match cli.replay_mode {
        Some(path) => IngressMode::Replay { path },
        None => IngressMode::Live {
            brokers: config.ingress.brokers.clone(),
            topic: config.ingress.topic.clone(),
        },
    };

    let pipeline = Pipeline::new(config);
    let report = pipeline.run(mode).context("pipeline startup failed")?;

    tracing::info!(
        transactions = report.transactions_total,
        blocks = report.risk_blocks_total,
        drops = report.drops_total,
        "engine shutdown complete"
    );
    Ok(())
}
