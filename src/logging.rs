use crate::config::AppConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber from config. The returned guard (file
/// logging only) must be held for the life of the process or buffered log
/// lines are lost.
pub fn init_logging(config: &AppConfig) -> Option<WorkerGuard> {
    let filter_str = if config.enable_hot_path_logs {
        config.log_level.clone()
    } else {
        // Per-payment targets live under the AEGIS hierarchy
        format!("{},AEGIS=off", config.log_level)
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_str));
    let registry = tracing_subscriber::registry().with(filter);

    match &config.log_dir {
        Some(log_dir) => {
            let file_appender = match config.rotation.as_str() {
                "hourly" => tracing_appender::rolling::hourly(log_dir, &config.log_file),
                "daily" => tracing_appender::rolling::daily(log_dir, &config.log_file),
                _ => tracing_appender::rolling::never(log_dir, &config.log_file),
            };
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

            if config.use_json {
                let file_layer = fmt::layer()
                    .json()
                    .with_target(true) // keep target in JSON for structured queries
                    .with_writer(non_blocking)
                    .with_ansi(false);
                registry.with(file_layer).init();
            } else {
                let file_layer = fmt::layer()
                    .with_target(false)
                    .with_writer(non_blocking)
                    .with_ansi(false);
                let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
                registry.with(file_layer).with(stdout_layer).init();
            }
            Some(guard)
        }
        None => {
            let stdout_layer = fmt::layer().with_target(false).with_ansi(true);
            registry.with(stdout_layer).init();
            None
        }
    }
}
