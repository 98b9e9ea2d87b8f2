use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::ingress::DEFAULT_TOPIC;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    /// File logging is enabled only when a directory is set
    pub log_dir: Option<String>,
    pub log_file: String,
    pub rotation: String,
    pub use_json: bool,
    /// Toggle for high-frequency per-payment log targets (AEGIS::*)
    pub enable_hot_path_logs: bool,
    pub ingress: IngressConfig,
    pub rings: RingConfig,
    pub metrics: MetricsConfig,
    pub push: PushConfig,
    pub telemetry: TelemetryConfig,
    pub rules: RulesConfig,
    pub store: StoreConfig,
    /// Bound on how long scorer and pusher keep draining after stop
    pub drain_grace_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: None,
            log_file: "aegis.log".to_string(),
            rotation: "daily".to_string(),
            use_json: false,
            enable_hot_path_logs: true,
            ingress: IngressConfig::default(),
            rings: RingConfig::default(),
            metrics: MetricsConfig::default(),
            push: PushConfig::default(),
            telemetry: TelemetryConfig::default(),
            rules: RulesConfig::default(),
            store: StoreConfig::default(),
            drain_grace_ms: 1000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct IngressConfig {
    pub brokers: String,
    pub topic: String,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            brokers: "kafka-broker:9092".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RingConfig {
    /// Slots in the ingress->scorer ring (power of two)
    pub payment_slots: usize,
    /// Slots in the scorer->pusher ring (power of two)
    pub alert_slots: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            payment_slots: 16384,
            alert_slots: 4096,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus exposition port; 0 binds an ephemeral port
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { port: 9090 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PushConfig {
    pub endpoint: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:5555".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    pub endpoint: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "127.0.0.1:6831".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RulesConfig {
    pub path: String,
    pub poll_interval_secs: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: "model_weights.json".to_string(),
            poll_interval_secs: 2,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// Soft cap on entries per shard; unset grows without bound
    pub shard_soft_cap: Option<usize>,
}

impl AppConfig {
    /// Load config for `env` from `config/<env>.yaml`. An absent file means
    /// compiled defaults (the engine must come up with nothing but a rules
    /// file and CLI flags); a present but broken file is a startup error.
    pub fn load(env: &str) -> Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let mut config = if Path::new(&config_path).exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file: {}", config_path))?;
            serde_yaml::from_str(&content).context("Failed to parse config yaml")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Environment variables take precedence over YAML config.
    ///
    /// Supported overrides:
    /// - AEGIS_BROKERS: upstream bus bootstrap servers
    /// - AEGIS_TOPIC: upstream topic name
    /// - AEGIS_METRICS_PORT: Prometheus exposition port (u16)
    /// - AEGIS_PUSH_ENDPOINT: downstream alert endpoint
    /// - AEGIS_RULES_PATH: weights JSON path
    /// - AEGIS_LOG_LEVEL: log level (trace/debug/info/warn/error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(brokers) = std::env::var("AEGIS_BROKERS") {
            tracing::info!("Config override: ingress.brokers = {} (from AEGIS_BROKERS)", brokers);
            self.ingress.brokers = brokers;
        }
        if let Ok(topic) = std::env::var("AEGIS_TOPIC") {
            tracing::info!("Config override: ingress.topic = {} (from AEGIS_TOPIC)", topic);
            self.ingress.topic = topic;
        }
        if let Ok(port) = std::env::var("AEGIS_METRICS_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                tracing::info!("Config override: metrics.port = {} (from AEGIS_METRICS_PORT)", p);
                self.metrics.port = p;
            }
        }
        if let Ok(endpoint) = std::env::var("AEGIS_PUSH_ENDPOINT") {
            tracing::info!(
                "Config override: push.endpoint = {} (from AEGIS_PUSH_ENDPOINT)",
                endpoint
            );
            self.push.endpoint = endpoint;
        }
        if let Ok(path) = std::env::var("AEGIS_RULES_PATH") {
            tracing::info!("Config override: rules.path = {} (from AEGIS_RULES_PATH)", path);
            self.rules.path = path;
        }
        if let Ok(level) = std::env::var("AEGIS_LOG_LEVEL") {
            tracing::info!("Config override: log_level = {} (from AEGIS_LOG_LEVEL)", level);
            self.log_level = level;
        }
    }

    /// Validate configuration at startup.
    ///
    /// Returns an error if any critical configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log_level '{}': must be one of {:?}",
                self.log_level,
                valid_levels
            );
        }

        if !self.rings.payment_slots.is_power_of_two() || self.rings.payment_slots < 2 {
            anyhow::bail!(
                "Invalid rings.payment_slots {}: must be a power of two >= 2",
                self.rings.payment_slots
            );
        }
        if !self.rings.alert_slots.is_power_of_two() || self.rings.alert_slots < 2 {
            anyhow::bail!(
                "Invalid rings.alert_slots {}: must be a power of two >= 2",
                self.rings.alert_slots
            );
        }

        if self.ingress.brokers.is_empty() {
            anyhow::bail!("Invalid ingress.brokers: must not be empty");
        }
        if self.push.endpoint.is_empty() {
            anyhow::bail!("Invalid push.endpoint: must not be empty");
        }

        if self.rules.poll_interval_secs < 1 {
            anyhow::bail!("Invalid rules.poll_interval_secs: must be >= 1");
        }
        if self.drain_grace_ms == 0 {
            anyhow::bail!("Invalid drain_grace_ms: must be > 0");
        }

        Ok(())
    }
}
