//! Aegis Engine - low-latency ISO 20022 compliance scoring
//!
//! Payments stream in from a durable bus (or a replay file), get scored
//! against hot-swappable rule weights in microseconds, and high-risk alerts
//! go out over a lossy push socket.
//!
//! # Modules
//!
//! - [`payment`] - ISO 20022 decoding into fixed-size records
//! - [`ring`] - bounded SPSC ring connecting the pipeline stages
//! - [`store`] - sharded per-entity risk state
//! - [`engine`] - scoring with double-buffered rule weights
//! - [`alert`] - fixed-size alert records and JSON formatting
//! - [`ingress`] - replay and live producers of the payment ring
//! - [`pusher`] - non-blocking downstream alert delivery
//! - [`rules`] - weights file loading and hot reload
//! - [`metrics`] - Prometheus counters and exposition endpoint
//! - [`telemetry`] - per-scoring UDP spans
//! - [`pipeline`] - thread lifecycle and shutdown

pub mod alert;
pub mod config;
pub mod engine;
pub mod ingress;
pub mod logging;
pub mod metrics;
pub mod payment;
pub mod pipeline;
pub mod pusher;
pub mod ring;
pub mod rules;
pub mod store;
pub mod telemetry;

// Convenient re-exports at crate root
pub use alert::{format_alert, AlertRecord, ALERT_CAPACITY};
pub use config::AppConfig;
pub use engine::{ModelWeights, RiskEngine, RiskScore};
pub use ingress::IngressMode;
pub use payment::{decode, DecodeError, PaymentRecord};
pub use pipeline::{Pipeline, PipelineReport, PipelineState, StartupError};
pub use store::{monotonic_nanos, ShardedRiskStore};
