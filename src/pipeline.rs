//! Pipeline runtime
//!
//! Owns the two rings, the engine, metrics, telemetry and the stop flag,
//! and runs the full thread set:
//!
//! ```text
//! Thread 1: Ingress          Thread 2: Scorer              Thread 3: Pusher
//! ┌─────────────┐  payments  ┌──────────────────┐  alerts  ┌─────────────┐
//! │ Replay file │ ─────────▶ │ store.touch      │ ───────▶ │ TCP push    │
//! │ or bus poll │   ring 1   │ weights -> score │  ring 2  │ (dontwait)  │
//! └─────────────┘            │ format alert     │          └─────────────┘
//!                            └──────────────────┘
//!        Thread 4: rules watcher        Thread 5: metrics endpoint
//! ```
//!
//! # Key Design
//!
//! - Each ring has exactly one producer thread and one consumer thread.
//! - Ring 1 backpressure blocks the producer (yield-until-space); ring 2 is
//!   drop-on-full so the scorer never stalls on downstream health.
//! - Lifecycle: `Init -> Starting -> Running -> Draining -> Stopped`.
//!   Entering `Draining` raises the stop flag; scorer and pusher drain
//!   their input rings bounded by the configured grace period, and threads
//!   are joined in reverse start order.
//! - Everything the threads share hangs off this value: no process-wide
//!   singletons.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::alert::{format_alert, AlertRecord};
use crate::config::AppConfig;
use crate::engine::RiskEngine;
use crate::ingress::{self, IngressError, IngressMode};
use crate::metrics::{EngineMetrics, MetricsServer};
use crate::payment::PaymentRecord;
use crate::pusher::run_pusher;
use crate::ring::{self, Consumer, Producer};
use crate::rules::watch_rules;
use crate::store::monotonic_nanos;
use crate::telemetry::Telemetry;

const TARGET_PIPELINE: &str = "AEGIS::PIPELINE";
const TARGET_SCORER: &str = "AEGIS::SCORER";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Starting,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind metrics endpoint on port {port}: {source}")]
    MetricsBind { port: u16, source: std::io::Error },
    #[error(transparent)]
    Ingress(#[from] IngressError),
}

/// Counter snapshot returned after a clean run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineReport {
    pub transactions_total: u64,
    pub risk_blocks_total: u64,
    pub drops_total: u64,
    pub entities_tracked: usize,
}

pub struct Pipeline {
    config: AppConfig,
    engine: Arc<RiskEngine>,
    metrics: Arc<EngineMetrics>,
    stop: Arc<AtomicBool>,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        let engine = Arc::new(RiskEngine::new(config.store.shard_soft_cap));
        Self {
            config,
            engine,
            metrics: Arc::new(EngineMetrics::new()),
            stop: Arc::new(AtomicBool::new(false)),
            state: PipelineState::Init,
        }
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn engine(&self) -> Arc<RiskEngine> {
        Arc::clone(&self.engine)
    }

    /// Cooperative cancellation handle; raising it moves a running pipeline
    /// into `Draining`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run the pipeline to completion: spin up the thread set, run the
    /// selected ingress on the calling thread, then drain and join.
    pub fn run(mut self, mode: IngressMode) -> Result<PipelineReport, StartupError> {
        self.state = PipelineState::Starting;
        let grace = Duration::from_millis(self.config.drain_grace_ms);

        let (mut payment_tx, payment_rx) = ring::bounded(self.config.rings.payment_slots);
        let (alert_tx, alert_rx) = ring::bounded(self.config.rings.alert_slots);

        // 1. Metrics endpoint. Bound here so a busy port aborts startup.
        let server =
            MetricsServer::bind(self.config.metrics.port).map_err(|source| {
                StartupError::MetricsBind {
                    port: self.config.metrics.port,
                    source,
                }
            })?;
        let metrics_thread = {
            let metrics = Arc::clone(&self.metrics);
            let stop = Arc::clone(&self.stop);
            thread::spawn(move || server.serve(metrics, stop))
        };

        // 2. Rules watcher
        let watcher_thread = {
            let engine = Arc::clone(&self.engine);
            let stop = Arc::clone(&self.stop);
            let path = std::path::PathBuf::from(&self.config.rules.path);
            let interval = Duration::from_secs(self.config.rules.poll_interval_secs);
            thread::spawn(move || watch_rules(path, engine, interval, stop))
        };

        // 3. Pusher
        let pusher_thread = {
            let endpoint = self.config.push.endpoint.clone();
            let stop = Arc::clone(&self.stop);
            thread::spawn(move || run_pusher(&endpoint, alert_rx, &stop, grace))
        };

        // 4. Scorer
        let scorer_thread = {
            let engine = Arc::clone(&self.engine);
            let metrics = Arc::clone(&self.metrics);
            let stop = Arc::clone(&self.stop);
            let telemetry = if self.config.telemetry.enabled {
                Telemetry::new(&self.config.telemetry.endpoint)
            } else {
                Telemetry::disabled()
            };
            thread::spawn(move || {
                scorer_loop(engine, metrics, telemetry, payment_rx, alert_tx, &stop, grace)
            })
        };

        // 5. Ingress runs here
        self.state = PipelineState::Running;
        tracing::info!(target: TARGET_PIPELINE, "pipeline running");
        let ingress_result = ingress::run(&mode, &mut payment_tx, &self.stop);

        // Drain and join in reverse start order
        self.state = PipelineState::Draining;
        self.stop.store(true, Ordering::Relaxed);
        tracing::info!(target: TARGET_PIPELINE, "draining");

        if scorer_thread.join().is_err() {
            tracing::error!(target: TARGET_PIPELINE, "scorer thread panicked");
        }
        if pusher_thread.join().is_err() {
            tracing::error!(target: TARGET_PIPELINE, "pusher thread panicked");
        }
        if watcher_thread.join().is_err() {
            tracing::error!(target: TARGET_PIPELINE, "rules watcher thread panicked");
        }
        if metrics_thread.join().is_err() {
            tracing::error!(target: TARGET_PIPELINE, "metrics thread panicked");
        }

        self.state = PipelineState::Stopped;
        let report = PipelineReport {
            transactions_total: self.metrics.transactions_total.get(),
            risk_blocks_total: self.metrics.risk_blocks_total.get(),
            drops_total: self.metrics.drops_total.get(),
            entities_tracked: self.engine.store().entity_count(),
        };
        tracing::info!(
            target: TARGET_PIPELINE,
            transactions = report.transactions_total,
            blocks = report.risk_blocks_total,
            drops = report.drops_total,
            entities = report.entities_tracked,
            "pipeline stopped"
        );

        ingress_result?;
        Ok(report)
    }
}

/// Scorer thread body: pop payments, score, emit alerts, keep the gauges
/// fresh. Yields when the ingress ring is empty; after stop it drains the
/// ring bounded by `grace`.
fn scorer_loop(
    engine: Arc<RiskEngine>,
    metrics: Arc<EngineMetrics>,
    telemetry: Telemetry,
    mut payments: Consumer<PaymentRecord>,
    mut alerts: Producer<AlertRecord>,
    stop: &AtomicBool,
    grace: Duration,
) {
    tracing::info!(target: TARGET_SCORER, "scorer on-line");

    let mut drain_deadline: Option<Instant> = None;
    loop {
        // Sample the backlog before draining it
        metrics.set_ring_usage(payments.usage());
        metrics.refresh_tps();

        let mut did_work = false;
        while let Some(payment) = payments.try_pop() {
            did_work = true;
            metrics.record_transaction();

            let span = telemetry.start_span("risk_check");
            let score = engine.evaluate_at(payment.debtor(), payment.amount_micros, monotonic_nanos());
            telemetry.end_span(span, score.total, score.blocked);

            if score.blocked {
                metrics.record_block();
                tracing::info!(
                    target: TARGET_SCORER,
                    debtor = payment.debtor(),
                    score = score.total,
                    "payment blocked"
                );
            }

            if score.alertable() {
                match format_alert(&payment) {
                    // Egress is best-effort: a full ring drops the alert
                    Some(alert) => {
                        if alerts.try_push(alert).is_err() {
                            metrics.record_drop();
                        }
                    }
                    None => metrics.record_drop(),
                }
            }
        }

        if stop.load(Ordering::Relaxed) {
            if payments.is_empty() {
                break;
            }
            let deadline = *drain_deadline.get_or_insert_with(|| Instant::now() + grace);
            if Instant::now() >= deadline {
                tracing::warn!(
                    target: TARGET_SCORER,
                    remaining = payments.len(),
                    "drain grace elapsed, discarding queued payments"
                );
                break;
            }
        }

        if !did_work {
            thread::yield_now();
        }
    }

    tracing::info!(target: TARGET_SCORER, "scorer stopped");
}
