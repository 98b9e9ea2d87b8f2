//! Prometheus metrics
//!
//! Process-global counters and gauges for the pipeline, plus a minimal
//! HTTP/1.1 exposition endpoint. Recording functions are single relaxed
//! atomic operations so the hot path can call them freely.
//!
//! The endpoint deliberately does not parse the request: whatever arrives
//! on the socket gets the exposition body back. Prometheus only ever asks
//! for `/metrics`, and the body is harmless to any other caller.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use prometheus::{Encoder, Gauge, IntCounter, Registry, TextEncoder};

use crate::store::monotonic_nanos;

const TARGET_METRICS: &str = "AEGIS::METRICS";

pub struct EngineMetrics {
    registry: Registry,
    ingress_tps: Gauge,
    ring_usage: Gauge,
    pub transactions_total: IntCounter,
    pub risk_blocks_total: IntCounter,
    pub drops_total: IntCounter,
    // TPS window state
    tx_window: AtomicU64,
    last_tps_calc_ms: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let ingress_tps = Gauge::new(
            "aegis_ingress_tps",
            "Transactions per second entering the system",
        )
        .expect("metric definition");
        let ring_usage = Gauge::new(
            "aegis_ring_buffer_usage",
            "Ring buffer utilization ratio (0-1)",
        )
        .expect("metric definition");
        let transactions_total = IntCounter::new(
            "aegis_transactions_total",
            "Total transactions processed",
        )
        .expect("metric definition");
        let risk_blocks_total = IntCounter::new(
            "aegis_risk_blocks_total",
            "Total transactions blocked due to high risk",
        )
        .expect("metric definition");
        let drops_total = IntCounter::new(
            "aegis_drops_total",
            "Total messages dropped due to backpressure",
        )
        .expect("metric definition");

        registry
            .register(Box::new(ingress_tps.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(ring_usage.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(transactions_total.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(risk_blocks_total.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(drops_total.clone()))
            .expect("metric registration");

        Self {
            registry,
            ingress_tps,
            ring_usage,
            transactions_total,
            risk_blocks_total,
            drops_total,
            tx_window: AtomicU64::new(0),
            last_tps_calc_ms: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_transaction(&self) {
        self.transactions_total.inc();
        self.tx_window.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_block(&self) {
        self.risk_blocks_total.inc();
    }

    #[inline]
    pub fn record_drop(&self) {
        self.drops_total.inc();
    }

    #[inline]
    pub fn set_ring_usage(&self, usage: f64) {
        self.ring_usage.set(usage);
    }

    /// Fold the transaction window into the TPS gauge. Called periodically
    /// by the scorer and before each exposition; only windows of at least
    /// one second are folded.
    pub fn refresh_tps(&self) {
        let now_ms = monotonic_nanos() / 1_000_000;
        let last = self.last_tps_calc_ms.load(Ordering::Relaxed);
        if last == 0 {
            self.last_tps_calc_ms.store(now_ms.max(1), Ordering::Relaxed);
            return;
        }
        let elapsed_ms = now_ms.saturating_sub(last);
        if elapsed_ms >= 1000 {
            let count = self.tx_window.swap(0, Ordering::Relaxed);
            self.ingress_tps
                .set(count as f64 * 1000.0 / elapsed_ms as f64);
            self.last_tps_calc_ms.store(now_ms, Ordering::Relaxed);
        }
    }

    /// Render the Prometheus text exposition.
    pub fn export(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }

    pub fn ingress_tps_value(&self) -> f64 {
        self.ingress_tps.get()
    }

    pub fn ring_usage_value(&self) -> f64 {
        self.ring_usage.get()
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Exposition endpoint, bound eagerly so a busy port aborts startup.
pub struct MetricsServer {
    listener: TcpListener,
}

impl MetricsServer {
    pub fn bind(port: u16) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }

    pub fn local_port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Serve until the stop flag is raised. Run on a dedicated thread.
    pub fn serve(self, metrics: Arc<EngineMetrics>, stop: Arc<AtomicBool>) {
        tracing::info!(
            target: TARGET_METRICS,
            port = self.local_port(),
            "prometheus endpoint started"
        );

        while !stop.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((mut stream, _)) => {
                    let _ = stream.set_nonblocking(false);
                    let _ = stream.set_read_timeout(Some(Duration::from_millis(100)));

                    // Read the request but never parse it
                    let mut request = [0u8; 1024];
                    let _ = stream.read(&mut request);

                    metrics.refresh_tps();
                    let body = metrics.export();
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        TextEncoder::new().format_type(),
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes());
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    tracing::warn!(target: TARGET_METRICS, error = %e, "accept failed");
                    thread::sleep(Duration::from_millis(50));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = EngineMetrics::new();
        metrics.record_transaction();
        metrics.record_transaction();
        metrics.record_block();
        metrics.record_drop();

        assert_eq!(metrics.transactions_total.get(), 2);
        assert_eq!(metrics.risk_blocks_total.get(), 1);
        assert_eq!(metrics.drops_total.get(), 1);
    }

    #[test]
    fn test_export_contains_all_series() {
        let metrics = EngineMetrics::new();
        metrics.record_transaction();
        metrics.set_ring_usage(0.25);

        let body = metrics.export();
        for series in [
            "aegis_ingress_tps",
            "aegis_ring_buffer_usage",
            "aegis_transactions_total",
            "aegis_risk_blocks_total",
            "aegis_drops_total",
        ] {
            assert!(body.contains(series), "missing series {series} in:\n{body}");
        }
        assert!(body.contains("# TYPE aegis_transactions_total counter"));
        assert!(body.contains("# TYPE aegis_ring_buffer_usage gauge"));
    }

    #[test]
    fn test_tps_window_folds_after_a_second() {
        let metrics = EngineMetrics::new();
        metrics.refresh_tps(); // arms the window
        for _ in 0..5 {
            metrics.record_transaction();
        }
        thread::sleep(Duration::from_millis(1100));
        metrics.refresh_tps();
        let tps = metrics.ingress_tps_value();
        assert!(tps > 0.0 && tps <= 5.0, "unexpected tps {tps}");
    }

    #[test]
    fn test_server_answers_any_request() {
        let server = MetricsServer::bind(0).unwrap();
        let port = server.local_port();
        let metrics = Arc::new(EngineMetrics::new());
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let metrics = Arc::clone(&metrics);
            let stop = Arc::clone(&stop);
            thread::spawn(move || server.serve(metrics, stop))
        };

        let mut stream = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .write_all(b"GET /anything HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();
        stream.shutdown(std::net::Shutdown::Write).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("aegis_transactions_total"));

        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
