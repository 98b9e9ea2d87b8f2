//! Per-scoring telemetry spans
//!
//! One UDP datagram per scoring call, fire-and-forget. The socket is
//! non-blocking and every send error is ignored: losing spans is fine,
//! stalling the scorer is not.

use std::io::Write;
use std::net::UdpSocket;

use crate::store::monotonic_nanos;

const TARGET_TELEMETRY: &str = "AEGIS::TELEMETRY";

pub struct Telemetry {
    socket: Option<UdpSocket>,
}

#[derive(Debug, Clone, Copy)]
pub struct Span {
    op: &'static str,
    start_ns: u64,
}

impl Telemetry {
    /// Connect the span sink to `endpoint` (`host:port`). Failure to set up
    /// the socket disables telemetry rather than failing startup.
    pub fn new(endpoint: &str) -> Self {
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .and_then(|socket| {
                socket.set_nonblocking(true)?;
                socket.connect(endpoint)?;
                Ok(socket)
            })
            .map_err(|e| {
                tracing::warn!(
                    target: TARGET_TELEMETRY,
                    endpoint,
                    error = %e,
                    "telemetry sink unavailable, spans disabled"
                );
            })
            .ok();

        if socket.is_some() {
            tracing::info!(target: TARGET_TELEMETRY, endpoint, "udp span sink initialized");
        }
        Self { socket }
    }

    pub fn disabled() -> Self {
        Self { socket: None }
    }

    #[inline]
    pub fn start_span(&self, op: &'static str) -> Span {
        Span {
            op,
            start_ns: monotonic_nanos(),
        }
    }

    /// Emit the span. Formats into a stack buffer and sends one datagram;
    /// lossy by contract.
    pub fn end_span(&self, span: Span, score: f32, blocked: bool) {
        let Some(socket) = &self.socket else {
            return;
        };
        let duration_ns = monotonic_nanos().saturating_sub(span.start_ns);

        let mut data = [0u8; 96];
        let remaining = {
            let mut cursor: &mut [u8] = &mut data;
            if write!(
                cursor,
                "{} {} {:.4} {}",
                span.op, duration_ns, score, blocked as u8
            )
            .is_err()
            {
                return;
            }
            cursor.len()
        };
        let _ = socket.send(&data[..data.len() - remaining]);
    }
}
