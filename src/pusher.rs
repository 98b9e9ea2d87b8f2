//! Downstream alert pusher
//!
//! Consumer side of the egress ring. Alerts go out over a non-blocking TCP
//! stream as newline-delimited JSON; any send failure drops the alert
//! silently. If the endpoint is unreachable at startup the thread exits and
//! the egress ring fills, which the scorer's drop-on-full path absorbs -
//! scoring never stalls on downstream health either way.

use std::io::Write;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::alert::AlertRecord;
use crate::ring::Consumer;

const TARGET_PUSH: &str = "AEGIS::PUSH";

const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Pusher thread body: drain the egress ring until stop is raised, then
/// keep draining for at most `grace`.
pub fn run_pusher(
    endpoint: &str,
    mut alerts: Consumer<AlertRecord>,
    stop: &AtomicBool,
    grace: Duration,
) {
    let mut stream = match TcpStream::connect(endpoint) {
        Ok(stream) => {
            let _ = stream.set_nodelay(true);
            if let Err(e) = stream.set_nonblocking(true) {
                tracing::warn!(target: TARGET_PUSH, error = %e, "non-blocking mode unavailable");
            }
            tracing::info!(target: TARGET_PUSH, endpoint, "connected to downstream subscriber");
            stream
        }
        Err(e) => {
            tracing::warn!(
                target: TARGET_PUSH,
                endpoint,
                error = %e,
                "downstream endpoint unavailable, alerts will be dropped"
            );
            return;
        }
    };

    let mut drain_deadline: Option<Instant> = None;
    loop {
        let mut did_work = false;
        while let Some(alert) = alerts.try_pop() {
            did_work = true;
            send_alert(&mut stream, &alert);
        }

        if stop.load(Ordering::Relaxed) {
            if alerts.is_empty() {
                break;
            }
            let deadline = *drain_deadline.get_or_insert_with(|| Instant::now() + grace);
            if Instant::now() >= deadline {
                tracing::warn!(
                    target: TARGET_PUSH,
                    remaining = alerts.len(),
                    "drain grace elapsed, discarding queued alerts"
                );
                break;
            }
        }

        if !did_work {
            thread::sleep(IDLE_SLEEP);
        }
    }

    tracing::info!(target: TARGET_PUSH, "pusher stopped");
}

/// One DONTWAIT-style send. Partial writes and errors drop the alert; there
/// is no retry and no buffering.
fn send_alert(stream: &mut TcpStream, alert: &AlertRecord) {
    match stream.write(alert.as_bytes()) {
        Ok(n) if n == alert.len() => {
            let _ = stream.write(b"\n");
        }
        Ok(_) | Err(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::format_alert;
    use crate::payment::PaymentRecord;
    use crate::ring;
    use std::io::Read;
    use std::net::TcpListener;
    use std::sync::Arc;

    fn sample_alert() -> AlertRecord {
        let mut payment = PaymentRecord::default();
        payment.debtor_name[..5].copy_from_slice(b"Alice");
        payment.uetr[..3].copy_from_slice(b"u-1");
        payment.amount_micros = 9_000_000_000;
        format_alert(&payment).unwrap()
    }

    #[test]
    fn test_alerts_reach_subscriber() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();

        let (mut tx, rx) = ring::bounded(16);
        tx.try_push(sample_alert()).unwrap();
        tx.try_push(sample_alert()).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let pusher = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || run_pusher(&endpoint, rx, &stop, Duration::from_secs(1)))
        };

        let (mut socket, _) = listener.accept().unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let mut received = String::new();
        while received.matches('\n').count() < 2 {
            let mut buf = [0u8; 1024];
            let n = socket.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            received.push_str(std::str::from_utf8(&buf[..n]).unwrap());
        }

        assert_eq!(received.matches("\"debtor\":\"Alice\"").count(), 2);
        assert!(received.contains("\"amount\":9000.000000"));

        stop.store(true, Ordering::Relaxed);
        pusher.join().unwrap();
    }

    #[test]
    fn test_unreachable_endpoint_exits_cleanly() {
        let (_tx, rx) = ring::bounded::<AlertRecord>(16);
        let stop = AtomicBool::new(false);
        // port 1 is never listening
        run_pusher("127.0.0.1:1", rx, &stop, Duration::from_millis(100));
    }
}
