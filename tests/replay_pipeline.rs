//! End-to-end pipeline scenarios over replay ingress.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use aegis_engine::config::AppConfig;
use aegis_engine::engine::RiskEngine;
use aegis_engine::ingress::IngressMode;
use aegis_engine::pipeline::Pipeline;
use aegis_engine::rules::watch_rules;

fn payment_line(debtor: &str, uetr: &str, amount: &str) -> String {
    format!(
        r#"<Document><CstmrCdtTrfinitn><PmtInf><PmtId><UETR>{uetr}</UETR></PmtId><Dbtr><Nm>{debtor}</Nm></Dbtr><Cdtr><Nm>Receiver Gmbh</Nm></Cdtr><Amt><InstdAmt Ccy="EUR">{amount}</InstdAmt></Amt></PmtInf></CstmrCdtTrfinitn></Document>"#
    )
}

/// Config for tests: ephemeral metrics port, no telemetry, dead push
/// endpoint unless a test supplies one.
fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.metrics.port = 0;
    config.telemetry.enabled = false;
    config.push.endpoint = "127.0.0.1:1".to_string();
    config.rules.path = "/nonexistent/model_weights.json".to_string();
    config.drain_grace_ms = 5000;
    config
}

#[test]
fn replay_file_drains_completely() {
    // K valid lines with distinct debtors through the default 16384-slot
    // ring: every line is scored, none is dropped, and ring-1 backpressure
    // never shows up in the drop counter.
    const K: usize = 50_000;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    for i in 0..K {
        writeln!(
            file,
            "{}",
            payment_line(&format!("Debtor {i}"), &format!("uetr-{i}"), "1500.00")
        )
        .unwrap();
    }
    file.flush().unwrap();

    let pipeline = Pipeline::new(test_config());
    let report = pipeline
        .run(IngressMode::Replay {
            path: file.path().to_path_buf(),
        })
        .unwrap();

    assert_eq!(report.transactions_total, K as u64);
    assert_eq!(report.drops_total, 0);
    assert_eq!(report.risk_blocks_total, 0);
    assert_eq!(report.entities_tracked, K);
}

#[test]
fn structuring_velocity_blocks_and_alerts_downstream() {
    // Ten rapid 9000.00 EUR payments from one debtor saturate velocity and
    // trip the structuring band: the run must block and the alert must
    // reach the downstream subscriber verbatim.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();

    let sink = thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        let mut received = String::new();
        let mut buf = [0u8; 4096];
        loop {
            match socket.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => received.push_str(&String::from_utf8_lossy(&buf[..n])),
            }
        }
        received
    });

    let mut file = tempfile::NamedTempFile::new().unwrap();
    for i in 0..10 {
        writeln!(
            file,
            "{}",
            payment_line("Structuring Shell Co", &format!("uetr-{i}"), "9000.00")
        )
        .unwrap();
    }
    file.flush().unwrap();

    let mut config = test_config();
    config.push.endpoint = endpoint;
    let pipeline = Pipeline::new(config);
    let report = pipeline
        .run(IngressMode::Replay {
            path: file.path().to_path_buf(),
        })
        .unwrap();

    assert_eq!(report.transactions_total, 10);
    assert!(
        report.risk_blocks_total >= 1,
        "velocity saturation must block at least once"
    );

    let received = sink.join().unwrap();
    assert!(
        received.contains("\"debtor\":\"Structuring Shell Co\""),
        "alert not delivered downstream: {received:?}"
    );
    assert!(received.contains("\"amount\":9000.000000"));
}

#[test]
fn rejected_documents_never_reach_the_scorer() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    // bad currency, negative amount, zero amount, garbage, one valid line
    writeln!(
        file,
        r#"<Document><CstmrCdtTrfinitn><PmtInf><PmtId><UETR>x1</UETR></PmtId><Dbtr><Nm>A</Nm></Dbtr><Cdtr><Nm>B</Nm></Cdtr><Amt><InstdAmt Ccy="XYZ">100.00</InstdAmt></Amt></PmtInf></CstmrCdtTrfinitn></Document>"#
    )
    .unwrap();
    writeln!(file, "{}", payment_line("A", "x2", "-500.00")).unwrap();
    writeln!(file, "{}", payment_line("A", "x3", "0")).unwrap();
    writeln!(file, "not xml").unwrap();
    writeln!(file, "{}", payment_line("Only Valid", "x4", "10.00")).unwrap();
    file.flush().unwrap();

    let pipeline = Pipeline::new(test_config());
    let report = pipeline
        .run(IngressMode::Replay {
            path: file.path().to_path_buf(),
        })
        .unwrap();

    assert_eq!(report.transactions_total, 1);
    assert_eq!(report.entities_tracked, 1);
    assert_eq!(report.risk_blocks_total, 0);
}

#[test]
fn egress_backpressure_drops_but_never_stalls_scoring() {
    // One hot debtor makes almost every payment alertable. The push
    // endpoint is dead, so the pusher exits, the 64-slot egress ring fills,
    // and drop-on-full has to absorb the excess while scoring continues at
    // full rate: transactions_total still reaches K.
    const K: usize = 5_000;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    for i in 0..K {
        writeln!(
            file,
            "{}",
            payment_line("Hot Debtor", &format!("uetr-{i}"), "9000.00")
        )
        .unwrap();
    }
    file.flush().unwrap();

    let mut config = test_config();
    config.rings.alert_slots = 64;
    let pipeline = Pipeline::new(config);
    let report = pipeline
        .run(IngressMode::Replay {
            path: file.path().to_path_buf(),
        })
        .unwrap();

    assert_eq!(report.transactions_total, K as u64);
    assert!(report.drops_total > 0, "full egress ring must surface as drops");
    assert!(report.drops_total < K as u64);
}

#[test]
fn watcher_publishes_updated_weights() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"velocity_weight":0.8,"structuring_weight":0.1,"velocity_threshold":3.0,"structuring_threshold":8000.0,"baseline":0.07}}"#
    )
    .unwrap();
    file.flush().unwrap();

    let engine = Arc::new(RiskEngine::new(None));
    let stop = Arc::new(AtomicBool::new(false));
    let watcher = {
        let engine = Arc::clone(&engine);
        let stop = Arc::clone(&stop);
        let path = file.path().to_path_buf();
        thread::spawn(move || watch_rules(path, engine, Duration::from_secs(1), stop))
    };

    // one poll interval plus slack
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while engine.active_weights().baseline != 0.07 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(engine.active_weights().baseline, 0.07);
    assert_eq!(engine.active_weights().velocity_weight, 0.8);

    stop.store(true, Ordering::Relaxed);
    watcher.join().unwrap();
}
