//! Ingress - the producer side of the payment ring
//!
//! Two closed variants: replay from a local file (one XML document per
//! line) or live consumption from the upstream Kafka bus. Both decode into
//! a reused [`PaymentRecord`] and push with yield-until-space backpressure;
//! a full ring never drops a payment, it just slows the producer down.
//!
//! Decode failures are skipped silently (debug-logged) and, in live mode,
//! never advance the commit counter.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::ClientConfig;
use thiserror::Error;

use crate::payment::{decode, PaymentRecord};
use crate::ring::Producer;

const TARGET_INGRESS: &str = "AEGIS::INGRESS";

/// Fixed consumer group for the upstream bus.
pub const CONSUMER_GROUP: &str = "aegis_group_v1";
/// Default topic when none is configured.
pub const DEFAULT_TOPIC: &str = "transactions.euro.v1";

const POLL_TIMEOUT: Duration = Duration::from_millis(100);
const COMMIT_INTERVAL: u64 = 1000;

/// The two ingress variants. A closed set on purpose: there is no third
/// source, so a tagged enum beats an open trait.
#[derive(Debug, Clone)]
pub enum IngressMode {
    /// Read payments from a local replay file.
    Replay { path: PathBuf },
    /// Subscribe to one topic on the upstream bus.
    Live { brokers: String, topic: String },
}

#[derive(Debug, Error)]
pub enum IngressError {
    #[error("failed to open replay file {path}: {source}")]
    ReplayOpen {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("upstream consumer setup failed: {0}")]
    Consumer(#[from] KafkaError),
}

/// Run the selected ingress on the calling thread until the source is
/// exhausted, a fatal upstream error occurs, or stop is raised.
pub fn run(
    mode: &IngressMode,
    producer: &mut Producer<PaymentRecord>,
    stop: &AtomicBool,
) -> Result<(), IngressError> {
    match mode {
        IngressMode::Replay { path } => run_replay(path, producer, stop),
        IngressMode::Live { brokers, topic } => run_live(brokers, topic, producer, stop),
    }
}

/// Push with backpressure: yield and retry until space frees up or stop is
/// raised. Returns false only when stopped.
fn push_payment(
    producer: &mut Producer<PaymentRecord>,
    record: PaymentRecord,
    stop: &AtomicBool,
) -> bool {
    let mut item = record;
    loop {
        match producer.try_push(item) {
            Ok(()) => return true,
            Err(back) => {
                if stop.load(Ordering::Relaxed) {
                    return false;
                }
                item = back;
                thread::yield_now();
            }
        }
    }
}

fn run_replay(
    path: &Path,
    producer: &mut Producer<PaymentRecord>,
    stop: &AtomicBool,
) -> Result<(), IngressError> {
    let file = File::open(path).map_err(|source| IngressError::ReplayOpen {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!(target: TARGET_INGRESS, path = %path.display(), "replaying payment log");

    let mut record = PaymentRecord::default();
    let mut replayed: u64 = 0;
    for line in BufReader::new(file).lines() {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(target: TARGET_INGRESS, error = %e, "replay read failed");
                break;
            }
        };
        if line.is_empty() {
            continue;
        }
        match decode(line.as_bytes(), &mut record) {
            Ok(()) => {
                if !push_payment(producer, record, stop) {
                    break;
                }
                replayed += 1;
            }
            Err(e) => {
                tracing::debug!(target: TARGET_INGRESS, error = %e, "skipping undecodable replay line");
            }
        }
    }

    tracing::info!(target: TARGET_INGRESS, replayed, "replay finished");
    Ok(())
}

fn run_live(
    brokers: &str,
    topic: &str,
    producer: &mut Producer<PaymentRecord>,
    stop: &AtomicBool,
) -> Result<(), IngressError> {
    let consumer: BaseConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("group.id", CONSUMER_GROUP)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "latest")
        .create()?;
    consumer.subscribe(&[topic])?;
    tracing::info!(target: TARGET_INGRESS, brokers, topic, "subscribed to upstream bus");

    let mut record = PaymentRecord::default();
    let mut pushed: u64 = 0;

    while !stop.load(Ordering::Relaxed) {
        match consumer.poll(POLL_TIMEOUT) {
            // Poll timeout: nothing to do, loop and re-check stop
            None => {}
            Some(Ok(message)) => {
                let Some(payload) = message.payload() else {
                    continue;
                };
                match decode(payload, &mut record) {
                    Ok(()) => {
                        if !push_payment(producer, record, stop) {
                            break;
                        }
                        pushed += 1;
                        if pushed % COMMIT_INTERVAL == 0 {
                            if let Err(e) = consumer.commit_consumer_state(CommitMode::Async) {
                                tracing::warn!(
                                    target: TARGET_INGRESS,
                                    error = %e,
                                    "async offset commit failed"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        // No push, no commit: the offset stays uncommitted
                        tracing::debug!(
                            target: TARGET_INGRESS,
                            error = %e,
                            "skipping undecodable bus message"
                        );
                    }
                }
            }
            Some(Err(KafkaError::PartitionEOF(_))) => {}
            Some(Err(e)) if is_fatal(&e) => {
                tracing::error!(
                    target: TARGET_INGRESS,
                    error = %e,
                    "fatal upstream error, ingress exiting"
                );
                break;
            }
            Some(Err(e)) => {
                tracing::warn!(target: TARGET_INGRESS, error = %e, "transient upstream error");
            }
        }
    }

    tracing::info!(target: TARGET_INGRESS, pushed, "live ingress stopped");
    Ok(())
}

fn is_fatal(e: &KafkaError) -> bool {
    matches!(e.rdkafka_error_code(), Some(RDKafkaErrorCode::Fatal))
}
