//! Validator Worker (VW).
//!
//! Runs on a dedicated OS thread rather than as a tokio task: its only
//! operations are a blocking pop off the shard's crossbeam ring and a
//! (possibly blocking) send into the batch writer's `tokio::mpsc` channel.
//! `Sender::blocking_send` is exactly the backpressure primitive the shard
//! needs — a full validated channel blocks the worker, which starves pops
//! off the ring, which is how load sheds back to 429s at the ingress edge.

use crate::metrics;
use crate::shard::IngressEvent;
use crate::signature;
use crossbeam_channel::Receiver;
use tokio::sync::mpsc;

/// One authenticated event, body verbatim from the `IngressEvent` that
/// produced it.
#[derive(Debug, Clone)]
pub struct ValidatedRecord {
    pub body: Vec<u8>,
}

/// Runs one validator worker to completion. Exits when `ring_rx` is
/// disconnected and drained, or when the validated channel's receiver is
/// gone.
///
/// `secret` is the raw HMAC key; callers read it from the environment once
/// at startup and never log or serialize it.
pub fn run(ring_rx: Receiver<IngressEvent>, validated_tx: mpsc::Sender<ValidatedRecord>, secret: std::sync::Arc<Vec<u8>>) {
    loop {
        let event = match ring_rx.recv() {
            Ok(event) => event,
            Err(_) => break, // ring closed and drained
        };

        if signature::verify(&event.ts, &event.body, &event.sig, &secret) {
            metrics::VALIDATED_TOTAL.inc();
            if validated_tx
                .blocking_send(ValidatedRecord { body: event.body })
                .is_err()
            {
                break; // batch writer gone; shard is shutting down
            }
        } else {
            metrics::INVALID_TOTAL.inc();
        }
    }
}

/// Spawns `run` on a dedicated OS thread, returning its `JoinHandle`.
pub fn spawn(
    ring_rx: Receiver<IngressEvent>,
    validated_tx: mpsc::Sender<ValidatedRecord>,
    secret: std::sync::Arc<Vec<u8>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || run(ring_rx, validated_tx, secret))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::ShardRing;

    #[test]
    fn valid_event_is_forwarded_with_body_unchanged() {
        let secret = std::sync::Arc::new(b"s".to_vec());
        let ts = b"1700000000".to_vec();
        let body = br#"{"a":1}"#.to_vec();
        let sig = signature::compute(&ts, &body, &secret).into_bytes();

        let ring = ShardRing::new(0, 4);
        ring.try_push(IngressEvent {
            body: body.clone(),
            sig,
            ts,
        });
        drop(ring.sender());

        let rt = tokio::runtime::Runtime::new().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        run(ring.receiver(), tx, secret);

        let record = rt.block_on(rx.recv()).expect("one validated record");
        assert_eq!(record.body, body);
        assert!(rt.block_on(rx.recv()).is_none());
    }

    #[test]
    fn invalid_event_is_dropped_silently() {
        let secret = std::sync::Arc::new(b"s".to_vec());
        let ring = ShardRing::new(0, 4);
        ring.try_push(IngressEvent {
            body: b"{}".to_vec(),
            sig: b"v0=deadbeef".to_vec(),
            ts: b"1".to_vec(),
        });
        drop(ring.sender());

        let rt = tokio::runtime::Runtime::new().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        run(ring.receiver(), tx, secret);
        assert!(rt.block_on(rx.recv()).is_none());
    }

    #[test]
    fn worker_exits_promptly_when_validated_channel_closes() {
        let secret = std::sync::Arc::new(b"s".to_vec());
        let ring = ShardRing::new(0, 4);
        let ts = b"1".to_vec();
        let body = b"{}".to_vec();
        let sig = signature::compute(&ts, &body, &secret).into_bytes();
        ring.try_push(IngressEvent { body, sig, ts });

        let (tx, rx) = mpsc::channel(1);
        drop(rx); // receiver gone before the worker even starts
        drop(ring.sender());

        let handle = spawn(ring.receiver(), tx, secret);
        handle.join().expect("worker thread panicked");
    }
}
