//! Shard Router (SH) and Shard Ring (SR).
//!
//! Routing is a pure function of the payload body; the ring is a bounded,
//! non-blocking MPMC queue built on `crossbeam_channel`'s bounded channel
//! (its `try_send`/`try_recv` give us the never-blocks-never-allocates
//! `try_push` contract without hand-rolling a lock-free ring buffer).

use crate::metrics;
use crossbeam_channel::{Receiver, Sender, TrySendError};

/// One accepted HTTP request, copied off the request buffer.
#[derive(Debug, Clone)]
pub struct IngressEvent {
    pub body: Vec<u8>,
    pub sig: Vec<u8>,
    pub ts: Vec<u8>,
}

/// Stable 64-bit FNV-1a hash over the payload body.
///
/// FNV-1a, not a crypto hash: routing only needs good distribution, not
/// collision resistance, and the constants are cheap to inline.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Shard count must be a power of two so the hash mask (`hash & (n-1)`)
/// is equivalent to `hash % n`. `n == 1` always routes to shard 0.
#[derive(Debug, Clone, Copy)]
pub struct ShardRouter {
    mask: u64,
}

impl ShardRouter {
    /// `shard_count == 0` is accepted (the all-shards-unconfigured case,
    /// which the caller surfaces as 503 before ever reaching `shard_of`);
    /// any other non-power-of-two count panics.
    pub fn new(shard_count: usize) -> Self {
        assert!(
            shard_count == 0 || shard_count.is_power_of_two(),
            "shard count must be a power of two, got {shard_count}"
        );
        Self {
            mask: shard_count.saturating_sub(1) as u64,
        }
    }

    pub fn shard_of(&self, body: &[u8]) -> usize {
        (fnv1a_64(body) & self.mask) as usize
    }
}

/// Bounded, non-blocking ring of `IngressEvent`s for one shard.
pub struct ShardRing {
    id: usize,
    tx: Sender<IngressEvent>,
    rx: Receiver<IngressEvent>,
}

impl ShardRing {
    pub fn new(id: usize, capacity: usize) -> Self {
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self { id, tx, rx }
    }

    /// Never blocks. Returns `false` immediately when the ring is full or
    /// has no remaining receivers (shutdown in progress).
    pub fn try_push(&self, event: IngressEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => {
                metrics::FAST_SHARD_QUEUED
                    .with_label_values(&[&self.id.to_string()])
                    .set(self.tx.len() as i64);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// A cloneable consumer handle; multiple validator workers may hold one.
    pub fn receiver(&self) -> Receiver<IngressEvent> {
        self.rx.clone()
    }

    /// Dropping every sender handle closes the ring so pending `recv`s drain
    /// and then return `Err` — used during shutdown.
    pub fn sender(&self) -> Sender<IngressEvent> {
        self.tx.clone()
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}
