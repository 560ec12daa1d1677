use std::num::NonZeroUsize;

use clru::CLruCache;
use dashmap::DashMap;
use parking_lot::Mutex;
use solana_sdk::{pubkey::Pubkey, signature::Signature};

use crate::constants::trade::SIGNATURE_DEDUP_CAPACITY;

/// Bounded per-leader signature LRU shared by the stream ingest and the
/// fallback poller. Guarantees no duplicate signature reaches the
/// orchestrator, including stream-replay overlap after a reconnect.
pub struct SignatureDedup {
    capacity: NonZeroUsize,
    per_leader: DashMap<Pubkey, Mutex<CLruCache<Signature, ()>>>,
}

impl SignatureDedup {
    pub fn new() -> Self {
        Self::with_capacity(SIGNATURE_DEDUP_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: NonZeroUsize::new(capacity.max(1)).unwrap(),
            per_leader: DashMap::new(),
        }
    }

    /// Records `signature` for `leader`. Returns `true` when it was not seen
    /// before (the event should be emitted).
    pub fn insert(&self, leader: &Pubkey, signature: &Signature) -> bool {
        let entry =
            self.per_leader.entry(*leader).or_insert_with(|| Mutex::new(CLruCache::new(self.capacity)));
        let mut cache = entry.lock();
        cache.put(*signature, ()).is_none()
    }

    pub fn forget_leader(&self, leader: &Pubkey) {
        self.per_leader.remove(leader);
    }
}

impl Default for SignatureDedup {
    fn default() -> Self {
        Self::new()
    }
}
