//! Slot-leader-targeted submission. When the current slot leader's RPC
//! endpoint is known, sending straight to it shortens propagation; otherwise
//! the primary RPC is used. Direct connections are pooled in a bounded LRU.

use std::num::NonZeroUsize;
use std::sync::Arc;

use clru::CLruCache;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use solana_sdk::pubkey::Pubkey;

use crate::common::SolanaRpcClient;

const MAX_DIRECT_CONNECTIONS: usize = 32;

pub struct LeaderTracker {
    primary: Arc<SolanaRpcClient>,
    /// validator identity → direct RPC endpoint, fed by an external schedule
    /// watcher.
    endpoints: DashMap<Pubkey, String>,
    connections: Mutex<CLruCache<String, Arc<SolanaRpcClient>>>,
    current_leader: RwLock<Option<Pubkey>>,
}

impl LeaderTracker {
    pub fn new(primary: Arc<SolanaRpcClient>) -> Self {
        Self {
            primary,
            endpoints: DashMap::new(),
            connections: Mutex::new(CLruCache::new(
                NonZeroUsize::new(MAX_DIRECT_CONNECTIONS).unwrap(),
            )),
            current_leader: RwLock::new(None),
        }
    }

    pub fn record_endpoint(&self, validator: Pubkey, rpc_url: String) {
        self.endpoints.insert(validator, rpc_url);
    }

    pub fn set_current_leader(&self, validator: Option<Pubkey>) {
        *self.current_leader.write() = validator;
    }

    pub fn primary(&self) -> Arc<SolanaRpcClient> {
        self.primary.clone()
    }

    /// Connection for the current slot leader when its endpoint is known,
    /// the primary RPC otherwise. Direct connections are created on demand
    /// and retained until LRU eviction.
    pub fn client_for_current_leader(&self) -> Arc<SolanaRpcClient> {
        let leader = match *self.current_leader.read() {
            Some(leader) => leader,
            None => return self.primary.clone(),
        };
        let url = match self.endpoints.get(&leader) {
            Some(url) => url.clone(),
            None => return self.primary.clone(),
        };
        let mut connections = self.connections.lock();
        if let Some(client) = connections.get(&url) {
            return client.clone();
        }
        let client = Arc::new(SolanaRpcClient::new(url.clone()));
        connections.put(url, client.clone());
        client
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_leader_falls_back_to_primary() {
        let primary = Arc::new(SolanaRpcClient::new("http://localhost:8899".to_string()));
        let tracker = LeaderTracker::new(primary.clone());
        assert!(Arc::ptr_eq(&tracker.client_for_current_leader(), &primary));

        tracker.set_current_leader(Some(Pubkey::new_unique()));
        assert!(Arc::ptr_eq(&tracker.client_for_current_leader(), &primary));
    }

    #[test]
    fn known_leader_reuses_pooled_connection() {
        let primary = Arc::new(SolanaRpcClient::new("http://localhost:8899".to_string()));
        let tracker = LeaderTracker::new(primary.clone());
        let validator = Pubkey::new_unique();
        tracker.record_endpoint(validator, "http://leader:8899".to_string());
        tracker.set_current_leader(Some(validator));

        let first = tracker.client_for_current_leader();
        let second = tracker.client_for_current_leader();
        assert!(!Arc::ptr_eq(&first, &primary));
        assert!(Arc::ptr_eq(&first, &second));
    }
}
