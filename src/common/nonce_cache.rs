use dashmap::DashMap;
use solana_hash::Hash;
use solana_sdk::account_utils::StateMut;
use solana_sdk::nonce::state::Versions;
use solana_sdk::nonce::State;
use solana_sdk::pubkey::Pubkey;
use tracing::error;

use crate::common::SolanaRpcClient;

/// Durable-nonce state for one wallet's nonce account.
#[derive(Debug, Clone, Copy)]
pub struct NonceInfo {
    pub nonce_account: Pubkey,
    /// Current nonce value, used in place of a recent blockhash.
    pub current_nonce: Hash,
    /// Set once a transaction consuming this nonce value has been built.
    pub used: bool,
}

/// Tracks the latest nonce value per nonce account. One wallet maps to at
/// most one nonce account; values refresh from chain between trades.
#[derive(Default)]
pub struct NonceCache {
    entries: DashMap<Pubkey, NonceInfo>,
}

impl NonceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, nonce_account: Pubkey) {
        self.entries.entry(nonce_account).or_insert(NonceInfo {
            nonce_account,
            current_nonce: Hash::default(),
            used: false,
        });
    }

    pub fn get(&self, nonce_account: &Pubkey) -> Option<NonceInfo> {
        self.entries.get(nonce_account).map(|e| *e.value())
    }

    /// Take the current nonce value for a transaction. Returns `None` when the
    /// value is unknown or already consumed by an in-flight transaction.
    pub fn acquire(&self, nonce_account: &Pubkey) -> Option<Hash> {
        let mut entry = self.entries.get_mut(nonce_account)?;
        if entry.used || entry.current_nonce == Hash::default() {
            return None;
        }
        entry.used = true;
        Some(entry.current_nonce)
    }

    /// Release a nonce acquired for a transaction that never reached the wire.
    pub fn release(&self, nonce_account: &Pubkey) {
        if let Some(mut entry) = self.entries.get_mut(nonce_account) {
            entry.used = false;
        }
    }

    /// Refresh a nonce value from chain. A changed value also clears `used`,
    /// since the advance that consumed the old value has landed.
    pub async fn refresh(&self, rpc: &SolanaRpcClient, nonce_account: &Pubkey) {
        match rpc.get_account(nonce_account).await {
            Ok(account) => match account.state() {
                Ok(Versions::Current(state)) => {
                    if let State::Initialized(data) = *state {
                        let blockhash = *data.durable_nonce.as_hash();
                        if let Some(mut entry) = self.entries.get_mut(nonce_account) {
                            if entry.current_nonce != blockhash {
                                entry.current_nonce = blockhash;
                                entry.used = false;
                            }
                        }
                    }
                }
                _ => (),
            },
            Err(e) => {
                error!(%nonce_account, "failed to read nonce account: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_requires_known_value() {
        let cache = NonceCache::new();
        let nonce_account = Pubkey::new_unique();
        cache.register(nonce_account);
        assert!(cache.acquire(&nonce_account).is_none());

        let value = Hash::new_unique();
        cache.entries.get_mut(&nonce_account).unwrap().current_nonce = value;
        assert_eq!(cache.acquire(&nonce_account), Some(value));
        // Consumed until refreshed or released.
        assert!(cache.acquire(&nonce_account).is_none());
        cache.release(&nonce_account);
        assert_eq!(cache.acquire(&nonce_account), Some(value));
    }
}
