//! Periodic pruner for the pre-trade cache. Each cycle batches one price and
//! one metadata lookup over the cached mints, recomputes market caps, and
//! applies the platform-class rules. Applying a cycle twice with no state
//! change in between is a no-op.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::collaborators::Collaborators;
use crate::common::JanitorPolicy;
use crate::pretrade::{prune_reason, PreTradeCache};

pub struct Janitor {
    cache: Arc<PreTradeCache>,
    collaborators: Collaborators,
    policy: JanitorPolicy,
}

impl Janitor {
    pub fn new(
        cache: Arc<PreTradeCache>,
        collaborators: Collaborators,
        policy: JanitorPolicy,
    ) -> Self {
        Self { cache, collaborators, policy }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.policy.interval_ms));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep(chrono::Utc::now().timestamp_millis()).await;
        }
    }

    /// One pruning cycle. Public for tests.
    pub async fn sweep(&self, now_ms: i64) {
        let mints = self.cache.mints();
        if mints.is_empty() {
            return;
        }

        let prices = match self.collaborators.api.get_token_prices(&mints).await {
            Ok(prices) => prices,
            Err(e) => {
                warn!("janitor price fetch failed, skipping cycle: {e}");
                return;
            }
        };
        let metadatas = match self.collaborators.api.get_token_metadatas(&mints).await {
            Ok(metadatas) => metadatas,
            Err(e) => {
                warn!("janitor metadata fetch failed, skipping cycle: {e}");
                return;
            }
        };

        let mut pruned = 0usize;
        self.cache.retain(|_, entry| {
            let (total_supply, decimals) = match metadatas.get(&entry.mint) {
                Some(meta) => (meta.total_supply, meta.decimals),
                None => (entry.total_supply, entry.decimals),
            };
            // Missing data skips the entry for this cycle.
            let price = match prices.get(&entry.mint) {
                Some(price) => *price,
                None => return true,
            };
            let whole_supply = total_supply as f64 / 10f64.powi(decimals as i32);
            entry.last_mcap_sol = Some(whole_supply * price);

            match prune_reason(entry, &self.policy, now_ms) {
                Some(reason) => {
                    info!(mint = %entry.mint, platform = %entry.platform, "pruned: {reason}");
                    pruned += 1;
                    false
                }
                None => true,
            }
        });
        if pruned > 0 {
            debug!(pruned, remaining = self.cache.len(), "janitor cycle complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Platform;
    use crate::collaborators::{
        ApiManager, Notifier, SellState, TokenMetadata, TradeEvent, TradeRecord, TradeStore,
    };
    use crate::common::{AnyResult, TraderSubscription, UserSettings, WalletHandle};
    use crate::pretrade::PreTradeCacheEntry;
    use async_trait::async_trait;
    use solana_sdk::pubkey::Pubkey;
    use std::collections::HashMap;

    struct FakeApi {
        prices: HashMap<Pubkey, f64>,
        metadatas: HashMap<Pubkey, TokenMetadata>,
    }

    #[async_trait]
    impl ApiManager for FakeApi {
        async fn get_token_prices(&self, _mints: &[Pubkey]) -> AnyResult<HashMap<Pubkey, f64>> {
            Ok(self.prices.clone())
        }
        async fn get_token_metadatas(
            &self,
            _mints: &[Pubkey],
        ) -> AnyResult<HashMap<Pubkey, TokenMetadata>> {
            Ok(self.metadatas.clone())
        }
        async fn get_sell_state(&self, _user: &Pubkey, _mint: &Pubkey) -> AnyResult<SellState> {
            Ok(SellState { token_balance_raw: 0, expected_sol_out: None })
        }
    }

    struct NullStore;

    #[async_trait]
    impl TradeStore for NullStore {
        async fn active_subscriptions(&self) -> AnyResult<Vec<TraderSubscription>> {
            Ok(vec![])
        }
        async fn user_settings(&self, _chat_id: i64) -> AnyResult<UserSettings> {
            anyhow::bail!("unused")
        }
        async fn signing_wallet(&self, _chat_id: i64, _label: &str) -> AnyResult<WalletHandle> {
            anyhow::bail!("unused")
        }
        async fn record_trade(&self, _record: &TradeRecord) -> AnyResult<()> {
            Ok(())
        }
        async fn update_position(
            &self,
            _chat_id: i64,
            _mint: &Pubkey,
            _position: &crate::trading::positions::Position,
        ) -> AnyResult<()> {
            Ok(())
        }
    }

    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify(&self, _event: TradeEvent) {}
    }

    fn collaborators(api: FakeApi) -> Collaborators {
        Collaborators {
            api: Arc::new(api),
            store: Arc::new(NullStore),
            notifier: Arc::new(NullNotifier),
        }
    }

    fn entry(mint: Pubkey, platform: Platform) -> PreTradeCacheEntry {
        PreTradeCacheEntry {
            mint,
            platform,
            built_instructions: vec![],
            total_supply: 1_000_000_000_000_000, // 1B tokens at 6 decimals
            decimals: 6,
            created_at_ms: 0,
            last_mcap_sol: None,
        }
    }

    #[tokio::test]
    async fn prunes_low_cap_pumpfun_and_is_idempotent() {
        let user = Pubkey::new_unique();
        let doomed = Pubkey::new_unique();
        let healthy = Pubkey::new_unique();
        let cache = Arc::new(PreTradeCache::new());
        cache.insert(user, entry(doomed, Platform::PumpFunBondingCurve));
        cache.insert(user, entry(healthy, Platform::PumpFunBondingCurve));

        let mut prices = HashMap::new();
        // 1B supply * price → mcap 800 vs 5000.
        prices.insert(doomed, 0.0000008);
        prices.insert(healthy, 0.000005);
        let api = FakeApi { prices, metadatas: HashMap::new() };
        let janitor = Janitor::new(cache.clone(), collaborators(api), JanitorPolicy::default());

        janitor.sweep(10_000).await;
        assert_eq!(cache.len(), 1);

        // Second sweep with unchanged state removes nothing further.
        janitor.sweep(10_000).await;
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn missing_price_skips_entry() {
        let user = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let cache = Arc::new(PreTradeCache::new());
        cache.insert(user, entry(mint, Platform::PumpFunBondingCurve));

        let api = FakeApi { prices: HashMap::new(), metadatas: HashMap::new() };
        let janitor = Janitor::new(cache.clone(), collaborators(api), JanitorPolicy::default());
        janitor.sweep(i64::MAX).await;
        assert_eq!(cache.len(), 1);
    }
}
