//! Orchestrator: classifies each leader event, fans out to the subscribed
//! users, and runs each user job through clone → dispatch → ledger update.
//! Work serializes per user (single-slot queue) and per (user, mint); jobs
//! for different users run in parallel.

use std::sync::Arc;

use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::classifier::{classify, SwapIntent, TradeSide};
use crate::cloning::{clone_for_user, ChainLookup, CloneRequest, CloneResult};
use crate::collaborators::{Collaborators, TradeEvent, TradeRecord, TradeStatus};
use crate::common::nonce_cache::NonceCache;
use crate::common::{EngineConfig, ExtraPrograms, SolanaRpcClient, WalletHandle};
use crate::error::{EngineError, EngineResult};
use crate::pretrade::PreTradeCache;
use crate::streaming::LeaderTxEvent;
use crate::trading::dispatcher::{leader_compute_unit_limit, DispatchRequest, Dispatcher};
use crate::trading::fills::{fetch_observed_fill, prorated_sell_amount};
use crate::trading::positions::PositionLedger;

pub struct Orchestrator {
    config: Arc<EngineConfig>,
    extras: ExtraPrograms,
    collaborators: Collaborators,
    chain: Arc<dyn ChainLookup>,
    dispatcher: Arc<Dispatcher>,
    ledger: Arc<PositionLedger>,
    pretrade: Arc<PreTradeCache>,
    nonce_cache: Arc<NonceCache>,
    rpc: Arc<SolanaRpcClient>,
    user_slots: DashMap<i64, Arc<Mutex<()>>>,
    pair_locks: DashMap<(i64, Pubkey), Arc<Mutex<()>>>,
    /// One queued job per user on top of the one running.
    queued: DashMap<i64, ()>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<EngineConfig>,
        collaborators: Collaborators,
        chain: Arc<dyn ChainLookup>,
        dispatcher: Arc<Dispatcher>,
        ledger: Arc<PositionLedger>,
        pretrade: Arc<PreTradeCache>,
        nonce_cache: Arc<NonceCache>,
        rpc: Arc<SolanaRpcClient>,
    ) -> EngineResult<Self> {
        let extras = config.parse_extra_programs()?;
        Ok(Self {
            config,
            extras,
            collaborators,
            chain,
            dispatcher,
            ledger,
            pretrade,
            nonce_cache,
            rpc,
            user_slots: DashMap::new(),
            pair_locks: DashMap::new(),
            queued: DashMap::new(),
        })
    }

    /// Entry point for every deduplicated leader event.
    pub async fn handle_event(self: &Arc<Self>, event: LeaderTxEvent) {
        let intent = match classify(&event.tx, &event.leader, &self.extras) {
            Some(intent) => intent,
            None => {
                debug!(signature = %event.signature, "not a recognizable swap");
                return;
            }
        };
        if !intent.cloneable {
            debug!(
                signature = %event.signature,
                platform = %intent.platform,
                "swap on unrecognized program, dropping"
            );
            return;
        }

        let subscribers = match self.collaborators.store.active_subscriptions().await {
            Ok(subs) => subs,
            Err(e) => {
                warn!("subscription lookup failed: {e}");
                return;
            }
        };
        let leader_cu = leader_compute_unit_limit(&event.tx);
        let intent = Arc::new(intent);
        for sub in subscribers {
            if !sub.active || sub.leader != event.leader {
                continue;
            }
            let orchestrator = self.clone();
            let intent = intent.clone();
            tokio::spawn(async move {
                orchestrator.run_user_job(sub.owner_chat_id, intent, leader_cu).await;
            });
        }
    }

    /// Serializes per user: one running job, at most one queued behind it.
    /// A third arrival while the slot and the queue are both taken is
    /// dropped — copying a stale swap two trades late helps nobody.
    async fn run_user_job(&self, chat_id: i64, intent: Arc<SwapIntent>, leader_cu: Option<u32>) {
        let slot = self.user_slots.entry(chat_id).or_default().clone();
        let guard = match slot.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                if self.queued.insert(chat_id, ()).is_some() {
                    warn!(chat_id, "user queue full, dropping copy-trade");
                    return;
                }
                let guard = slot.lock().await;
                self.queued.remove(&chat_id);
                guard
            }
        };

        let result = self.execute(chat_id, &intent, leader_cu).await;
        drop(guard);

        if let Err(error) = result {
            let mint = traded_mint(&intent);
            warn!(chat_id, %mint, "copy-trade failed: {error}");
            self.emit_failure(chat_id, &intent, error).await;
        }
    }

    async fn execute(
        &self,
        chat_id: i64,
        intent: &SwapIntent,
        leader_cu: Option<u32>,
    ) -> EngineResult<()> {
        let settings = self
            .collaborators
            .store
            .user_settings(chat_id)
            .await
            .map_err(EngineError::Other)?;
        let wallet = self
            .collaborators
            .store
            .signing_wallet(chat_id, &settings.primary_wallet_label)
            .await
            .map_err(EngineError::Other)?;

        let mint = traded_mint(intent);
        let pair = self.pair_locks.entry((chat_id, mint)).or_default().clone();
        let _pair_guard = pair.lock().await;

        let (amount_in, expected_sol_out) = match intent.side {
            TradeSide::Buy => {
                let amount = if settings.sol_amount_per_trade > 0 {
                    settings.sol_amount_per_trade
                } else {
                    self.config.default_trade_lamports()
                };
                let balance = self
                    .rpc
                    .get_balance(&wallet.pubkey)
                    .await
                    .map_err(|e| EngineError::DispatchTransient(format!("balance: {e}")))?;
                if balance < self.config.min_sol_amount_per_trade {
                    return Err(EngineError::InsufficientBalance { user: wallet.pubkey });
                }
                (amount, None)
            }
            TradeSide::Sell => {
                let position = match self.ledger.get(chat_id, &mint) {
                    Some(position) if !position.is_closed() => position,
                    // Fully sold or never held: the sell is an idempotent
                    // no-op.
                    _ => {
                        debug!(chat_id, %mint, "sell with no open position, ignoring");
                        return Ok(());
                    }
                };
                let amount = prorated_sell_amount(
                    position.amount_raw,
                    intent.leader_in_amount_raw,
                    intent.leader_token_pre_raw,
                );
                if amount == 0 {
                    return Ok(());
                }
                (amount, self.expected_sell_proceeds(&wallet.pubkey, &mint, amount).await)
            }
        };

        // Priority fee scales with the SOL at stake; sells without a
        // proceeds projection fall back to the configured buy size.
        let fee_basis = match intent.side {
            TradeSide::Buy => amount_in,
            TradeSide::Sell => expected_sol_out.unwrap_or_else(|| {
                if settings.sol_amount_per_trade > 0 {
                    settings.sol_amount_per_trade
                } else {
                    self.config.default_trade_lamports()
                }
            }),
        };

        if let Some(nonce) = &wallet.nonce {
            self.nonce_cache.register(nonce.nonce_account);
            self.nonce_cache.refresh(&self.rpc, &nonce.nonce_account).await;
        }

        let clone = self
            .cached_or_cloned(intent, &wallet, amount_in, settings.slippage_bps, expected_sol_out)
            .await?;

        let request = DispatchRequest {
            clone,
            payer: wallet.keypair.clone(),
            nonce: wallet.nonce.clone(),
            leader_compute_unit_limit: leader_cu,
            sol_amount: fee_basis,
        };

        let outcome = match self.dispatcher.dispatch(request).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_transient() => {
                // One orchestrator-level retry on transient send failure;
                // rebuild so blockhash and nonce state are fresh.
                info!(chat_id, "transient dispatch failure, retrying once: {e}");
                let clone = self
                    .cached_or_cloned(
                        intent,
                        &wallet,
                        amount_in,
                        settings.slippage_bps,
                        expected_sol_out,
                    )
                    .await?;
                let retry = self
                    .dispatcher
                    .dispatch(DispatchRequest {
                        clone,
                        payer: wallet.keypair.clone(),
                        nonce: wallet.nonce.clone(),
                        leader_compute_unit_limit: leader_cu,
                        sol_amount: fee_basis,
                    })
                    .await;
                match retry {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        return self.record_dispatch_failure(chat_id, &wallet, intent, e).await
                    }
                }
            }
            Err(e) => return self.record_dispatch_failure(chat_id, &wallet, intent, e).await,
        };

        self.settle(chat_id, &wallet, intent, &mint, outcome.signature, outcome.slot).await
    }

    /// Uses a fresh pre-built instruction list from the speculative cache
    /// when one survives the inline age/mcap re-validation, otherwise runs
    /// the cloner.
    async fn cached_or_cloned(
        &self,
        intent: &SwapIntent,
        wallet: &WalletHandle,
        amount_in: u64,
        slippage_bps: u64,
        expected_sol_out: Option<u64>,
    ) -> EngineResult<CloneResult> {
        if intent.side == TradeSide::Buy {
            let mint = traded_mint(intent);
            if let Some(instructions) = self.pretrade.fresh_instructions(
                &wallet.pubkey,
                &mint,
                intent.platform,
                &self.config.janitor,
                chrono::Utc::now().timestamp_millis(),
            ) {
                debug!(%mint, "using pre-built instructions");
                return Ok(CloneResult { instructions, used_nonce: false });
            }
        }
        let request = CloneRequest {
            intent,
            user: wallet.pubkey,
            amount_in,
            slippage_bps,
            nonce: wallet.nonce.as_ref(),
            expected_sol_out,
        };
        clone_for_user(&request, self.chain.as_ref()).await
    }

    async fn expected_sell_proceeds(
        &self,
        wallet: &Pubkey,
        mint: &Pubkey,
        amount: u64,
    ) -> Option<u64> {
        match self.collaborators.api.get_sell_state(wallet, mint).await {
            Ok(state) => {
                let expected = state.expected_sol_out?;
                if state.token_balance_raw == 0 || amount >= state.token_balance_raw {
                    Some(expected)
                } else {
                    Some(
                        ((expected as u128) * (amount as u128)
                            / (state.token_balance_raw as u128)) as u64,
                    )
                }
            }
            Err(e) => {
                warn!(%mint, "sell state lookup failed: {e}");
                None
            }
        }
    }

    /// Confirmed success: read the observed fill, update the ledger, write
    /// the durable record, notify.
    async fn settle(
        &self,
        chat_id: i64,
        wallet: &WalletHandle,
        intent: &SwapIntent,
        mint: &Pubkey,
        signature: solana_sdk::signature::Signature,
        slot: Option<u64>,
    ) -> EngineResult<()> {
        let fill = fetch_observed_fill(&self.rpc, &signature, &wallet.pubkey, mint)
            .await
            .map_err(EngineError::Other)?;

        let (position, pnl) = match intent.side {
            TradeSide::Buy => {
                let tokens_received = fill.token_delta_raw.max(0) as u128;
                let sol_spent = (-fill.sol_delta_lamports).max(0) as u64;
                let position = self.ledger.apply_buy(
                    chat_id,
                    mint,
                    tokens_received,
                    sol_spent,
                    fill.fee_lamports,
                );
                (position, None)
            }
            TradeSide::Sell => {
                let tokens_sold = (-fill.token_delta_raw).max(0) as u128;
                let sol_received = fill.sol_delta_lamports.max(0) as u64;
                let (position, outcome) = self.ledger.apply_sell(
                    chat_id,
                    mint,
                    tokens_sold,
                    sol_received,
                    fill.fee_lamports,
                );
                (position, Some(outcome))
            }
        };

        let record = TradeRecord {
            chat_id,
            wallet: wallet.pubkey,
            leader: intent.leader,
            mint: *mint,
            side: intent.side,
            signature: signature.to_string(),
            status: TradeStatus::Confirmed,
            sol_delta_lamports: fill.sol_delta_lamports,
            token_delta_raw: fill.token_delta_raw,
            fee_lamports: fill.fee_lamports,
            slot: slot.or(Some(fill.slot)),
            unix_ms: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.collaborators.store.record_trade(&record).await {
            warn!(chat_id, "trade record write failed: {e}");
        }
        if let Err(e) = self.collaborators.store.update_position(chat_id, mint, &position).await {
            warn!(chat_id, "position write failed: {e}");
        }

        self.collaborators
            .notifier
            .notify(TradeEvent::Completed {
                chat_id,
                mint: *mint,
                side: intent.side,
                signature: signature.to_string(),
                sol_delta_lamports: fill.sol_delta_lamports,
                token_delta_raw: fill.token_delta_raw,
                pnl_gross_lamports: pnl.map(|p| p.pnl_gross_lamports),
                pnl_net_lamports: pnl.map(|p| p.pnl_net_lamports),
            })
            .await;
        Ok(())
    }

    /// On-chain failure and timeout both leave a durable trace; neither
    /// triggers a resend.
    async fn record_dispatch_failure(
        &self,
        chat_id: i64,
        wallet: &WalletHandle,
        intent: &SwapIntent,
        error: EngineError,
    ) -> EngineResult<()> {
        let mint = traded_mint(intent);
        let (signature, status, event) = match &error {
            EngineError::DispatchOnChainFail { signature, err } => (
                signature.clone(),
                TradeStatus::Failed(err.clone()),
                TradeEvent::Failed {
                    chat_id,
                    mint,
                    side: intent.side,
                    reason: err.clone(),
                },
            ),
            EngineError::DispatchTimeout { signature } => (
                signature.clone(),
                TradeStatus::Pending,
                TradeEvent::Pending { chat_id, mint, signature: signature.clone() },
            ),
            _ => return Err(error),
        };

        let record = TradeRecord {
            chat_id,
            wallet: wallet.pubkey,
            leader: intent.leader,
            mint,
            side: intent.side,
            signature,
            status,
            sol_delta_lamports: 0,
            token_delta_raw: 0,
            fee_lamports: 0,
            slot: None,
            unix_ms: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(e) = self.collaborators.store.record_trade(&record).await {
            warn!(chat_id, "trade record write failed: {e}");
        }
        self.collaborators.notifier.notify(event).await;
        Ok(())
    }

    async fn emit_failure(&self, chat_id: i64, intent: &SwapIntent, error: EngineError) {
        self.collaborators
            .notifier
            .notify(TradeEvent::Failed {
                chat_id,
                mint: traded_mint(intent),
                side: intent.side,
                reason: error.to_string(),
            })
            .await;
    }
}

/// The non-SOL side of the swap: what the user is accumulating or selling.
fn traded_mint(intent: &SwapIntent) -> Pubkey {
    match intent.side {
        TradeSide::Buy => intent.output_mint,
        TradeSide::Sell => intent.input_mint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{CloningTarget, Platform};
    use crate::collaborators::{ApiManager, Notifier, SellState, TokenMetadata};
    use crate::common::{AnyResult, TraderSubscription, UserSettings};
    use crate::constants::{platforms, WSOL_MINT};
    use crate::trading::leader_tracker::LeaderTracker;
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;
    use solana_sdk::signature::Keypair;
    use std::collections::HashMap;

    struct FakeApi;

    #[async_trait]
    impl ApiManager for FakeApi {
        async fn get_token_prices(&self, _mints: &[Pubkey]) -> AnyResult<HashMap<Pubkey, f64>> {
            Ok(HashMap::new())
        }
        async fn get_token_metadatas(
            &self,
            _mints: &[Pubkey],
        ) -> AnyResult<HashMap<Pubkey, TokenMetadata>> {
            Ok(HashMap::new())
        }
        async fn get_sell_state(&self, _user: &Pubkey, _mint: &Pubkey) -> AnyResult<SellState> {
            Ok(SellState { token_balance_raw: 0, expected_sol_out: None })
        }
    }

    struct FakeStore {
        wallet: WalletHandle,
    }

    #[async_trait]
    impl crate::collaborators::TradeStore for FakeStore {
        async fn active_subscriptions(&self) -> AnyResult<Vec<TraderSubscription>> {
            Ok(vec![])
        }
        async fn user_settings(&self, chat_id: i64) -> AnyResult<UserSettings> {
            Ok(UserSettings {
                chat_id,
                sol_amount_per_trade: 10_000_000,
                slippage_bps: 500,
                primary_wallet_label: "main".into(),
                is_admin: false,
            })
        }
        async fn signing_wallet(&self, _chat_id: i64, _label: &str) -> AnyResult<WalletHandle> {
            Ok(self.wallet.clone())
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

    #[derive(Default)]
    struct RecordingNotifier {
        events: PlMutex<Vec<TradeEvent>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, event: TradeEvent) {
            self.events.lock().push(event);
        }
    }

    struct NoChain;

    #[async_trait]
    impl ChainLookup for NoChain {
        async fn mint_owner_program(&self, _mint: &Pubkey) -> AnyResult<Pubkey> {
            anyhow::bail!("offline")
        }
        async fn account_exists(&self, _account: &Pubkey) -> AnyResult<bool> {
            anyhow::bail!("offline")
        }
    }

    fn test_orchestrator(notifier: Arc<RecordingNotifier>) -> Arc<Orchestrator> {
        let config = Arc::new(EngineConfig::new("http://localhost:10000", "http://localhost:8899"));
        let rpc = Arc::new(SolanaRpcClient::new("http://localhost:8899".to_string()));
        let wallet = WalletHandle {
            pubkey: Pubkey::new_unique(),
            keypair: Arc::new(Keypair::new()),
            nonce: None,
        };
        let collaborators = Collaborators {
            api: Arc::new(FakeApi),
            store: Arc::new(FakeStore { wallet }),
            notifier,
        };
        let nonce_cache = Arc::new(NonceCache::new());
        let dispatcher = Arc::new(Dispatcher::new(
            rpc.clone(),
            Arc::new(LeaderTracker::new(rpc.clone())),
            nonce_cache.clone(),
            config.priority_fee.clone(),
            config.compute_unit_default,
            None,
        ));
        Arc::new(
            Orchestrator::new(
                config,
                collaborators,
                Arc::new(NoChain),
                dispatcher,
                Arc::new(PositionLedger::new()),
                Arc::new(PreTradeCache::new()),
                nonce_cache,
                rpc,
            )
            .unwrap(),
        )
    }

    fn sell_intent(mint: Pubkey) -> SwapIntent {
        SwapIntent {
            leader: Pubkey::new_unique(),
            side: TradeSide::Sell,
            input_mint: mint,
            output_mint: WSOL_MINT,
            platform: Platform::PumpFunBondingCurve,
            cloning_target: CloningTarget {
                program_id: platforms::PUMPFUN,
                accounts: vec![],
                data: vec![],
            },
            leader_in_amount_raw: 100,
            leader_out_amount_raw: 1_000,
            leader_token_pre_raw: 100,
            nested_target: None,
            cloneable: true,
        }
    }

    #[tokio::test]
    async fn sell_without_open_position_is_idempotent_noop() {
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = test_orchestrator(notifier.clone());
        let intent = Arc::new(sell_intent(Pubkey::new_unique()));

        orchestrator.run_user_job(1, intent.clone(), None).await;
        orchestrator.run_user_job(1, intent, None).await;

        // No failure events: the fully-sold sell is silently ignored.
        assert!(notifier.events.lock().is_empty());
    }

    #[tokio::test]
    async fn non_cloneable_intent_never_fans_out() {
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = test_orchestrator(notifier.clone());

        // A transaction with no balance movement classifies to None and is
        // dropped before any user work.
        let leader = Pubkey::new_unique();
        let tx = Arc::new(crate::streaming::RawTransaction::default());
        let event = crate::streaming::LeaderTxEvent {
            leader,
            signature: solana_sdk::signature::Signature::from([1u8; 64]),
            slot: 1,
            tx,
        };
        orchestrator.handle_event(event).await;
        assert!(notifier.events.lock().is_empty());
    }
}
