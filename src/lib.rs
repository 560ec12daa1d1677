pub mod classifier;
pub mod cloning;
pub mod collaborators;
pub mod common;
pub mod constants;
pub mod error;
pub mod instruction;
pub mod pretrade;
pub mod streaming;
pub mod trading;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustls::crypto::{ring::default_provider, CryptoProvider};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::{mpsc, watch, Notify};
use tracing::{info, warn};

use crate::cloning::RpcChainLookup;
use crate::collaborators::Collaborators;
use crate::common::nonce_cache::NonceCache;
use crate::common::{EngineConfig, SolanaRpcClient};
use crate::error::EngineResult;
use crate::pretrade::{janitor::Janitor, PreTradeCache};
use crate::streaming::dedup::SignatureDedup;
use crate::streaming::ingest::StreamIngest;
use crate::streaming::poller::FallbackPoller;
use crate::streaming::StreamHealth;
use crate::trading::leader_tracker::LeaderTracker;
use crate::trading::positions::PositionLedger;
use crate::trading::{Dispatcher, Orchestrator};

const EVENT_CHANNEL_CAPACITY: usize = 1_024;
const LEADER_REFRESH_INTERVAL_MS: u64 = 60_000;

/// The copy-trading engine. Owns the ingest, fallback poller, orchestrator
/// and janitor tasks; the embedding binary supplies configuration and the
/// external collaborators, then calls [`CopyEngine::run`].
pub struct CopyEngine {
    config: Arc<EngineConfig>,
    collaborators: Collaborators,
    rpc: Arc<SolanaRpcClient>,
    orchestrator: Arc<Orchestrator>,
    ledger: Arc<PositionLedger>,
    pretrade: Arc<PreTradeCache>,
    leader_tracker: Arc<LeaderTracker>,
    dedup: Arc<SignatureDedup>,
    leaders_tx: watch::Sender<Vec<Pubkey>>,
    leaders_rx: watch::Receiver<Vec<Pubkey>>,
    health_tx: Mutex<Option<watch::Sender<StreamHealth>>>,
    health_rx: watch::Receiver<StreamHealth>,
    shutdown: Notify,
}

impl CopyEngine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> EngineResult<Arc<Self>> {
        config.validate()?;
        if CryptoProvider::get_default().is_none() {
            let _ = default_provider()
                .install_default()
                .map_err(|e| anyhow::anyhow!("failed to install crypto provider: {e:?}"));
        }

        let config = Arc::new(config);
        let rpc = Arc::new(SolanaRpcClient::new_with_commitment(
            config.rpc_url.clone(),
            config.commitment,
        ));
        let leader_tracker = Arc::new(LeaderTracker::new(rpc.clone()));
        let nonce_cache = Arc::new(NonceCache::new());
        let ledger = Arc::new(PositionLedger::new());
        let pretrade = Arc::new(PreTradeCache::new());
        let dispatcher = Arc::new(Dispatcher::new(
            rpc.clone(),
            leader_tracker.clone(),
            nonce_cache.clone(),
            config.priority_fee.clone(),
            config.compute_unit_default,
            config.block_engine_tip_ratio,
        ));
        let chain = Arc::new(RpcChainLookup::new(rpc.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            collaborators.clone(),
            chain,
            dispatcher,
            ledger.clone(),
            pretrade.clone(),
            nonce_cache,
            rpc.clone(),
        )?);

        let (leaders_tx, leaders_rx) = watch::channel(Vec::new());
        let (health_tx, health_rx) = watch::channel(StreamHealth::Degraded);

        Ok(Arc::new(Self {
            config,
            collaborators,
            rpc,
            orchestrator,
            ledger,
            pretrade,
            leader_tracker,
            dedup: Arc::new(SignatureDedup::new()),
            leaders_tx,
            leaders_rx,
            health_tx: Mutex::new(Some(health_tx)),
            health_rx,
            shutdown: Notify::new(),
        }))
    }

    pub fn positions(&self) -> &Arc<PositionLedger> {
        &self.ledger
    }

    pub fn pretrade_cache(&self) -> &Arc<PreTradeCache> {
        &self.pretrade
    }

    pub fn leader_tracker(&self) -> &Arc<LeaderTracker> {
        &self.leader_tracker
    }

    /// Replaces the tracked leader set; the stream resubscribes on change.
    pub fn set_leaders(&self, leaders: Vec<Pubkey>) {
        self.leaders_tx.send_if_modified(|current| {
            if *current != leaders {
                *current = leaders;
                true
            } else {
                false
            }
        });
    }

    pub fn request_shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Runs the engine until shutdown is requested or the ingress reports a
    /// fatal configuration error. All other failures are contained and
    /// retried internally.
    pub async fn run(self: &Arc<Self>) -> EngineResult<()> {
        let health_tx = self
            .health_tx
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("engine already running"))?;

        self.refresh_leaders().await;

        let (events_tx, mut events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let ingest = StreamIngest::new(
            self.config.clone(),
            self.leaders_rx.clone(),
            health_tx,
            self.dedup.clone(),
            events_tx.clone(),
        );
        let mut ingest_handle = tokio::spawn(ingest.run());

        let poller = FallbackPoller::new(
            self.rpc.clone(),
            self.leaders_rx.clone(),
            self.health_rx.clone(),
            self.dedup.clone(),
            events_tx,
        );
        let poller_handle = tokio::spawn(poller.run());

        let janitor = Janitor::new(
            self.pretrade.clone(),
            self.collaborators.clone(),
            self.config.janitor.clone(),
        );
        let janitor_handle = tokio::spawn(janitor.run());

        let mut leader_refresh =
            tokio::time::interval(Duration::from_millis(LEADER_REFRESH_INTERVAL_MS));
        leader_refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("copy engine running");
        let result = loop {
            tokio::select! {
                maybe_event = events_rx.recv() => match maybe_event {
                    Some(event) => self.orchestrator.handle_event(event).await,
                    None => break Ok(()),
                },
                _ = leader_refresh.tick() => self.refresh_leaders().await,
                ingest_result = &mut ingest_handle => {
                    // Only a fatal credential rejection ends the ingest.
                    break match ingest_result {
                        Ok(result) => result,
                        Err(e) => Err(anyhow::anyhow!("ingest task panicked: {e}").into()),
                    };
                }
                _ = self.shutdown.notified() => break Ok(()),
            }
        };

        // No new events are accepted past this point; in-flight user jobs
        // run to completion on the runtime.
        events_rx.close();
        ingest_handle.abort();
        poller_handle.abort();
        janitor_handle.abort();
        info!("copy engine stopped");
        result
    }

    /// Syncs the tracked leader set from the subscription store.
    async fn refresh_leaders(&self) {
        match self.collaborators.store.active_subscriptions().await {
            Ok(subscriptions) => {
                let mut leaders: Vec<Pubkey> = subscriptions
                    .into_iter()
                    .filter(|sub| sub.active)
                    .map(|sub| sub.leader)
                    .collect();
                leaders.sort();
                leaders.dedup();
                self.set_leaders(leaders);
            }
            Err(e) => warn!("leader refresh failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        ApiManager, Notifier, SellState, TokenMetadata, TradeEvent, TradeRecord, TradeStore,
    };
    use crate::common::{AnyResult, TraderSubscription, UserSettings, WalletHandle};
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct NullApi;

    #[async_trait]
    impl ApiManager for NullApi {
        async fn get_token_prices(
            &self,
            _mints: &[Pubkey],
        ) -> AnyResult<HashMap<Pubkey, f64>> {
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

    struct NullStore;

    #[async_trait]
    impl TradeStore for NullStore {
        async fn active_subscriptions(&self) -> AnyResult<Vec<TraderSubscription>> {
            Ok(vec![])
        }
        async fn user_settings(&self, _chat_id: i64) -> AnyResult<UserSettings> {
            anyhow::bail!("no users")
        }
        async fn signing_wallet(&self, _chat_id: i64, _label: &str) -> AnyResult<WalletHandle> {
            anyhow::bail!("no wallets")
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

    fn collaborators() -> Collaborators {
        Collaborators {
            api: Arc::new(NullApi),
            store: Arc::new(NullStore),
            notifier: Arc::new(NullNotifier),
        }
    }

    #[test]
    fn empty_ingress_endpoint_is_config_fatal() {
        let config = EngineConfig::new("", "http://localhost:8899");
        let err = CopyEngine::new(config, collaborators()).err().unwrap();
        assert!(matches!(err, crate::error::EngineError::ConfigFatal(_)));
    }

    #[test]
    fn engine_constructs_with_valid_config() {
        let config = EngineConfig::new("https://grpc.example.org", "http://localhost:8899");
        let engine = CopyEngine::new(config, collaborators()).unwrap();
        engine.set_leaders(vec![Pubkey::new_unique()]);
        assert!(engine.positions().get(1, &Pubkey::new_unique()).is_none());
    }
}
