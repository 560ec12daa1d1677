//! Signature-polling fallback. Runs only while the stream circuit breaker is
//! `Degraded`; emits the same [`LeaderTxEvent`] shape as the stream so the
//! rest of the engine cannot tell the two apart.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{
    EncodedTransactionWithStatusMeta, UiInstruction, UiTransactionEncoding,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::common::{AnyResult, SolanaRpcClient};
use crate::constants::trade::POLL_INTERVAL_MS;
use crate::streaming::dedup::SignatureDedup;
use crate::streaming::{
    account_flags, LeaderTxEvent, RawInstruction, RawTokenBalance, RawTransaction, StreamHealth,
};

const SIGNATURES_PER_POLL: usize = 25;

pub struct FallbackPoller {
    rpc: Arc<SolanaRpcClient>,
    leaders_rx: watch::Receiver<Vec<Pubkey>>,
    health_rx: watch::Receiver<StreamHealth>,
    dedup: Arc<SignatureDedup>,
    events_tx: mpsc::Sender<LeaderTxEvent>,
    /// Newest signature already handled, per leader.
    high_water: HashMap<Pubkey, Signature>,
}

impl FallbackPoller {
    pub fn new(
        rpc: Arc<SolanaRpcClient>,
        leaders_rx: watch::Receiver<Vec<Pubkey>>,
        health_rx: watch::Receiver<StreamHealth>,
        dedup: Arc<SignatureDedup>,
        events_tx: mpsc::Sender<LeaderTxEvent>,
    ) -> Self {
        Self { rpc, leaders_rx, health_rx, dedup, events_tx, high_water: HashMap::new() }
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(Duration::from_millis(POLL_INTERVAL_MS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut was_active = false;

        loop {
            ticker.tick().await;
            if self.events_tx.is_closed() {
                return;
            }
            let degraded = *self.health_rx.borrow() == StreamHealth::Degraded;
            if !degraded {
                if was_active {
                    info!("stream healthy again, pausing fallback poller");
                    was_active = false;
                }
                continue;
            }
            if !was_active {
                info!("stream degraded, fallback poller active");
                was_active = true;
            }

            let leaders: Vec<Pubkey> = self.leaders_rx.borrow().clone();
            for leader in leaders {
                if let Err(e) = self.poll_leader(&leader).await {
                    warn!(%leader, "fallback poll failed: {e}");
                }
            }
        }
    }

    async fn poll_leader(&mut self, leader: &Pubkey) -> AnyResult<()> {
        let config = GetConfirmedSignaturesForAddress2Config {
            before: None,
            until: self.high_water.get(leader).copied(),
            limit: Some(SIGNATURES_PER_POLL),
            commitment: Some(CommitmentConfig::confirmed()),
        };
        // Newest first.
        let mut statuses =
            self.rpc.get_signatures_for_address_with_config(leader, config).await?;
        if statuses.is_empty() {
            return Ok(());
        }
        let newest = Signature::from_str(&statuses[0].signature)?;

        // Replay oldest-first so downstream sees chain order.
        statuses.reverse();
        for status in statuses {
            if status.err.is_some() {
                continue;
            }
            let signature = Signature::from_str(&status.signature)?;
            if !self.dedup.insert(leader, &signature) {
                continue;
            }
            match self.fetch_event(leader, &signature, status.slot).await {
                Ok(event) => {
                    if self.events_tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => debug!(%signature, "skipping unfetchable transaction: {e}"),
            }
        }

        self.high_water.insert(*leader, newest);
        Ok(())
    }

    async fn fetch_event(
        &self,
        leader: &Pubkey,
        signature: &Signature,
        slot: u64,
    ) -> AnyResult<LeaderTxEvent> {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            commitment: Some(CommitmentConfig::confirmed()),
            max_supported_transaction_version: Some(0),
        };
        let fetched = self.rpc.get_transaction_with_config(signature, config).await?;
        let tx = normalize_encoded_transaction(&fetched.transaction)?;
        Ok(LeaderTxEvent { leader: *leader, signature: *signature, slot, tx: Arc::new(tx) })
    }
}

/// Normalize a JSON-RPC transaction body into [`RawTransaction`].
pub fn normalize_encoded_transaction(
    encoded: &EncodedTransactionWithStatusMeta,
) -> AnyResult<RawTransaction> {
    let tx = encoded
        .transaction
        .decode()
        .ok_or_else(|| anyhow::anyhow!("undecodable transaction body"))?;
    let meta = encoded.meta.as_ref().ok_or_else(|| anyhow::anyhow!("missing meta"))?;
    let message = &tx.message;
    let header = message.header();

    let mut account_keys: Vec<Pubkey> = message.static_account_keys().to_vec();
    let static_len = account_keys.len();
    let (loaded_writable, loaded_readonly) = match &meta.loaded_addresses {
        OptionSerializer::Some(loaded) => (loaded.writable.clone(), loaded.readonly.clone()),
        _ => (vec![], vec![]),
    };
    for key in loaded_writable.iter().chain(loaded_readonly.iter()) {
        account_keys.push(Pubkey::from_str(key)?);
    }

    let flags = account_flags(
        static_len,
        header.num_required_signatures as usize,
        header.num_readonly_signed_accounts as usize,
        header.num_readonly_unsigned_accounts as usize,
        loaded_writable.len(),
        loaded_readonly.len(),
    );

    let instructions = message
        .instructions()
        .iter()
        .map(|ix| RawInstruction {
            program_id_index: ix.program_id_index as usize,
            account_indices: ix.accounts.iter().map(|&i| i as usize).collect(),
            data: ix.data.clone(),
        })
        .collect();

    let mut inner_instructions = Vec::new();
    if let OptionSerializer::Some(sets) = &meta.inner_instructions {
        let mut sets = sets.clone();
        sets.sort_by_key(|set| set.index);
        for set in sets {
            for ix in set.instructions {
                if let UiInstruction::Compiled(compiled) = ix {
                    inner_instructions.push(RawInstruction {
                        program_id_index: compiled.program_id_index as usize,
                        account_indices: compiled.accounts.iter().map(|&i| i as usize).collect(),
                        data: bs58::decode(&compiled.data).into_vec()?,
                    });
                }
            }
        }
    }

    let token_balances = |rows: &OptionSerializer<
        Vec<solana_transaction_status::UiTransactionTokenBalance>,
    >|
     -> Vec<RawTokenBalance> {
        let rows = match rows {
            OptionSerializer::Some(rows) => rows,
            _ => return vec![],
        };
        rows.iter()
            .filter_map(|row| {
                let owner = match &row.owner {
                    OptionSerializer::Some(owner) => Pubkey::from_str(owner).ok()?,
                    _ => return None,
                };
                Some(RawTokenBalance {
                    account_index: row.account_index as usize,
                    mint: Pubkey::from_str(&row.mint).ok()?,
                    owner,
                    amount_raw: row.ui_token_amount.amount.parse().ok()?,
                })
            })
            .collect()
    };

    let log_messages = match &meta.log_messages {
        OptionSerializer::Some(logs) => logs.clone(),
        _ => vec![],
    };

    Ok(RawTransaction {
        account_keys,
        flags,
        instructions,
        inner_instructions,
        pre_balances: meta.pre_balances.clone(),
        post_balances: meta.post_balances.clone(),
        pre_token_balances: token_balances(&meta.pre_token_balances),
        post_token_balances: token_balances(&meta.post_token_balances),
        log_messages,
        fee: meta.fee,
    })
}
