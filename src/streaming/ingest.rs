//! Leader-activity ingress: a long-lived yellowstone gRPC subscription over
//! the tracked leader set, normalized into [`LeaderTxEvent`]s. Owns the
//! Healthy/Degraded circuit breaker that gates the fallback poller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};
use yellowstone_grpc_client::{ClientTlsConfig, GeyserGrpcClient};
use yellowstone_grpc_proto::prelude::{
    subscribe_update::UpdateOneof, CommitmentLevel, SubscribeRequest,
    SubscribeRequestFilterTransactions, SubscribeUpdateTransactionInfo,
};

use crate::common::{AnyResult, EngineConfig};
use crate::constants::trade::{STREAM_MAX_QUIET_RECONNECTS, STREAM_STALL_THRESHOLD_MS};
use crate::error::{EngineError, EngineResult};
use crate::streaming::dedup::SignatureDedup;
use crate::streaming::{account_flags, LeaderTxEvent, RawInstruction, RawTokenBalance, RawTransaction, StreamHealth};

const MAX_DECODED_MESSAGE_BYTES: usize = 64 * 1024 * 1024;
const TRANSACTION_FILTER_NAME: &str = "master-traders";

pub struct StreamIngest {
    config: Arc<EngineConfig>,
    leaders_rx: watch::Receiver<Vec<Pubkey>>,
    health_tx: watch::Sender<StreamHealth>,
    dedup: Arc<SignatureDedup>,
    events_tx: mpsc::Sender<LeaderTxEvent>,
    last_slot: u64,
}

impl StreamIngest {
    pub fn new(
        config: Arc<EngineConfig>,
        leaders_rx: watch::Receiver<Vec<Pubkey>>,
        health_tx: watch::Sender<StreamHealth>,
        dedup: Arc<SignatureDedup>,
        events_tx: mpsc::Sender<LeaderTxEvent>,
    ) -> Self {
        Self { config, leaders_rx, health_tx, dedup, events_tx, last_slot: 0 }
    }

    /// Runs until the engine shuts down (the events channel closes) or the
    /// ingress credentials are rejected. Transient failures reconnect with
    /// capped exponential backoff and never stop the loop.
    pub async fn run(mut self) -> EngineResult<()> {
        let mut consecutive_failures: u32 = 0;
        let mut attempt: usize = 0;

        loop {
            if self.events_tx.is_closed() {
                return Ok(());
            }

            let endpoint = self.pick_endpoint(attempt);
            attempt += 1;

            let connected_at = tokio::time::Instant::now();
            match self.run_stream(&endpoint).await {
                Ok(StreamExit::Resubscribe) => {
                    consecutive_failures = 0;
                    continue;
                }
                Ok(StreamExit::Shutdown) => return Ok(()),
                Err(EngineError::ConfigFatal(msg)) => {
                    // Bad credentials never get better by retrying.
                    return Err(EngineError::ConfigFatal(msg));
                }
                Err(e) => {
                    // A stream that ran for a while before dropping is not a
                    // failing endpoint; only rapid-fire failures count.
                    if connected_at.elapsed() > Duration::from_secs(60) {
                        consecutive_failures = 0;
                    }
                    consecutive_failures += 1;
                    self.set_health(StreamHealth::Degraded);
                    if consecutive_failures == STREAM_MAX_QUIET_RECONNECTS {
                        error!(
                            failures = consecutive_failures,
                            "stream reconnect budget exhausted, continuing on fallback polling"
                        );
                    } else {
                        warn!(%endpoint, "stream disconnected: {e}");
                    }
                    let backoff = self.backoff_ms(consecutive_failures);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    fn pick_endpoint(&self, attempt: usize) -> String {
        let mut endpoints = Vec::with_capacity(1 + self.config.grpc_fallback_endpoints.len());
        endpoints.push(self.config.grpc_endpoint.clone());
        endpoints.extend(self.config.grpc_fallback_endpoints.iter().cloned());
        endpoints[attempt % endpoints.len()].clone()
    }

    fn backoff_ms(&self, consecutive_failures: u32) -> u64 {
        let exp = consecutive_failures.min(16);
        (1_000u64.saturating_mul(1u64 << exp.min(5))).min(self.config.stream_reconnect_cap_ms)
    }

    fn set_health(&self, health: StreamHealth) {
        self.health_tx.send_if_modified(|current| {
            if *current != health {
                info!(?health, "stream circuit breaker");
                *current = health;
                true
            } else {
                false
            }
        });
    }

    async fn run_stream(&mut self, endpoint: &str) -> EngineResult<StreamExit> {
        // Local clone so the watch borrow does not pin `self` inside select.
        let mut leaders_rx = self.leaders_rx.clone();
        let leaders: Vec<Pubkey> = leaders_rx.borrow_and_update().clone();
        if leaders.is_empty() {
            // Nothing to watch; wait for a subscription change.
            if leaders_rx.changed().await.is_err() {
                return Ok(StreamExit::Shutdown);
            }
            return Ok(StreamExit::Resubscribe);
        }

        let mut client = self.connect(endpoint).await?;
        let request = self.subscribe_request(&leaders);
        let mut stream = client
            .subscribe_once(request)
            .await
            .map_err(|e| EngineError::StreamDisconnected(format!("subscribe: {e}")))?;

        info!(%endpoint, leaders = leaders.len(), "leader transaction stream subscribed");
        let stall = Duration::from_millis(STREAM_STALL_THRESHOLD_MS);
        let mut last_message = Instant::now();

        loop {
            tokio::select! {
                changed = leaders_rx.changed() => {
                    return if changed.is_ok() {
                        debug!("leader set changed, resubscribing");
                        Ok(StreamExit::Resubscribe)
                    } else {
                        Ok(StreamExit::Shutdown)
                    };
                }
                next = timeout(stall, stream.next()) => match next {
                    Ok(Some(Ok(update))) => {
                        last_message = Instant::now();
                        self.set_health(StreamHealth::Healthy);
                        if let Some(update) = update.update_oneof {
                            match update {
                                UpdateOneof::Transaction(txn) => {
                                    self.last_slot = self.last_slot.max(txn.slot);
                                    if let Some(info) = txn.transaction {
                                        self.emit(&leaders, txn.slot, info).await;
                                    }
                                }
                                UpdateOneof::Slot(slot) => {
                                    self.last_slot = self.last_slot.max(slot.slot);
                                }
                                _ => {}
                            }
                        }
                    }
                    Ok(Some(Err(status))) => {
                        if is_auth_failure(&status.to_string()) {
                            return Err(EngineError::ConfigFatal(format!(
                                "ingress rejected credentials: {status}"
                            )));
                        }
                        return Err(EngineError::StreamDisconnected(status.to_string()));
                    }
                    Ok(None) => {
                        return Err(EngineError::StreamDisconnected("stream closed".into()));
                    }
                    Err(_elapsed) => {
                        // Still connected but silent past the threshold.
                        self.set_health(StreamHealth::Degraded);
                        debug!(silent_ms = last_message.elapsed().as_millis() as u64, "stream stalled");
                    }
                }
            }
        }
    }

    async fn connect(&self, endpoint: &str) -> EngineResult<GeyserGrpcClient<impl tonic::service::Interceptor>> {
        let mut builder = GeyserGrpcClient::build_from_shared(endpoint.to_string())
            .map_err(|e| EngineError::StreamDisconnected(format!("endpoint: {e}")))?
            .x_token(self.config.grpc_x_token.clone())
            .map_err(|e| EngineError::ConfigFatal(format!("x-token: {e}")))?
            .max_decoding_message_size(MAX_DECODED_MESSAGE_BYTES)
            .connect_timeout(Duration::from_secs(10))
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Duration::from_secs(15))
            .keep_alive_timeout(Duration::from_secs(10))
            .keep_alive_while_idle(true);
        if endpoint.starts_with("https://") {
            builder = builder
                .tls_config(ClientTlsConfig::new().with_native_roots())
                .map_err(|e| EngineError::StreamDisconnected(format!("tls: {e}")))?;
        }
        builder.connect().await.map_err(|e| {
            let msg = e.to_string();
            if is_auth_failure(&msg) {
                EngineError::ConfigFatal(format!("ingress rejected credentials: {msg}"))
            } else {
                EngineError::StreamDisconnected(format!("connect: {msg}"))
            }
        })
    }

    fn subscribe_request(&self, leaders: &[Pubkey]) -> SubscribeRequest {
        let mut transactions = HashMap::new();
        transactions.insert(
            TRANSACTION_FILTER_NAME.to_string(),
            SubscribeRequestFilterTransactions {
                vote: Some(false),
                failed: Some(false),
                signature: None,
                account_include: leaders.iter().map(|k| k.to_string()).collect(),
                account_exclude: vec![],
                account_required: vec![],
            },
        );
        SubscribeRequest {
            transactions,
            commitment: Some(CommitmentLevel::Processed as i32),
            from_slot: (self.last_slot > 0).then_some(self.last_slot),
            ..Default::default()
        }
    }

    async fn emit(&self, leaders: &[Pubkey], slot: u64, info: SubscribeUpdateTransactionInfo) {
        // Votes and failures are filtered upstream; drop any that slip by.
        if info.is_vote {
            return;
        }
        if info.meta.as_ref().map(|m| m.err.is_some()).unwrap_or(true) {
            return;
        }
        let signature = match Signature::try_from(info.signature.as_slice()) {
            Ok(sig) => sig,
            Err(_) => return,
        };
        let tx = match normalize_geyser_transaction(&info) {
            Ok(tx) => Arc::new(tx),
            Err(e) => {
                warn!(%signature, "dropping unnormalizable transaction: {e}");
                return;
            }
        };
        for leader in leaders {
            if tx.account_index(leader).is_none() {
                continue;
            }
            if !self.dedup.insert(leader, &signature) {
                continue;
            }
            let event = LeaderTxEvent { leader: *leader, signature, slot, tx: tx.clone() };
            if self.events_tx.send(event).await.is_err() {
                return;
            }
        }
    }
}

enum StreamExit {
    Resubscribe,
    Shutdown,
}

fn is_auth_failure(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    lower.contains("unauthenticated")
        || lower.contains("permission denied")
        || lower.contains("invalid x-token")
        || lower.contains("401")
}

/// Normalize a geyser transaction update into the engine's wire-independent
/// shape: full resolved key list, per-key flags, outer and inner
/// instructions, balances and token balances.
pub fn normalize_geyser_transaction(
    info: &SubscribeUpdateTransactionInfo,
) -> AnyResult<RawTransaction> {
    let tx = info.transaction.as_ref().ok_or_else(|| anyhow::anyhow!("missing transaction"))?;
    let message = tx.message.as_ref().ok_or_else(|| anyhow::anyhow!("missing message"))?;
    let meta = info.meta.as_ref().ok_or_else(|| anyhow::anyhow!("missing meta"))?;
    let header = message.header.as_ref().ok_or_else(|| anyhow::anyhow!("missing header"))?;

    let parse_key = |raw: &[u8]| -> AnyResult<Pubkey> {
        Pubkey::try_from(raw).map_err(|_| anyhow::anyhow!("bad pubkey length {}", raw.len()))
    };

    let mut account_keys: Vec<Pubkey> =
        message.account_keys.iter().map(|k| parse_key(k)).collect::<AnyResult<_>>()?;
    let static_len = account_keys.len();
    for key in &meta.loaded_writable_addresses {
        account_keys.push(parse_key(key)?);
    }
    for key in &meta.loaded_readonly_addresses {
        account_keys.push(parse_key(key)?);
    }

    let flags = account_flags(
        static_len,
        header.num_required_signatures as usize,
        header.num_readonly_signed_accounts as usize,
        header.num_readonly_unsigned_accounts as usize,
        meta.loaded_writable_addresses.len(),
        meta.loaded_readonly_addresses.len(),
    );

    let instructions = message
        .instructions
        .iter()
        .map(|ix| RawInstruction {
            program_id_index: ix.program_id_index as usize,
            account_indices: ix.accounts.iter().map(|&i| i as usize).collect(),
            data: ix.data.clone(),
        })
        .collect();

    let mut inner = meta.inner_instructions.clone();
    inner.sort_by_key(|set| set.index);
    let inner_instructions = inner
        .iter()
        .flat_map(|set| set.instructions.iter())
        .map(|ix| RawInstruction {
            program_id_index: ix.program_id_index as usize,
            account_indices: ix.accounts.iter().map(|&i| i as usize).collect(),
            data: ix.data.clone(),
        })
        .collect();

    let token_balances = |rows: &[yellowstone_grpc_proto::prelude::TokenBalance]| -> Vec<RawTokenBalance> {
        rows.iter()
            .filter_map(|row| {
                let amount = row.ui_token_amount.as_ref()?.amount.parse::<u128>().ok()?;
                Some(RawTokenBalance {
                    account_index: row.account_index as usize,
                    mint: row.mint.parse().ok()?,
                    owner: row.owner.parse().ok()?,
                    amount_raw: amount,
                })
            })
            .collect()
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
        log_messages: meta.log_messages.clone(),
        fee: meta.fee,
    })
}
