//! Submission dispatcher: compute-budget injection, priority-fee policy,
//! blockhash or durable-nonce acquisition, signing, direct send with
//! preflight skipped, and a bounded confirmation wait.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use rand::seq::IndexedRandom;
use smallvec::SmallVec;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    compute_budget::ComputeBudgetInstruction,
    instruction::Instruction,
    message::{v0, VersionedMessage},
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::VersionedTransaction,
};
use solana_system_interface::instruction::transfer;
use solana_transaction_status::TransactionConfirmationStatus;
use tracing::{debug, warn};

use crate::cloning::CloneResult;
use crate::common::nonce_cache::NonceCache;
use crate::common::{NonceHandle, PriorityFeePolicy, SolanaRpcClient};
use crate::constants::platforms::BLOCK_ENGINE_TIP_ACCOUNTS;
use crate::constants::{trade, COMPUTE_BUDGET_PROGRAM};
use crate::error::{EngineError, EngineResult};
use crate::streaming::RawTransaction;
use crate::trading::leader_tracker::LeaderTracker;

pub struct DispatchRequest {
    pub clone: CloneResult,
    pub payer: Arc<Keypair>,
    pub nonce: Option<NonceHandle>,
    /// Compute-unit limit lifted from the leader's transaction, when present.
    pub leader_compute_unit_limit: Option<u32>,
    /// SOL committed to this trade, drives the priority-fee policy.
    pub sol_amount: u64,
}

#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub signature: Signature,
    pub slot: Option<u64>,
    pub latency_ms: u64,
}

pub struct Dispatcher {
    rpc: Arc<SolanaRpcClient>,
    leader_tracker: Arc<LeaderTracker>,
    nonce_cache: Arc<NonceCache>,
    fee_policy: PriorityFeePolicy,
    compute_unit_default: u32,
    tip_ratio: Option<f64>,
}

impl Dispatcher {
    pub fn new(
        rpc: Arc<SolanaRpcClient>,
        leader_tracker: Arc<LeaderTracker>,
        nonce_cache: Arc<NonceCache>,
        fee_policy: PriorityFeePolicy,
        compute_unit_default: u32,
        tip_ratio: Option<f64>,
    ) -> Self {
        Self { rpc, leader_tracker, nonce_cache, fee_policy, compute_unit_default, tip_ratio }
    }

    /// Assembles, signs, submits and confirms one transaction. Instruction
    /// order: nonce-advance (if any), compute-unit limit, compute-unit price,
    /// then the cloned list, then the optional block-engine tip.
    pub async fn dispatch(&self, req: DispatchRequest) -> EngineResult<DispatchOutcome> {
        let started = Instant::now();
        let payer_pubkey = req.payer.pubkey();

        let mut body = req.clone.instructions.clone();
        let mut instructions = Vec::with_capacity(body.len() + 3);
        if req.clone.used_nonce && !body.is_empty() {
            instructions.push(body.remove(0));
        }
        let unit_limit = req.leader_compute_unit_limit.unwrap_or(self.compute_unit_default);
        let unit_price = self.fee_policy.unit_price(req.sol_amount);
        instructions.extend(compute_budget_instructions(unit_limit, unit_price).into_iter());
        instructions.extend(body);
        if let Some(tip) = self.tip_lamports(req.sol_amount) {
            if let Some(tip_account) = BLOCK_ENGINE_TIP_ACCOUNTS.choose(&mut rand::rng()) {
                instructions.push(transfer(&payer_pubkey, tip_account, tip));
            }
        }

        let (blockhash, nonce_account) = match (&req.nonce, req.clone.used_nonce) {
            (Some(nonce), true) => {
                let value = self.nonce_cache.acquire(&nonce.nonce_account).ok_or_else(|| {
                    EngineError::DispatchTransient("nonce value not ready".into())
                })?;
                (value, Some(nonce.nonce_account))
            }
            _ => {
                let (hash, _) = self
                    .rpc
                    .get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())
                    .await
                    .map_err(|e| EngineError::DispatchTransient(format!("blockhash: {e}")))?;
                (hash, None)
            }
        };

        let message = v0::Message::try_compile(&payer_pubkey, &instructions, &[], blockhash)
            .map_err(|e| EngineError::ClonerFatal { reason: format!("message compile: {e}") })?;
        let transaction = self
            .sign(message, &req)
            .map_err(|e| EngineError::ClonerFatal { reason: format!("signing: {e}") })?;

        let signature = match self.send_with_retry(&transaction).await {
            Ok(signature) => signature,
            Err(e) => {
                if let Some(nonce_account) = nonce_account {
                    // Nothing reached the wire; the nonce value is still good.
                    self.nonce_cache.release(&nonce_account);
                }
                return Err(e);
            }
        };

        let outcome = self.await_confirmation(signature).await?;
        if let Some(nonce_account) = nonce_account {
            self.nonce_cache.refresh(&self.rpc, &nonce_account).await;
        }
        Ok(DispatchOutcome {
            signature: outcome.0,
            slot: outcome.1,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }

    fn tip_lamports(&self, sol_amount: u64) -> Option<u64> {
        let ratio = self.tip_ratio?;
        let tip = (sol_amount as f64 * ratio) as u64;
        (tip > 0).then_some(tip)
    }

    fn sign(
        &self,
        message: v0::Message,
        req: &DispatchRequest,
    ) -> anyhow::Result<VersionedTransaction> {
        let versioned = VersionedMessage::V0(message);
        let payer = req.payer.as_ref();
        let transaction = match &req.nonce {
            Some(nonce) if nonce.authority.pubkey() != payer.pubkey() && req.clone.used_nonce => {
                VersionedTransaction::try_new(versioned, &[payer, nonce.authority.as_ref()])?
            }
            _ => VersionedTransaction::try_new(versioned, &[payer])?,
        };
        Ok(transaction)
    }

    /// Direct send, preflight off, RPC-side retries off — the dispatcher owns
    /// retry. Up to five attempts with bounded exponential backoff.
    async fn send_with_retry(
        &self,
        transaction: &VersionedTransaction,
    ) -> EngineResult<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            max_retries: Some(0),
            ..Default::default()
        };
        let mut backoff = trade::DISPATCH_BACKOFF_MIN_MS;
        let mut last_error = String::new();
        for attempt in 0..trade::DISPATCH_MAX_SEND_RETRIES {
            let client = self.leader_tracker.client_for_current_leader();
            match client.send_transaction_with_config(transaction, config).await {
                Ok(signature) => return Ok(signature),
                Err(e) => {
                    last_error = e.to_string();
                    debug!(attempt, "send failed: {last_error}");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    backoff = (backoff * 2).min(trade::DISPATCH_BACKOFF_MAX_MS);
                }
            }
        }
        Err(EngineError::DispatchTransient(last_error))
    }

    /// Polls signature status until the confirmed commitment or the hard
    /// deadline. A timeout is not a failure: the transaction may still land.
    async fn await_confirmation(
        &self,
        signature: Signature,
    ) -> EngineResult<(Signature, Option<u64>)> {
        let deadline = Instant::now() + Duration::from_millis(trade::CONFIRMATION_TIMEOUT_MS);
        loop {
            if Instant::now() >= deadline {
                return Err(EngineError::DispatchTimeout { signature: signature.to_string() });
            }
            match self.rpc.get_signature_statuses(&[signature]).await {
                Ok(response) => {
                    if let Some(Some(status)) = response.value.into_iter().next() {
                        if let Some(err) = status.err {
                            return Err(EngineError::DispatchOnChainFail {
                                signature: signature.to_string(),
                                err: err.to_string(),
                            });
                        }
                        let confirmed = matches!(
                            status.confirmation_status,
                            Some(
                                TransactionConfirmationStatus::Confirmed
                                    | TransactionConfirmationStatus::Finalized
                            )
                        );
                        if confirmed {
                            return Ok((signature, Some(status.slot)));
                        }
                    }
                }
                Err(e) => warn!("status poll failed: {e}"),
            }
            tokio::time::sleep(Duration::from_millis(400)).await;
        }
    }
}

/// Cached unit-limit/unit-price pair. Fee tiers repeat heavily across a
/// fleet of users trading the same sizes, so the pair is built once per
/// (limit, price).
fn compute_budget_instructions(unit_limit: u32, unit_price: u64) -> SmallVec<[Instruction; 2]> {
    static COMPUTE_BUDGET_CACHE: Lazy<DashMap<(u32, u64), SmallVec<[Instruction; 2]>>> =
        Lazy::new(DashMap::new);

    if let Some(cached) = COMPUTE_BUDGET_CACHE.get(&(unit_limit, unit_price)) {
        return cached.clone();
    }
    let mut insts = SmallVec::new();
    insts.push(ComputeBudgetInstruction::set_compute_unit_limit(unit_limit));
    insts.push(ComputeBudgetInstruction::set_compute_unit_price(unit_price));
    COMPUTE_BUDGET_CACHE.insert((unit_limit, unit_price), insts.clone());
    insts
}

/// Compute-unit limit carried by the leader's transaction, when it set one.
/// `SetComputeUnitLimit` is compute-budget instruction tag 2 with a u32
/// little-endian argument.
pub fn leader_compute_unit_limit(tx: &RawTransaction) -> Option<u32> {
    for ix in &tx.instructions {
        let program_id = tx.account_keys.get(ix.program_id_index)?;
        if *program_id != COMPUTE_BUDGET_PROGRAM {
            continue;
        }
        if ix.data.len() >= 5 && ix.data[0] == 2 {
            return Some(u32::from_le_bytes(ix.data[1..5].try_into().ok()?));
        }
    }
    None
}

/// Quick structural check used by tests and the orchestrator's debug
/// assertions: exactly one unit-limit and one unit-price instruction, both
/// before any non-compute-budget, non-nonce instruction.
pub fn compute_budget_well_placed(instructions: &[Instruction]) -> bool {
    let mut seen_body = false;
    let mut limits = 0;
    let mut prices = 0;
    for ix in instructions {
        if ix.program_id == COMPUTE_BUDGET_PROGRAM {
            if seen_body {
                return false;
            }
            match ix.data.first() {
                Some(2) => limits += 1,
                Some(3) => prices += 1,
                _ => {}
            }
        } else if ix.program_id == crate::constants::SYSTEM_PROGRAM && !seen_body && limits == 0 {
            // Leading nonce-advance is allowed ahead of the budget pair.
            continue;
        } else {
            seen_body = true;
        }
    }
    limits == 1 && prices == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{AccountFlags, RawInstruction};
    use solana_sdk::pubkey::Pubkey;

    #[test]
    fn leader_unit_limit_is_extracted() {
        let mut tx = RawTransaction::default();
        tx.account_keys.push(COMPUTE_BUDGET_PROGRAM);
        tx.flags.push(AccountFlags { is_signer: false, is_writable: false });
        let mut data = vec![2u8];
        data.extend_from_slice(&400_000u32.to_le_bytes());
        tx.instructions.push(RawInstruction {
            program_id_index: 0,
            account_indices: vec![],
            data,
        });
        assert_eq!(leader_compute_unit_limit(&tx), Some(400_000));
    }

    #[test]
    fn missing_budget_instruction_yields_none() {
        let tx = RawTransaction::default();
        assert_eq!(leader_compute_unit_limit(&tx), None);
    }

    #[test]
    fn budget_pair_placement_check() {
        let limit = ComputeBudgetInstruction::set_compute_unit_limit(1_200_000);
        let price = ComputeBudgetInstruction::set_compute_unit_price(1_000_000);
        let body = Instruction {
            program_id: Pubkey::new_unique(),
            accounts: vec![],
            data: vec![1],
        };
        assert!(compute_budget_well_placed(&[limit.clone(), price.clone(), body.clone()]));
        assert!(!compute_budget_well_placed(&[body.clone(), limit.clone(), price.clone()]));
        assert!(!compute_budget_well_placed(&[limit.clone(), body, price]));
    }

    #[test]
    fn budget_pair_is_cached_and_stable() {
        let first = compute_budget_instructions(1_200_000, 150_000);
        let second = compute_budget_instructions(1_200_000, 150_000);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].data, second[0].data);
        assert_eq!(first[1].data, second[1].data);
        assert_eq!(first[0].data[0], 2); // SetComputeUnitLimit
        assert_eq!(first[1].data[0], 3); // SetComputeUnitPrice
    }

    #[test]
    fn fee_policy_cap_applies() {
        let policy = PriorityFeePolicy::default();
        // 0.01 SOL trade → 1.5M micro-lamports uncapped, capped to 1M.
        assert_eq!(policy.unit_price(10_000_000), 1_000_000);
        assert_eq!(policy.unit_price(1_000_000), 150_000);
    }
}
