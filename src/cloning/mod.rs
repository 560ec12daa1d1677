//! Universal instruction cloner: rebuilds a leader's swap instruction for a
//! subscribed user by substituting accounts, re-deriving signer-seeded PDAs,
//! rewriting economics in the data buffer, and synthesizing the prerequisite
//! instructions the user's wallet needs.

pub mod data;
pub mod forging;
pub mod prereq;
pub mod rules;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use tracing::warn;

use crate::classifier::{CloningTarget, Platform, SwapIntent, TradeSide};
use crate::cloning::data::{apply, strategy_for, EconomicParams};
use crate::cloning::forging::{reforge_accounts, ForgingMap};
use crate::cloning::rules::rules_for;
use crate::common::ata::associated_token_address;
use crate::common::{AnyResult, NonceHandle, SolanaRpcClient};
use crate::constants::{TOKEN_PROGRAM, WSOL_MINT};
use crate::error::{EngineError, EngineResult};
use crate::instruction::pumpfun::{self, PumpFunSwapAccounts};

/// The two on-chain lookups the cloner performs. Trait-shaped so tests run
/// against a static map instead of a validator.
#[async_trait]
pub trait ChainLookup: Send + Sync {
    /// Owner program of a mint account (standard SPL vs Token-2022).
    async fn mint_owner_program(&self, mint: &Pubkey) -> AnyResult<Pubkey>;
    async fn account_exists(&self, account: &Pubkey) -> AnyResult<bool>;
}

pub struct RpcChainLookup {
    rpc: Arc<SolanaRpcClient>,
}

impl RpcChainLookup {
    pub fn new(rpc: Arc<SolanaRpcClient>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl ChainLookup for RpcChainLookup {
    async fn mint_owner_program(&self, mint: &Pubkey) -> AnyResult<Pubkey> {
        Ok(self.rpc.get_account(mint).await?.owner)
    }

    async fn account_exists(&self, account: &Pubkey) -> AnyResult<bool> {
        let response = self
            .rpc
            .get_account_with_commitment(
                account,
                solana_sdk::commitment_config::CommitmentConfig::confirmed(),
            )
            .await?;
        Ok(response.value.is_some())
    }
}

#[derive(Clone)]
pub struct CloneRequest<'a> {
    pub intent: &'a SwapIntent,
    pub user: Pubkey,
    /// Lamports for buys; token base units for sells.
    pub amount_in: u64,
    pub slippage_bps: u64,
    pub nonce: Option<&'a NonceHandle>,
    /// Projected SOL proceeds for sells, from the platform state read.
    pub expected_sol_out: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CloneResult {
    pub instructions: Vec<Instruction>,
    pub used_nonce: bool,
}

/// Builds the full per-user instruction list: optional nonce-advance, ATA
/// creation, wrapped-SOL funding, then the reforged swap call. The dispatcher
/// inserts compute-budget instructions between the nonce-advance and the
/// rest.
pub async fn clone_for_user(
    req: &CloneRequest<'_>,
    chain: &dyn ChainLookup,
) -> EngineResult<CloneResult> {
    let intent = req.intent;
    if !intent.cloneable {
        return Err(EngineError::ClonerFatal {
            reason: format!("platform {} is not cloneable", intent.platform),
        });
    }

    // Photon wraps the real swap in a router call; extract the nested leaf
    // and clone that instead. Jupiter replays fine under substitution and is
    // handled by the surgical data strategy.
    let (platform, target) = match (&intent.platform, &intent.nested_target) {
        (Platform::PhotonRouter, Some(nested)) => (nested.platform, &nested.target),
        (Platform::PhotonRouter, None) => {
            return Err(EngineError::ClonerFatal {
                reason: "router call with no recognized nested swap".into(),
            })
        }
        _ => (intent.platform, &intent.cloning_target),
    };

    let input_token_program = token_program_for(chain, &intent.input_mint).await;
    let output_token_program = token_program_for(chain, &intent.output_mint).await;

    let econ = EconomicParams {
        amount_in: req.amount_in,
        slippage_bps: req.slippage_bps,
        expected_out: req.expected_sol_out,
    };

    let swap_instruction = if platform == Platform::PumpFunBondingCurve
        && intent.platform == Platform::PhotonRouter
    {
        // CPI extraction: a first-class pump.fun call replaces the router.
        build_direct_pumpfun(&req.user, intent.side, target, &econ)?
    } else {
        let map =
            ForgingMap::build(intent, &req.user, &input_token_program, &output_token_program);
        let accounts = reforge_accounts(target, &map, &req.user, &rules_for(platform, intent.side))?;
        let data = apply(
            strategy_for(platform, intent.side),
            &target.data,
            &econ,
            chrono::Utc::now().timestamp(),
        );
        Instruction { program_id: target.program_id, accounts, data }
    };

    validate_signers(&swap_instruction, &req.user, target)?;

    let mut instructions = Vec::with_capacity(6);
    if let Some(nonce) = req.nonce {
        instructions.push(prereq::nonce_advance(nonce));
    }

    match intent.side {
        TradeSide::Buy => {
            let user_output_ata =
                associated_token_address(&req.user, &intent.output_mint, &output_token_program);
            if !ata_exists(chain, &user_output_ata).await {
                instructions.push(prereq::create_user_ata(
                    &req.user,
                    &intent.output_mint,
                    &output_token_program,
                ));
            }
            if platform.requires_wrapped_sol() && intent.input_mint == WSOL_MINT {
                instructions.extend(prereq::wrap_sol(&req.user, req.amount_in));
            }
        }
        TradeSide::Sell => {
            let user_input_ata =
                associated_token_address(&req.user, &intent.input_mint, &input_token_program);
            if !ata_exists(chain, &user_input_ata).await {
                instructions.push(prereq::create_user_ata(
                    &req.user,
                    &intent.input_mint,
                    &input_token_program,
                ));
            }
        }
    }

    instructions.push(swap_instruction);

    // Sell proceeds on AMM platforms land as wSOL; unwrap them.
    if intent.side == TradeSide::Sell
        && platform.requires_wrapped_sol()
        && intent.output_mint == WSOL_MINT
    {
        instructions.push(prereq::close_wsol(&req.user));
    }

    Ok(CloneResult { instructions, used_nonce: req.nonce.is_some() })
}

fn build_direct_pumpfun(
    user: &Pubkey,
    side: TradeSide,
    nested: &CloningTarget,
    econ: &EconomicParams,
) -> EngineResult<Instruction> {
    let swap = PumpFunSwapAccounts::from_cloning_target(nested, side)?;
    let discriminator: [u8; 8] = if nested.data.len() >= 8 {
        nested.data[0..8].try_into().unwrap()
    } else {
        match side {
            TradeSide::Buy => crate::constants::platforms::PUMPFUN_BUY_DISCRIMINATOR,
            TradeSide::Sell => crate::constants::platforms::PUMPFUN_SELL_DISCRIMINATOR,
        }
    };
    match side {
        TradeSide::Buy => {
            pumpfun::build_buy(user, &swap, discriminator, 1, econ.max_in_with_slippage())
        }
        TradeSide::Sell => pumpfun::build_sell(
            user,
            &swap,
            discriminator,
            econ.amount_in,
            econ.min_out_with_slippage(),
        ),
    }
}

async fn token_program_for(chain: &dyn ChainLookup, mint: &Pubkey) -> Pubkey {
    if *mint == WSOL_MINT {
        return TOKEN_PROGRAM;
    }
    match chain.mint_owner_program(mint).await {
        Ok(owner) => owner,
        Err(e) => {
            warn!(%mint, "mint owner lookup failed, assuming standard SPL: {e}");
            TOKEN_PROGRAM
        }
    }
}

async fn ata_exists(chain: &dyn ChainLookup, ata: &Pubkey) -> bool {
    match chain.account_exists(ata).await {
        Ok(exists) => exists,
        Err(e) => {
            // The create is idempotent; missing is the safe assumption.
            warn!(%ata, "ata existence check failed, assuming missing: {e}");
            false
        }
    }
}


/// No account may sign except the user wallet and accounts the leader's
/// message already marked as signers (program-signed PDAs).
fn validate_signers(
    instruction: &Instruction,
    user: &Pubkey,
    target: &CloningTarget,
) -> EngineResult<()> {
    let original_signers: HashSet<Pubkey> =
        target.accounts.iter().filter(|a| a.is_signer).map(|a| a.pubkey).collect();
    for account in instruction.accounts.iter().filter(|a| a.is_signer) {
        if account.pubkey != *user && !original_signers.contains(&account.pubkey) {
            return Err(EngineError::ClonerFatal {
                reason: format!("account {} would be upgraded to signer", account.pubkey),
            });
        }
    }
    Ok(())
}
