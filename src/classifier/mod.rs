//! Transaction classifier: turns a leader's raw transaction into a
//! [`SwapIntent`]. Deterministic, allocation-light, and never touches the
//! network — everything it needs is inside [`RawTransaction`].

use solana_sdk::pubkey::Pubkey;

use crate::common::ExtraPrograms;
use crate::constants::{self, platforms};
use crate::streaming::{RawInstruction, RawTransaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    PumpFunBondingCurve,
    PumpFunAmm,
    RaydiumV4,
    RaydiumCpmm,
    RaydiumClmm,
    RaydiumLaunchpad,
    MeteoraDlmm,
    MeteoraDbc,
    MeteoraCpAmm,
    Jupiter,
    PhotonRouter,
    Other(Pubkey),
}

/// Janitor pruning classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformClass {
    PumpFun,
    Launchpad,
    GeneralDex,
}

impl Platform {
    pub fn recognize(program_id: &Pubkey, extras: &ExtraPrograms) -> Option<Platform> {
        const TABLE: [(Pubkey, Platform); 11] = [
            (platforms::PUMPFUN, Platform::PumpFunBondingCurve),
            (platforms::PUMPFUN_AMM, Platform::PumpFunAmm),
            (platforms::RAYDIUM_V4, Platform::RaydiumV4),
            (platforms::RAYDIUM_CPMM, Platform::RaydiumCpmm),
            (platforms::RAYDIUM_CLMM, Platform::RaydiumClmm),
            (platforms::RAYDIUM_LAUNCHPAD, Platform::RaydiumLaunchpad),
            (platforms::METEORA_DLMM, Platform::MeteoraDlmm),
            (platforms::METEORA_DBC, Platform::MeteoraDbc),
            (platforms::METEORA_CP_AMM, Platform::MeteoraCpAmm),
            (platforms::JUPITER, Platform::Jupiter),
            (platforms::PHOTON_ROUTER, Platform::PhotonRouter),
        ];
        if let Some((_, platform)) = TABLE.iter().find(|(id, _)| id == program_id) {
            return Some(*platform);
        }
        if extras.pumpfun.contains(program_id) {
            Some(Platform::PumpFunBondingCurve)
        } else if extras.meteora_dbc.contains(program_id) {
            Some(Platform::MeteoraDbc)
        } else {
            None
        }
    }

    pub fn is_router(&self) -> bool {
        matches!(self, Platform::Jupiter | Platform::PhotonRouter)
    }

    /// AMM-family platforms trade SPL tokens only and need the input funded
    /// as wrapped SOL. Pump.fun's bonding curve takes native lamports.
    pub fn requires_wrapped_sol(&self) -> bool {
        matches!(
            self,
            Platform::PumpFunAmm
                | Platform::RaydiumV4
                | Platform::RaydiumCpmm
                | Platform::RaydiumClmm
                | Platform::RaydiumLaunchpad
                | Platform::MeteoraDlmm
                | Platform::MeteoraDbc
                | Platform::MeteoraCpAmm
                | Platform::Jupiter
        )
    }

    pub fn class(&self) -> PlatformClass {
        match self {
            Platform::PumpFunBondingCurve | Platform::PumpFunAmm => PlatformClass::PumpFun,
            Platform::RaydiumLaunchpad | Platform::MeteoraDbc => PlatformClass::Launchpad,
            _ => PlatformClass::GeneralDex,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Platform::PumpFunBondingCurve => "PumpFun",
            Platform::PumpFunAmm => "PumpFunAmm",
            Platform::RaydiumV4 => "RaydiumV4",
            Platform::RaydiumCpmm => "RaydiumCpmm",
            Platform::RaydiumClmm => "RaydiumClmm",
            Platform::RaydiumLaunchpad => "RaydiumLaunchpad",
            Platform::MeteoraDlmm => "MeteoraDlmm",
            Platform::MeteoraDbc => "MeteoraDbc",
            Platform::MeteoraCpAmm => "MeteoraCpAmm",
            Platform::Jupiter => "Jupiter",
            Platform::PhotonRouter => "Photon",
            Platform::Other(_) => "Other",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Other(program_id) => write!(f, "Other({program_id})"),
            _ => f.write_str(self.label()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TradeSide::Buy => "Buy",
            TradeSide::Sell => "Sell",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetAccount {
    pub pubkey: Pubkey,
    pub is_signer: bool,
    pub is_writable: bool,
}

/// The single instruction selected as the swap call, verbatim.
#[derive(Debug, Clone)]
pub struct CloningTarget {
    pub program_id: Pubkey,
    pub accounts: Vec<TargetAccount>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SwapIntent {
    pub leader: Pubkey,
    pub side: TradeSide,
    pub input_mint: Pubkey,
    pub output_mint: Pubkey,
    pub platform: Platform,
    pub cloning_target: CloningTarget,
    pub leader_in_amount_raw: u64,
    pub leader_out_amount_raw: u64,
    /// Leader's balance of the moved token before the swap; sizes the user's
    /// sell pro-rata to the fraction the leader sold.
    pub leader_token_pre_raw: u128,
    /// When the cloning target is a router call, the first recognized leaf
    /// AMM instruction nested below it. Lets the cloner extract the real
    /// economic action instead of replaying the router.
    pub nested_target: Option<NestedTarget>,
    /// `Other(_)` intents classify but cannot be cloned; the orchestrator
    /// logs and drops them.
    pub cloneable: bool,
}

#[derive(Debug, Clone)]
pub struct NestedTarget {
    pub platform: Platform,
    pub target: CloningTarget,
}

/// `classify(raw_tx, leader) -> Option<SwapIntent>`. Returns `None` when the
/// transaction is not a recognizable swap by `leader`: wrong signer, no SOL
/// leg, more than one token leg, or nothing but scaffolding instructions.
pub fn classify(
    tx: &RawTransaction,
    leader: &Pubkey,
    extras: &ExtraPrograms,
) -> Option<SwapIntent> {
    let leader_idx = tx.account_index(leader)?;
    if !tx.flags.get(leader_idx)?.is_signer {
        return None;
    }

    let (side, token_mint, sol_moved, token_moved) = swap_legs(tx, leader, leader_idx)?;
    let leader_token_pre_raw = tx
        .pre_token_balances
        .iter()
        .filter(|row| row.owner == *leader && row.mint == token_mint)
        .map(|row| row.amount_raw)
        .sum();

    let candidate = select_cloning_target(tx, leader_idx, extras);
    let (instruction, platform) = match candidate {
        Some(found) => found,
        // No recognized program; still classifiable from the balance legs,
        // but not cloneable.
        None => {
            let instruction = first_substantive_instruction(tx, leader_idx)?;
            let program_id = *tx.account_keys.get(instruction.program_id_index)?;
            (instruction, Platform::Other(program_id))
        }
    };
    let cloneable = !matches!(platform, Platform::Other(_));

    let nested_target = if platform.is_router() {
        select_nested_leaf(tx, leader_idx, extras).and_then(|(ix, leaf)| {
            Some(NestedTarget { platform: leaf, target: to_cloning_target(tx, ix)? })
        })
    } else {
        None
    };

    let (input_mint, output_mint, leader_in_amount_raw, leader_out_amount_raw) = match side {
        TradeSide::Buy => (constants::WSOL_MINT, token_mint, sol_moved, token_moved),
        TradeSide::Sell => (token_mint, constants::WSOL_MINT, token_moved, sol_moved),
    };

    Some(SwapIntent {
        leader: *leader,
        side,
        input_mint,
        output_mint,
        platform,
        cloning_target: to_cloning_target(tx, instruction)?,
        leader_in_amount_raw,
        leader_out_amount_raw,
        leader_token_pre_raw,
        nested_target,
        cloneable,
    })
}

/// Determines side and amounts from balance deltas. Exactly one non-SOL mint
/// may move for the leader, opposite in sign to the leader's SOL movement
/// (wrapped-SOL deltas count as SOL).
fn swap_legs(
    tx: &RawTransaction,
    leader: &Pubkey,
    leader_idx: usize,
) -> Option<(TradeSide, Pubkey, u64, u64)> {
    let pre = *tx.pre_balances.get(leader_idx)? as i128;
    let post = *tx.post_balances.get(leader_idx)? as i128;
    let mut sol_delta = post - pre;

    let mut token_delta: i128 = 0;
    let mut token_mint: Option<Pubkey> = None;
    for (mint, delta) in leader_token_deltas(tx, leader) {
        if delta == 0 {
            continue;
        }
        if mint == constants::WSOL_MINT {
            sol_delta += delta;
            continue;
        }
        match token_mint {
            None => {
                token_mint = Some(mint);
                token_delta = delta;
            }
            // Token-to-token swap or liquidity action: neither side is
            // plainly native SOL.
            Some(existing) if existing != mint => return None,
            Some(_) => token_delta += delta,
        }
    }

    let token_mint = token_mint?;
    let side = if token_delta > 0 && sol_delta < 0 {
        TradeSide::Buy
    } else if token_delta < 0 && sol_delta > 0 {
        TradeSide::Sell
    } else {
        return None;
    };

    let sol_moved = u64::try_from(sol_delta.unsigned_abs()).ok()?;
    let token_moved = u64::try_from(token_delta.unsigned_abs()).ok()?;
    Some((side, token_mint, sol_moved, token_moved))
}

/// Net per-mint token movement for accounts owned by `owner`.
fn leader_token_deltas<'a>(
    tx: &'a RawTransaction,
    owner: &'a Pubkey,
) -> impl Iterator<Item = (Pubkey, i128)> + 'a {
    let mut deltas: Vec<(Pubkey, i128)> = Vec::new();
    for row in tx.post_token_balances.iter().filter(|row| row.owner == *owner) {
        let pre = tx
            .pre_token_balances
            .iter()
            .find(|p| p.account_index == row.account_index)
            .map(|p| p.amount_raw as i128)
            .unwrap_or(0);
        accumulate(&mut deltas, row.mint, row.amount_raw as i128 - pre);
    }
    // Accounts emptied and closed only show up in the pre side.
    for row in tx.pre_token_balances.iter().filter(|row| row.owner == *owner) {
        let has_post =
            tx.post_token_balances.iter().any(|p| p.account_index == row.account_index);
        if !has_post {
            accumulate(&mut deltas, row.mint, -(row.amount_raw as i128));
        }
    }
    deltas.into_iter()
}

fn accumulate(deltas: &mut Vec<(Pubkey, i128)>, mint: Pubkey, delta: i128) {
    match deltas.iter_mut().find(|(m, _)| *m == mint) {
        Some((_, existing)) => *existing += delta,
        None => deltas.push((mint, delta)),
    }
}

/// First recognized instruction whose account set includes the leader as a
/// signer. Routers are top-level, so the outer router call wins over its
/// nested leaf AMM calls; when no top-level instruction is recognized, the
/// first recognized non-router inner instruction is the candidate.
fn select_cloning_target<'a>(
    tx: &'a RawTransaction,
    leader_idx: usize,
    extras: &ExtraPrograms,
) -> Option<(&'a RawInstruction, Platform)> {
    for ix in &tx.instructions {
        if !ix.account_indices.contains(&leader_idx) {
            continue;
        }
        let program_id = tx.account_keys.get(ix.program_id_index)?;
        if let Some(platform) = Platform::recognize(program_id, extras) {
            return Some((ix, platform));
        }
    }
    select_nested_leaf(tx, leader_idx, extras)
}

/// First recognized non-router inner instruction with the leader in its
/// account set.
fn select_nested_leaf<'a>(
    tx: &'a RawTransaction,
    leader_idx: usize,
    extras: &ExtraPrograms,
) -> Option<(&'a RawInstruction, Platform)> {
    for ix in &tx.inner_instructions {
        if !ix.account_indices.contains(&leader_idx) {
            continue;
        }
        let program_id = tx.account_keys.get(ix.program_id_index)?;
        if let Some(platform) = Platform::recognize(program_id, extras) {
            if !platform.is_router() {
                return Some((ix, platform));
            }
        }
    }
    None
}

/// First top-level instruction signed by the leader that is not scaffolding
/// (compute budget, ATA create, token, system, memo, sync-native).
fn first_substantive_instruction<'a>(
    tx: &'a RawTransaction,
    leader_idx: usize,
) -> Option<&'a RawInstruction> {
    tx.instructions.iter().find(|ix| {
        let program_id = match tx.account_keys.get(ix.program_id_index) {
            Some(key) => key,
            None => return false,
        };
        !is_scaffolding_program(program_id) && ix.account_indices.contains(&leader_idx)
    })
}

fn is_scaffolding_program(program_id: &Pubkey) -> bool {
    *program_id == constants::COMPUTE_BUDGET_PROGRAM
        || *program_id == constants::SYSTEM_PROGRAM
        || *program_id == constants::TOKEN_PROGRAM
        || *program_id == constants::TOKEN_PROGRAM_2022
        || *program_id == constants::ASSOCIATED_TOKEN_PROGRAM
        || *program_id == constants::MEMO_PROGRAM
}

pub(crate) fn to_cloning_target(tx: &RawTransaction, ix: &RawInstruction) -> Option<CloningTarget> {
    let program_id = *tx.account_keys.get(ix.program_id_index)?;
    let mut accounts = Vec::with_capacity(ix.account_indices.len());
    for &idx in &ix.account_indices {
        let pubkey = *tx.account_keys.get(idx)?;
        let flags = *tx.flags.get(idx)?;
        accounts.push(TargetAccount {
            pubkey,
            is_signer: flags.is_signer,
            is_writable: flags.is_writable,
        });
    }
    Some(CloningTarget { program_id, accounts, data: ix.data.clone() })
}
