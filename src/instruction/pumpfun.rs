//! Direct pump.fun bonding-curve instruction builders. Used by the cloner's
//! CPI-extraction path: when a leader routed through an aggregator whose real
//! action was a nested pump.fun call, the engine swaps the router call for a
//! first-class pump.fun instruction under the user's wallet.

use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};

use crate::classifier::{CloningTarget, TradeSide};
use crate::common::ata::associated_token_address;
use crate::constants::{SYSTEM_PROGRAM, TOKEN_PROGRAM};
use crate::error::{EngineError, EngineResult};
use crate::instruction::utils::pumpfun::{
    accounts, get_global_pda, get_global_volume_accumulator_pda, get_fee_config_pda,
    get_user_volume_accumulator_pda,
};

/// Positional indices inside a pump.fun buy instruction's account list.
pub const BUY_USER_VOLUME_ACCUMULATOR_INDEX: usize = 13;
const BUY_ACCOUNT_COUNT: usize = 16;
const SELL_ACCOUNT_COUNT: usize = 14;

/// The pool-side accounts a swap needs, lifted from a leader's pump.fun call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpFunSwapAccounts {
    pub mint: Pubkey,
    pub bonding_curve: Pubkey,
    pub creator_vault: Pubkey,
    pub fee_recipient: Pubkey,
}

impl PumpFunSwapAccounts {
    /// Reads the pool accounts out of a leader's (possibly CPI-nested)
    /// pump.fun instruction at their fixed positions.
    pub fn from_cloning_target(target: &CloningTarget, side: TradeSide) -> EngineResult<Self> {
        let (min_len, creator_vault_index) = match side {
            TradeSide::Buy => (BUY_ACCOUNT_COUNT, 9),
            TradeSide::Sell => (SELL_ACCOUNT_COUNT, 8),
        };
        if target.accounts.len() < min_len {
            return Err(EngineError::ClonerFatal {
                reason: format!(
                    "pump.fun {side} call has {} accounts, expected at least {min_len}",
                    target.accounts.len()
                ),
            });
        }
        Ok(Self {
            mint: target.accounts[2].pubkey,
            bonding_curve: target.accounts[3].pubkey,
            creator_vault: target.accounts[creator_vault_index].pubkey,
            fee_recipient: target.accounts[1].pubkey,
        })
    }
}

/// Builds a pump.fun buy under `user`. Data: discriminator ∥ token-amount ∥
/// max-sol-cost, both u64 little-endian.
pub fn build_buy(
    user: &Pubkey,
    swap: &PumpFunSwapAccounts,
    discriminator: [u8; 8],
    token_amount: u64,
    max_sol_cost: u64,
) -> EngineResult<Instruction> {
    let mut data = Vec::with_capacity(8 + 8 + 8);
    data.extend_from_slice(&discriminator);
    data.extend_from_slice(&token_amount.to_le_bytes());
    data.extend_from_slice(&max_sol_cost.to_le_bytes());

    let derive = |pda: Option<Pubkey>, what: &str| {
        pda.ok_or_else(|| EngineError::ClonerFatal { reason: format!("{what} pda underivable") })
    };
    let global_volume = derive(get_global_volume_accumulator_pda(), "global volume accumulator")?;
    let user_volume = derive(get_user_volume_accumulator_pda(user), "user volume accumulator")?;
    let fee_config = derive(get_fee_config_pda(), "fee config")?;

    Ok(Instruction::new_with_bytes(
        accounts::PUMPFUN,
        &data,
        vec![
            AccountMeta::new_readonly(get_global_pda(), false),
            AccountMeta::new(swap.fee_recipient, false),
            AccountMeta::new_readonly(swap.mint, false),
            AccountMeta::new(swap.bonding_curve, false),
            AccountMeta::new(
                associated_token_address(&swap.bonding_curve, &swap.mint, &TOKEN_PROGRAM),
                false,
            ),
            AccountMeta::new(associated_token_address(user, &swap.mint, &TOKEN_PROGRAM), false),
            AccountMeta::new(*user, true),
            AccountMeta::new_readonly(SYSTEM_PROGRAM, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM, false),
            AccountMeta::new(swap.creator_vault, false),
            AccountMeta::new_readonly(accounts::EVENT_AUTHORITY, false),
            AccountMeta::new_readonly(accounts::PUMPFUN, false),
            AccountMeta::new(global_volume, false),
            AccountMeta::new(user_volume, false),
            AccountMeta::new(fee_config, false),
            AccountMeta::new_readonly(accounts::FEE_PROGRAM, false),
        ],
    ))
}

/// Builds a pump.fun sell under `user`. Data: discriminator ∥ token-amount ∥
/// min-sol-output.
pub fn build_sell(
    user: &Pubkey,
    swap: &PumpFunSwapAccounts,
    discriminator: [u8; 8],
    token_amount: u64,
    min_sol_output: u64,
) -> EngineResult<Instruction> {
    let mut data = Vec::with_capacity(8 + 8 + 8);
    data.extend_from_slice(&discriminator);
    data.extend_from_slice(&token_amount.to_le_bytes());
    data.extend_from_slice(&min_sol_output.to_le_bytes());

    let fee_config = get_fee_config_pda()
        .ok_or_else(|| EngineError::ClonerFatal { reason: "fee config pda underivable".into() })?;

    Ok(Instruction::new_with_bytes(
        accounts::PUMPFUN,
        &data,
        vec![
            AccountMeta::new_readonly(get_global_pda(), false),
            AccountMeta::new(swap.fee_recipient, false),
            AccountMeta::new_readonly(swap.mint, false),
            AccountMeta::new(swap.bonding_curve, false),
            AccountMeta::new(
                associated_token_address(&swap.bonding_curve, &swap.mint, &TOKEN_PROGRAM),
                false,
            ),
            AccountMeta::new(associated_token_address(user, &swap.mint, &TOKEN_PROGRAM), false),
            AccountMeta::new(*user, true),
            AccountMeta::new_readonly(SYSTEM_PROGRAM, false),
            AccountMeta::new(swap.creator_vault, false),
            AccountMeta::new_readonly(TOKEN_PROGRAM, false),
            AccountMeta::new_readonly(accounts::EVENT_AUTHORITY, false),
            AccountMeta::new_readonly(accounts::PUMPFUN, false),
            AccountMeta::new(fee_config, false),
            AccountMeta::new_readonly(accounts::FEE_PROGRAM, false),
        ],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::platforms::PUMPFUN_BUY_DISCRIMINATOR;

    #[test]
    fn buy_data_and_signers() {
        let user = Pubkey::new_unique();
        let swap = PumpFunSwapAccounts {
            mint: Pubkey::new_unique(),
            bonding_curve: Pubkey::new_unique(),
            creator_vault: Pubkey::new_unique(),
            fee_recipient: accounts::FEE_RECIPIENT,
        };
        let ix = build_buy(&user, &swap, PUMPFUN_BUY_DISCRIMINATOR, 1, 10_500_000).unwrap();
        assert_eq!(ix.program_id, accounts::PUMPFUN);
        assert_eq!(&ix.data[0..8], &PUMPFUN_BUY_DISCRIMINATOR);
        assert_eq!(u64::from_le_bytes(ix.data[8..16].try_into().unwrap()), 1);
        assert_eq!(u64::from_le_bytes(ix.data[16..24].try_into().unwrap()), 10_500_000);
        let signers: Vec<_> = ix.accounts.iter().filter(|a| a.is_signer).collect();
        assert_eq!(signers.len(), 1);
        assert_eq!(signers[0].pubkey, user);
        // User volume accumulator sits at its fixed index, derived for `user`.
        assert_eq!(
            ix.accounts[BUY_USER_VOLUME_ACCUMULATOR_INDEX].pubkey,
            get_user_volume_accumulator_pda(&user).unwrap()
        );
    }

    #[test]
    fn cpi_target_extraction_checks_length() {
        let target = CloningTarget {
            program_id: accounts::PUMPFUN,
            accounts: vec![],
            data: vec![],
        };
        assert!(PumpFunSwapAccounts::from_cloning_target(&target, TradeSide::Buy).is_err());
    }
}
