use solana_sdk::{pubkey, pubkey::Pubkey};

pub mod platforms;
pub mod trade;

pub const SYSTEM_PROGRAM: Pubkey = solana_sdk::system_program::ID;
pub const SYSTEM_PROGRAM_META: once_cell::sync::Lazy<solana_sdk::instruction::AccountMeta> =
    once_cell::sync::Lazy::new(|| {
        solana_sdk::instruction::AccountMeta::new_readonly(SYSTEM_PROGRAM, false)
    });

pub const TOKEN_PROGRAM: Pubkey = spl_token::ID;
pub const TOKEN_PROGRAM_META: once_cell::sync::Lazy<solana_sdk::instruction::AccountMeta> =
    once_cell::sync::Lazy::new(|| {
        solana_sdk::instruction::AccountMeta::new_readonly(TOKEN_PROGRAM, false)
    });

pub const TOKEN_PROGRAM_2022: Pubkey = spl_token_2022::ID;

pub const ASSOCIATED_TOKEN_PROGRAM: Pubkey = pubkey!("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL");

pub const COMPUTE_BUDGET_PROGRAM: Pubkey = pubkey!("ComputeBudget111111111111111111111111111111");

pub const MEMO_PROGRAM: Pubkey = pubkey!("MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr");

/// Native-SOL mint (wrapped SOL).
pub const WSOL_MINT: Pubkey = pubkey!("So11111111111111111111111111111111111111112");

pub const RENT_SYSVAR: Pubkey = solana_sdk::sysvar::rent::ID;
pub const CLOCK_SYSVAR: Pubkey = solana_sdk::sysvar::clock::ID;

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;
