//! Prerequisite instruction synthesis: durable-nonce advance, user ATA
//! creation, and wrapped-SOL funding for AMM-family swaps.

use smallvec::SmallVec;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};
use solana_system_interface::instruction::{advance_nonce_account, transfer};
use spl_token::instruction::{close_account, sync_native};

use crate::common::ata::{associated_token_address, create_associated_token_account_idempotent};
use crate::common::NonceHandle;
use crate::constants::{TOKEN_PROGRAM, WSOL_MINT};
use solana_sdk::signer::Signer;

pub fn nonce_advance(nonce: &NonceHandle) -> Instruction {
    advance_nonce_account(&nonce.nonce_account, &nonce.authority.pubkey())
}

pub fn create_user_ata(user: &Pubkey, mint: &Pubkey, token_program: &Pubkey) -> Instruction {
    create_associated_token_account_idempotent(user, user, mint, token_program)
}

/// Funds the user's wrapped-SOL account with exactly `lamports`:
/// idempotent ATA create, system transfer, sync-native. AMM programs require
/// the account to actually hold the funds, so this sequence is emitted even
/// when the ATA already exists.
pub fn wrap_sol(user: &Pubkey, lamports: u64) -> SmallVec<[Instruction; 3]> {
    let wsol_account = associated_token_address(user, &WSOL_MINT, &TOKEN_PROGRAM);
    let mut insts = SmallVec::new();
    insts.push(create_user_ata(user, &WSOL_MINT, &TOKEN_PROGRAM));
    insts.push(transfer(user, &wsol_account, lamports));
    insts.push(
        sync_native(&TOKEN_PROGRAM, &wsol_account)
            .expect("sync_native with the canonical token program id"),
    );
    insts
}

/// Unwraps wSOL proceeds back to native SOL after an AMM sell.
pub fn close_wsol(user: &Pubkey) -> Instruction {
    let wsol_account = associated_token_address(user, &WSOL_MINT, &TOKEN_PROGRAM);
    close_account(&TOKEN_PROGRAM, &wsol_account, user, user, &[])
        .expect("close_account with the canonical token program id")
}
