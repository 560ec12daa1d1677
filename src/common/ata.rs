use clru::CLruCache;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
};
use spl_associated_token_account::get_associated_token_address_with_program_id;
use std::num::NonZeroUsize;

use crate::constants::{ASSOCIATED_TOKEN_PROGRAM, SYSTEM_PROGRAM};

const MAX_ATA_CACHE_SIZE: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AtaCacheKey {
    wallet: Pubkey,
    mint: Pubkey,
    token_program: Pubkey,
}

/// Process-wide cache of associated-token-account derivations. The sha256
/// behind `find_program_address` is cheap but not free on the hot path.
static ATA_CACHE: Lazy<RwLock<CLruCache<AtaCacheKey, Pubkey>>> =
    Lazy::new(|| RwLock::new(CLruCache::new(NonZeroUsize::new(MAX_ATA_CACHE_SIZE).unwrap())));

/// Cached associated-token-account address for (wallet, mint) under the given
/// token program.
pub fn associated_token_address(wallet: &Pubkey, mint: &Pubkey, token_program: &Pubkey) -> Pubkey {
    let cache_key = AtaCacheKey { wallet: *wallet, mint: *mint, token_program: *token_program };

    {
        let cache = ATA_CACHE.read();
        if let Some(cached) = cache.peek(&cache_key) {
            return *cached;
        }
    }

    let ata = get_associated_token_address_with_program_id(wallet, mint, token_program);

    {
        let mut cache = ATA_CACHE.write();
        cache.put(cache_key, ata);
    }

    ata
}

/// Idempotent ATA-create instruction (discriminator 1), safe to include even
/// when the account already exists.
pub fn create_associated_token_account_idempotent(
    payer: &Pubkey,
    owner: &Pubkey,
    mint: &Pubkey,
    token_program: &Pubkey,
) -> Instruction {
    let ata = associated_token_address(owner, mint, token_program);
    Instruction {
        program_id: ASSOCIATED_TOKEN_PROGRAM,
        accounts: vec![
            AccountMeta::new(*payer, true),
            AccountMeta::new(ata, false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new_readonly(*mint, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM, false),
            AccountMeta::new_readonly(*token_program, false),
        ],
        data: vec![1],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spl_associated_token_account::get_associated_token_address;

    #[test]
    fn cached_derivation_matches_spl() {
        let wallet = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let expected = get_associated_token_address(&wallet, &mint);
        assert_eq!(associated_token_address(&wallet, &mint, &spl_token::ID), expected);
        // Second call hits the cache.
        assert_eq!(associated_token_address(&wallet, &mint, &spl_token::ID), expected);
    }

    #[test]
    fn create_instruction_targets_ata_program() {
        let payer = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let ix = create_associated_token_account_idempotent(&payer, &payer, &mint, &spl_token::ID);
        assert_eq!(ix.program_id, ASSOCIATED_TOKEN_PROGRAM);
        assert_eq!(ix.data, vec![1]);
        assert!(ix.accounts[0].is_signer);
        assert_eq!(ix.accounts[0].pubkey, payer);
    }
}
