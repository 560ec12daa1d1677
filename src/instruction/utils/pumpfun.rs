//! Pump.fun bonding-curve addresses. PDAs seeded by the signing wallet are
//! the ones the cloner must re-derive per user; the per-mint and per-user
//! derivations sit on the clone hot path and go through a bounded cache.

use clru::CLruCache;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use solana_sdk::pubkey::Pubkey;
use std::num::NonZeroUsize;

const MAX_PDA_CACHE_SIZE: usize = 10_000;

/// Constants used as seeds for deriving PDAs.
pub mod seeds {
    pub const GLOBAL_SEED: &[u8] = b"global";

    pub const BONDING_CURVE_SEED: &[u8] = b"bonding-curve";

    pub const CREATOR_VAULT_SEED: &[u8] = b"creator-vault";

    /// Seed for user volume accumulator PDAs.
    pub const USER_VOLUME_ACCUMULATOR_SEED: &[u8] = b"user_volume_accumulator";

    /// Seed for the global volume accumulator PDA.
    pub const GLOBAL_VOLUME_ACCUMULATOR_SEED: &[u8] = b"global_volume_accumulator";

    pub const FEE_CONFIG_SEED: &[u8] = b"fee_config";
}

pub mod accounts {
    use solana_sdk::{pubkey, pubkey::Pubkey};

    pub use crate::constants::platforms::PUMPFUN;

    /// Authority for program events.
    pub const EVENT_AUTHORITY: Pubkey = pubkey!("Ce6TQqeHC9p8KetsN6JsjHK7UTZk7nasjjnr7XxXp9F1");

    pub const FEE_PROGRAM: Pubkey = pubkey!("pfeeUxB6jkeY1Hxd7CsFCAjcbHA9rWtchMGdZ6VojVZ");

    /// Public key for the global PDA.
    pub const GLOBAL_ACCOUNT: Pubkey = pubkey!("4wTV1YmiEkRvAtNtsSGPtUrqRYQMe5SKy2uB4Jjaxnjf");

    pub const FEE_RECIPIENT: Pubkey = pubkey!("62qc2CNXwrYqQScmEdiZFFAnJR262PxWEuNQtxfafNgV");
}

/// Cache key for the argument-dependent PDA derivations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PdaCacheKey {
    BondingCurve(Pubkey),
    CreatorVault(Pubkey),
    UserVolumeAccumulator(Pubkey),
}

/// Process-wide cache for per-mint and per-user PDAs. One derivation per
/// subscriber per leader signal adds up; the sha256 rounds do not come free.
static PDA_CACHE: Lazy<RwLock<CLruCache<PdaCacheKey, Pubkey>>> =
    Lazy::new(|| RwLock::new(CLruCache::new(NonZeroUsize::new(MAX_PDA_CACHE_SIZE).unwrap())));

fn cached_pda<F>(key: PdaCacheKey, compute: F) -> Option<Pubkey>
where
    F: FnOnce() -> Option<Pubkey>,
{
    {
        let cache = PDA_CACHE.read();
        if let Some(cached) = cache.peek(&key) {
            return Some(*cached);
        }
    }

    let pda = compute()?;

    {
        let mut cache = PDA_CACHE.write();
        cache.put(key, pda);
    }

    Some(pda)
}

#[inline]
pub fn get_global_pda() -> Pubkey {
    static GLOBAL_PDA: Lazy<Pubkey> = Lazy::new(|| {
        Pubkey::find_program_address(&[seeds::GLOBAL_SEED], &accounts::PUMPFUN).0
    });
    *GLOBAL_PDA
}

#[inline]
pub fn get_bonding_curve_pda(mint: &Pubkey) -> Option<Pubkey> {
    cached_pda(PdaCacheKey::BondingCurve(*mint), || {
        let seeds: &[&[u8]; 2] = &[seeds::BONDING_CURVE_SEED, mint.as_ref()];
        Pubkey::try_find_program_address(seeds, &accounts::PUMPFUN).map(|pda| pda.0)
    })
}

#[inline]
pub fn get_creator_vault_pda(creator: &Pubkey) -> Option<Pubkey> {
    cached_pda(PdaCacheKey::CreatorVault(*creator), || {
        let seeds: &[&[u8]; 2] = &[seeds::CREATOR_VAULT_SEED, creator.as_ref()];
        Pubkey::try_find_program_address(seeds, &accounts::PUMPFUN).map(|pda| pda.0)
    })
}

#[inline]
pub fn get_user_volume_accumulator_pda(user: &Pubkey) -> Option<Pubkey> {
    cached_pda(PdaCacheKey::UserVolumeAccumulator(*user), || {
        let seeds: &[&[u8]; 2] = &[seeds::USER_VOLUME_ACCUMULATOR_SEED, user.as_ref()];
        Pubkey::try_find_program_address(seeds, &accounts::PUMPFUN).map(|pda| pda.0)
    })
}

#[inline]
pub fn get_global_volume_accumulator_pda() -> Option<Pubkey> {
    static GLOBAL_VOLUME_PDA: Lazy<Option<Pubkey>> = Lazy::new(|| {
        let seeds: &[&[u8]; 1] = &[seeds::GLOBAL_VOLUME_ACCUMULATOR_SEED];
        Pubkey::try_find_program_address(seeds, &accounts::PUMPFUN).map(|pda| pda.0)
    });
    *GLOBAL_VOLUME_PDA
}

#[inline]
pub fn get_fee_config_pda() -> Option<Pubkey> {
    static FEE_CONFIG_PDA: Lazy<Option<Pubkey>> = Lazy::new(|| {
        let seeds: &[&[u8]; 2] = &[seeds::FEE_CONFIG_SEED, accounts::PUMPFUN.as_ref()];
        Pubkey::try_find_program_address(seeds, &accounts::FEE_PROGRAM).map(|pda| pda.0)
    });
    *FEE_CONFIG_PDA
}
