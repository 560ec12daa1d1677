//! Speculative pre-trade cache. A separate scanner path (an optional
//! collaborator) inserts instruction lists built ahead of a leader signal;
//! the janitor prunes them by market cap and age. Entries are immutable —
//! a read hands out a fresh copy, never a handle into the cache.

pub mod janitor;

use dashmap::DashMap;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey};

use crate::classifier::{Platform, PlatformClass};
use crate::common::JanitorPolicy;

#[derive(Debug, Clone)]
pub struct PreTradeCacheEntry {
    pub mint: Pubkey,
    pub platform: Platform,
    pub built_instructions: Vec<Instruction>,
    pub total_supply: u64,
    pub decimals: u8,
    pub created_at_ms: i64,
    /// Last market cap the janitor computed, SOL. `None` until the first
    /// cycle sees the entry.
    pub last_mcap_sol: Option<f64>,
}

type CacheKey = (Pubkey, Pubkey, Platform);

#[derive(Default)]
pub struct PreTradeCache {
    entries: DashMap<CacheKey, PreTradeCacheEntry>,
}

impl PreTradeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: Pubkey, entry: PreTradeCacheEntry) {
        self.entries.insert((user, entry.mint, entry.platform), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Read path for the cloner: returns the pre-built list only when the
    /// entry would also survive the janitor right now. Stale entries are
    /// never handed out, even if the janitor has not caught up yet.
    pub fn fresh_instructions(
        &self,
        user: &Pubkey,
        mint: &Pubkey,
        platform: Platform,
        policy: &JanitorPolicy,
        now_ms: i64,
    ) -> Option<Vec<Instruction>> {
        let entry = self.entries.get(&(*user, *mint, platform))?;
        match prune_reason(&entry, policy, now_ms) {
            Some(_) => None,
            None => Some(entry.built_instructions.clone()),
        }
    }

    pub(crate) fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(&CacheKey, &mut PreTradeCacheEntry) -> bool,
    {
        self.entries.retain(|key, entry| keep(key, entry));
    }

    pub(crate) fn mints(&self) -> Vec<Pubkey> {
        let mut mints: Vec<Pubkey> = self.entries.iter().map(|e| e.value().mint).collect();
        mints.sort();
        mints.dedup();
        mints
    }
}

/// The platform-class rule table. `None` means the entry stays. Missing
/// market-cap data never prunes; the caller skips the entry for the cycle.
pub(crate) fn prune_reason(
    entry: &PreTradeCacheEntry,
    policy: &JanitorPolicy,
    now_ms: i64,
) -> Option<String> {
    let age_ms = now_ms.saturating_sub(entry.created_at_ms) as u64;
    let mcap = entry.last_mcap_sol?;
    match entry.platform.class() {
        PlatformClass::PumpFun => {
            if mcap < policy.pumpfun_mcap_threshold {
                return Some(format!(
                    "PumpFun MCap {mcap:.0} < {:.0}",
                    policy.pumpfun_mcap_threshold
                ));
            }
        }
        PlatformClass::Launchpad => {
            if age_ms >= policy.launchpad_grace_ms
                && (mcap == 0.0 || mcap < policy.launchpad_mcap_threshold)
            {
                return Some(format!(
                    "Launchpad MCap {mcap:.0} < {:.0}",
                    policy.launchpad_mcap_threshold
                ));
            }
        }
        PlatformClass::GeneralDex => {
            if age_ms >= policy.general_grace_ms && mcap < policy.general_mcap_threshold {
                return Some(format!(
                    "Dex MCap {mcap:.0} < {:.0}",
                    policy.general_mcap_threshold
                ));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(platform: Platform, created_at_ms: i64, mcap: Option<f64>) -> PreTradeCacheEntry {
        PreTradeCacheEntry {
            mint: Pubkey::new_unique(),
            platform,
            built_instructions: vec![Instruction {
                program_id: Pubkey::new_unique(),
                accounts: vec![],
                data: vec![1],
            }],
            total_supply: 1_000_000_000_000_000,
            decimals: 6,
            created_at_ms,
            last_mcap_sol: mcap,
        }
    }

    #[test]
    fn pumpfun_prunes_below_threshold_regardless_of_age() {
        let policy = JanitorPolicy::default();
        let e = entry(Platform::PumpFunBondingCurve, 0, Some(800.0));
        let reason = prune_reason(&e, &policy, 10_000).unwrap();
        assert_eq!(reason, "PumpFun MCap 800 < 1000");
    }

    #[test]
    fn launchpad_grace_period_protects_young_entries() {
        let policy = JanitorPolicy::default();
        let e = entry(Platform::RaydiumLaunchpad, 0, Some(10.0));
        // Inside the five-minute grace.
        assert!(prune_reason(&e, &policy, 60_000).is_none());
        // Past it.
        assert!(prune_reason(&e, &policy, 6 * 60 * 1_000).is_some());
    }

    #[test]
    fn missing_mcap_never_prunes() {
        let policy = JanitorPolicy::default();
        let e = entry(Platform::PumpFunBondingCurve, 0, None);
        assert!(prune_reason(&e, &policy, i64::MAX).is_none());
    }

    #[test]
    fn stale_entry_is_not_served_to_readers() {
        let policy = JanitorPolicy::default();
        let cache = PreTradeCache::new();
        let user = Pubkey::new_unique();
        let healthy = entry(Platform::PumpFunBondingCurve, 0, Some(5_000.0));
        let healthy_mint = healthy.mint;
        cache.insert(user, healthy);
        let doomed = entry(Platform::PumpFunBondingCurve, 0, Some(10.0));
        let doomed_mint = doomed.mint;
        cache.insert(user, doomed);

        assert!(cache
            .fresh_instructions(&user, &healthy_mint, Platform::PumpFunBondingCurve, &policy, 1)
            .is_some());
        assert!(cache
            .fresh_instructions(&user, &doomed_mint, Platform::PumpFunBondingCurve, &policy, 1)
            .is_none());
    }
}
