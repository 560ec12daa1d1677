//! Per-platform reforging rules: writability override sets and the table of
//! signer-seeded PDAs that must be re-derived for the copying user. These
//! tables are configuration shaped as code; the walk that applies them lives
//! in `forging`.

use smallvec::SmallVec;
use solana_sdk::pubkey::Pubkey;

use crate::classifier::{Platform, TradeSide};
use crate::constants::{TOKEN_PROGRAM, TOKEN_PROGRAM_2022};
use crate::instruction::pumpfun::BUY_USER_VOLUME_ACCUMULATOR_INDEX;
use crate::instruction::utils::pumpfun::{
    accounts as pumpfun_accounts, get_fee_config_pda, get_global_pda,
    get_global_volume_accumulator_pda, get_user_volume_accumulator_pda,
};

/// A positional account that must be replaced by a PDA freshly derived for
/// the signing user.
#[derive(Debug, Clone, Copy)]
pub struct PdaRespec {
    pub index: usize,
    pub seed: UserSeededPda,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserSeededPda {
    PumpFunUserVolumeAccumulator,
}

impl UserSeededPda {
    pub fn derive(&self, user: &Pubkey) -> Option<Pubkey> {
        match self {
            UserSeededPda::PumpFunUserVolumeAccumulator => get_user_volume_accumulator_pda(user),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlatformRules {
    /// Accounts forced read-only regardless of the leader's flags.
    pub read_only_overrides: SmallVec<[Pubkey; 4]>,
    /// Accounts forced writable regardless of the leader's flags.
    pub writable_overrides: SmallVec<[Pubkey; 4]>,
    pub pda_respecs: SmallVec<[PdaRespec; 1]>,
}

/// Lookup keyed on (platform, trade side). Unknown platforms get empty rules:
/// the leader's own flags pass through untouched.
pub fn rules_for(platform: Platform, side: TradeSide) -> PlatformRules {
    match platform {
        Platform::PumpFunBondingCurve => pumpfun_rules(side),
        Platform::PumpFunAmm => PlatformRules {
            read_only_overrides: SmallVec::from_slice(&[
                TOKEN_PROGRAM,
                TOKEN_PROGRAM_2022,
                pumpfun_accounts::EVENT_AUTHORITY,
            ]),
            ..Default::default()
        },
        _ => PlatformRules::default(),
    }
}

fn pumpfun_rules(side: TradeSide) -> PlatformRules {
    let mut rules = PlatformRules {
        read_only_overrides: SmallVec::from_slice(&[
            get_global_pda(),
            TOKEN_PROGRAM,
            pumpfun_accounts::EVENT_AUTHORITY,
        ]),
        writable_overrides: SmallVec::from_slice(&[pumpfun_accounts::FEE_RECIPIENT]),
        pda_respecs: SmallVec::new(),
    };
    if let Some(fee_config) = get_fee_config_pda() {
        rules.writable_overrides.push(fee_config);
    }
    if let Some(global_volume) = get_global_volume_accumulator_pda() {
        rules.writable_overrides.push(global_volume);
    }
    if side == TradeSide::Buy {
        rules.pda_respecs.push(PdaRespec {
            index: BUY_USER_VOLUME_ACCUMULATOR_INDEX,
            seed: UserSeededPda::PumpFunUserVolumeAccumulator,
        });
    }
    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pumpfun_buy_re_derives_user_volume_accumulator() {
        let rules = rules_for(Platform::PumpFunBondingCurve, TradeSide::Buy);
        assert_eq!(rules.pda_respecs.len(), 1);
        assert_eq!(rules.pda_respecs[0].index, BUY_USER_VOLUME_ACCUMULATOR_INDEX);

        let user = Pubkey::new_unique();
        let derived = rules.pda_respecs[0].seed.derive(&user).unwrap();
        assert_eq!(derived, get_user_volume_accumulator_pda(&user).unwrap());
        // A different user derives a different accumulator.
        assert_ne!(
            derived,
            rules.pda_respecs[0].seed.derive(&Pubkey::new_unique()).unwrap()
        );
    }

    #[test]
    fn pumpfun_sell_has_no_respec() {
        let rules = rules_for(Platform::PumpFunBondingCurve, TradeSide::Sell);
        assert!(rules.pda_respecs.is_empty());
    }

    #[test]
    fn unknown_platform_rules_are_empty() {
        let rules = rules_for(Platform::Other(Pubkey::new_unique()), TradeSide::Buy);
        assert!(rules.read_only_overrides.is_empty());
        assert!(rules.writable_overrides.is_empty());
    }
}
