//! Account-substitution map and the reforging walk. The map rewrites the
//! leader's wallet and token accounts to the user's; every other account is
//! carried over verbatim with the leader's flags, then the platform override
//! tables and PDA re-derivations are applied on top.

use smallvec::SmallVec;
use solana_sdk::{instruction::AccountMeta, pubkey::Pubkey};

use crate::classifier::{CloningTarget, SwapIntent};
use crate::cloning::rules::PlatformRules;
use crate::common::ata::associated_token_address;
use crate::constants::WSOL_MINT;
use crate::error::{EngineError, EngineResult};

/// leader wallet → user wallet, leader ATAs → user ATAs. Nothing else.
#[derive(Debug, Clone)]
pub struct ForgingMap {
    entries: SmallVec<[(Pubkey, Pubkey); 4]>,
}

impl ForgingMap {
    /// Derives the substitution pairs for one intent. Token-account pairs are
    /// derived under the token program that actually owns each mint.
    pub fn build(
        intent: &SwapIntent,
        user: &Pubkey,
        input_token_program: &Pubkey,
        output_token_program: &Pubkey,
    ) -> Self {
        let mut entries = SmallVec::new();
        entries.push((intent.leader, *user));

        if intent.input_mint != WSOL_MINT {
            entries.push((
                associated_token_address(&intent.leader, &intent.input_mint, input_token_program),
                associated_token_address(user, &intent.input_mint, input_token_program),
            ));
        }
        if intent.output_mint != WSOL_MINT {
            entries.push((
                associated_token_address(&intent.leader, &intent.output_mint, output_token_program),
                associated_token_address(user, &intent.output_mint, output_token_program),
            ));
        }
        // AMM-family calls reference the leader's wrapped-SOL account.
        entries.push((
            associated_token_address(&intent.leader, &WSOL_MINT, &crate::constants::TOKEN_PROGRAM),
            associated_token_address(user, &WSOL_MINT, &crate::constants::TOKEN_PROGRAM),
        ));

        Self { entries }
    }

    pub fn resolve(&self, key: &Pubkey) -> Option<Pubkey> {
        self.entries.iter().find(|(from, _)| from == key).map(|(_, to)| *to)
    }
}

/// Walks the cloning target's account list and produces the user-side metas.
///
/// Flag rules, in application order:
/// 1. substituted pubkey, original flags;
/// 2. `is_signer` only for the user wallet or accounts the leader's message
///    already marked signer (CPI-signed PDAs);
/// 3. platform read-only/writable override sets;
/// 4. user-seeded PDA replacement at fixed indices, always writable;
/// 5. the user wallet itself is always writable.
pub fn reforge_accounts(
    target: &CloningTarget,
    map: &ForgingMap,
    user: &Pubkey,
    rules: &PlatformRules,
) -> EngineResult<Vec<AccountMeta>> {
    let mut accounts = Vec::with_capacity(target.accounts.len());
    for original in &target.accounts {
        let pubkey = map.resolve(&original.pubkey).unwrap_or(original.pubkey);
        let is_signer = pubkey == *user || original.is_signer;

        let mut is_writable = original.is_writable;
        if rules.read_only_overrides.contains(&pubkey) {
            is_writable = false;
        }
        if rules.writable_overrides.contains(&pubkey) {
            is_writable = true;
        }
        if pubkey == *user {
            is_writable = true;
        }

        accounts.push(AccountMeta { pubkey, is_signer, is_writable });
    }

    for respec in &rules.pda_respecs {
        if respec.index >= accounts.len() {
            return Err(EngineError::ClonerFatal {
                reason: format!(
                    "pda respec index {} out of bounds ({} accounts)",
                    respec.index,
                    accounts.len()
                ),
            });
        }
        let derived = respec.seed.derive(user).ok_or_else(|| EngineError::ClonerFatal {
            reason: "user-seeded pda underivable".into(),
        })?;
        accounts[respec.index] = AccountMeta { pubkey: derived, is_signer: false, is_writable: true };
    }

    Ok(accounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Platform, TargetAccount, TradeSide};
    use crate::cloning::rules::{rules_for, PdaRespec, UserSeededPda};
    use crate::constants::TOKEN_PROGRAM;

    fn buy_intent(leader: Pubkey, mint: Pubkey, target: CloningTarget) -> SwapIntent {
        SwapIntent {
            leader,
            side: TradeSide::Buy,
            input_mint: WSOL_MINT,
            output_mint: mint,
            platform: Platform::PumpFunBondingCurve,
            cloning_target: target,
            leader_in_amount_raw: 500_000_000,
            leader_out_amount_raw: 12_345_678,
            leader_token_pre_raw: 0,
            nested_target: None,
            cloneable: true,
        }
    }

    #[test]
    fn forging_map_swaps_wallet_and_atas() {
        let leader = Pubkey::new_unique();
        let user = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let target =
            CloningTarget { program_id: Pubkey::new_unique(), accounts: vec![], data: vec![] };
        let intent = buy_intent(leader, mint, target);
        let map = ForgingMap::build(&intent, &user, &TOKEN_PROGRAM, &TOKEN_PROGRAM);

        assert_eq!(map.resolve(&leader), Some(user));
        let leader_ata = associated_token_address(&leader, &mint, &TOKEN_PROGRAM);
        let user_ata = associated_token_address(&user, &mint, &TOKEN_PROGRAM);
        assert_eq!(map.resolve(&leader_ata), Some(user_ata));
        assert_eq!(map.resolve(&Pubkey::new_unique()), None);
    }

    #[test]
    fn only_user_gains_signer_flag() {
        let leader = Pubkey::new_unique();
        let user = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let pool = Pubkey::new_unique();
        let cpi_signed_pda = Pubkey::new_unique();
        let target = CloningTarget {
            program_id: Pubkey::new_unique(),
            accounts: vec![
                TargetAccount { pubkey: leader, is_signer: true, is_writable: true },
                TargetAccount { pubkey: pool, is_signer: false, is_writable: true },
                TargetAccount { pubkey: cpi_signed_pda, is_signer: true, is_writable: false },
            ],
            data: vec![],
        };
        let intent = buy_intent(leader, mint, target);
        let map = ForgingMap::build(&intent, &user, &TOKEN_PROGRAM, &TOKEN_PROGRAM);
        let rules = PlatformRules::default();
        let accounts =
            reforge_accounts(&intent.cloning_target, &map, &user, &rules).unwrap();

        assert_eq!(accounts[0].pubkey, user);
        assert!(accounts[0].is_signer && accounts[0].is_writable);
        assert!(!accounts[1].is_signer);
        // Program-signed PDA keeps its flag without becoming a user key.
        assert_eq!(accounts[2].pubkey, cpi_signed_pda);
        assert!(accounts[2].is_signer);
    }

    #[test]
    fn writable_accounts_stay_writable_unless_overridden() {
        let leader = Pubkey::new_unique();
        let user = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let vault = Pubkey::new_unique();
        let forced_ro = crate::instruction::utils::pumpfun::get_global_pda();
        let target = CloningTarget {
            program_id: Pubkey::new_unique(),
            accounts: vec![
                TargetAccount { pubkey: leader, is_signer: true, is_writable: true },
                TargetAccount { pubkey: vault, is_signer: false, is_writable: true },
                TargetAccount { pubkey: forced_ro, is_signer: false, is_writable: true },
            ],
            data: vec![],
        };
        let intent = buy_intent(leader, mint, target);
        let map = ForgingMap::build(&intent, &user, &TOKEN_PROGRAM, &TOKEN_PROGRAM);
        let rules = rules_for(Platform::PumpFunBondingCurve, TradeSide::Sell);
        let accounts =
            reforge_accounts(&intent.cloning_target, &map, &user, &rules).unwrap();

        assert!(accounts[1].is_writable);
        assert!(!accounts[2].is_writable);
    }

    #[test]
    fn respec_out_of_bounds_is_fatal() {
        let leader = Pubkey::new_unique();
        let user = Pubkey::new_unique();
        let target = CloningTarget {
            program_id: Pubkey::new_unique(),
            accounts: vec![TargetAccount { pubkey: leader, is_signer: true, is_writable: true }],
            data: vec![],
        };
        let intent = buy_intent(leader, Pubkey::new_unique(), target);
        let map = ForgingMap::build(&intent, &user, &TOKEN_PROGRAM, &TOKEN_PROGRAM);
        let mut rules = PlatformRules::default();
        rules.pda_respecs.push(PdaRespec {
            index: 13,
            seed: UserSeededPda::PumpFunUserVolumeAccumulator,
        });

        let err = reforge_accounts(&intent.cloning_target, &map, &user, &rules).unwrap_err();
        assert!(matches!(err, EngineError::ClonerFatal { .. }));
    }
}
