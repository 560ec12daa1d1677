//! Observed-fill extraction. After confirmation the transaction meta is the
//! ground truth for what the user actually paid and received; those amounts,
//! not the requested ones, feed the position ledger.

use std::sync::Arc;

use solana_client::rpc_config::RpcTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use solana_transaction_status::UiTransactionEncoding;

use crate::common::{AnyResult, SolanaRpcClient};
use crate::constants::WSOL_MINT;
use crate::streaming::poller::normalize_encoded_transaction;
use crate::streaming::RawTransaction;

/// SOL and token movement observed for one wallet in a confirmed
/// transaction. `sol_delta_lamports` excludes the network fee so it reflects
/// the trade itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedFill {
    pub sol_delta_lamports: i128,
    pub token_delta_raw: i128,
    pub fee_lamports: u64,
    pub slot: u64,
}

pub async fn fetch_observed_fill(
    rpc: &Arc<SolanaRpcClient>,
    signature: &Signature,
    wallet: &Pubkey,
    mint: &Pubkey,
) -> AnyResult<ObservedFill> {
    let config = RpcTransactionConfig {
        encoding: Some(UiTransactionEncoding::Base64),
        commitment: Some(CommitmentConfig::confirmed()),
        max_supported_transaction_version: Some(0),
    };
    let fetched = rpc.get_transaction_with_config(signature, config).await?;
    let tx = normalize_encoded_transaction(&fetched.transaction)?;
    Ok(observe_fill(&tx, wallet, mint, fetched.slot))
}

/// Pure extraction over a normalized transaction; exercised directly by
/// tests.
pub fn observe_fill(
    tx: &RawTransaction,
    wallet: &Pubkey,
    mint: &Pubkey,
    slot: u64,
) -> ObservedFill {
    let wallet_idx = tx.account_index(wallet);
    let mut sol_delta: i128 = match wallet_idx {
        Some(idx) => {
            let pre = tx.pre_balances.get(idx).copied().unwrap_or(0) as i128;
            let post = tx.post_balances.get(idx).copied().unwrap_or(0) as i128;
            post - pre
        }
        None => 0,
    };
    // The fee payer's lamport delta includes the network fee; add it back so
    // the trade-side movement stands alone.
    if wallet_idx == Some(0) {
        sol_delta += tx.fee as i128;
    }

    let mut token_delta: i128 = 0;
    for row in tx.post_token_balances.iter().filter(|row| row.owner == *wallet) {
        let pre = tx
            .pre_token_balances
            .iter()
            .find(|p| p.account_index == row.account_index)
            .map(|p| p.amount_raw as i128)
            .unwrap_or(0);
        let delta = row.amount_raw as i128 - pre;
        if row.mint == *mint {
            token_delta += delta;
        } else if row.mint == WSOL_MINT {
            sol_delta += delta;
        }
    }
    for row in tx.pre_token_balances.iter().filter(|row| row.owner == *wallet) {
        let closed =
            !tx.post_token_balances.iter().any(|p| p.account_index == row.account_index);
        if closed {
            if row.mint == *mint {
                token_delta -= row.amount_raw as i128;
            } else if row.mint == WSOL_MINT {
                sol_delta -= row.amount_raw as i128;
            }
        }
    }

    ObservedFill { sol_delta_lamports: sol_delta, token_delta_raw: token_delta, fee_lamports: tx.fee, slot }
}

/// Sizes a sell from the ledger position: the same fraction of holdings the
/// leader sold, full position when the leader's prior balance is unknown.
pub fn prorated_sell_amount(
    position_amount_raw: u128,
    leader_sold_raw: u64,
    leader_pre_raw: u128,
) -> u64 {
    let amount = if leader_pre_raw == 0 || u128::from(leader_sold_raw) >= leader_pre_raw {
        position_amount_raw
    } else {
        position_amount_raw * u128::from(leader_sold_raw) / leader_pre_raw
    };
    u64::try_from(amount).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::{AccountFlags, RawTokenBalance};

    #[test]
    fn fill_excludes_network_fee() {
        let wallet = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let mut tx = RawTransaction::default();
        tx.account_keys.push(wallet);
        tx.flags.push(AccountFlags { is_signer: true, is_writable: true });
        tx.pre_balances.push(1_000_000_000);
        tx.post_balances.push(989_995_000);
        tx.fee = 5_000;
        tx.post_token_balances.push(RawTokenBalance {
            account_index: 1,
            mint,
            owner: wallet,
            amount_raw: 777,
        });

        let fill = observe_fill(&tx, &wallet, &mint, 42);
        assert_eq!(fill.sol_delta_lamports, -10_000_000);
        assert_eq!(fill.token_delta_raw, 777);
        assert_eq!(fill.fee_lamports, 5_000);
        assert_eq!(fill.slot, 42);
    }

    #[test]
    fn wsol_delta_counts_as_sol() {
        let wallet = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let mut tx = RawTransaction::default();
        tx.account_keys.push(wallet);
        tx.flags.push(AccountFlags { is_signer: true, is_writable: true });
        tx.pre_balances.push(500);
        tx.post_balances.push(500);
        tx.pre_token_balances.push(RawTokenBalance {
            account_index: 2,
            mint: WSOL_MINT,
            owner: wallet,
            amount_raw: 0,
        });
        tx.post_token_balances.push(RawTokenBalance {
            account_index: 2,
            mint: WSOL_MINT,
            owner: wallet,
            amount_raw: 30_000,
        });

        let fill = observe_fill(&tx, &wallet, &mint, 1);
        assert_eq!(fill.sol_delta_lamports, 30_000);
    }

    #[test]
    fn sell_sizing_mirrors_leader_fraction() {
        // Leader sold half; user sells half.
        assert_eq!(prorated_sell_amount(1_000, 50, 100), 500);
        // Unknown leader balance: full position.
        assert_eq!(prorated_sell_amount(1_000, 50, 0), 1_000);
        // Leader dumped everything: full position.
        assert_eq!(prorated_sell_amount(1_000, 100, 100), 1_000);
    }
}
