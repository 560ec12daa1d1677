//! In-memory position ledger, keyed by (user, mint). Updated only on
//! confirmed fills with observed amounts, guarded per key so concurrent
//! fills on the same pair serialize. Best-effort by design: the durable
//! record lives in the external store and the ledger can be rebuilt from it.

use anyhow::anyhow;
use dashmap::DashMap;
use solana_sdk::pubkey::Pubkey;

use crate::common::AnyResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    /// Token base units currently held by the engine for this user.
    pub amount_raw: u128,
    /// Cost basis of the remaining amount, lamports.
    pub sol_spent: u64,
    pub sol_fee_buy: u64,
    pub sol_fee_sell: u64,
}

impl Position {
    pub fn is_closed(&self) -> bool {
        self.amount_raw == 0
    }

    /// Base units to sell for a percentage of the holding (1-100, where
    /// 100 = 100%). Used by operator-triggered partial sells.
    pub fn sell_amount_by_percent(&self, percent: u64) -> AnyResult<u64> {
        if percent == 0 || percent > 100 {
            return Err(anyhow!("Percentage must be between 1 and 100"));
        }
        let amount = self.amount_raw * percent as u128 / 100;
        Ok(u64::try_from(amount).unwrap_or(u64::MAX))
    }
}

/// Result of applying a confirmed sell fill.
#[derive(Debug, Clone, Copy)]
pub struct SellOutcome {
    pub pnl_gross_lamports: i128,
    pub pnl_net_lamports: i128,
    pub closed: bool,
}

#[derive(Default)]
pub struct PositionLedger {
    positions: DashMap<(i64, Pubkey), Position>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chat_id: i64, mint: &Pubkey) -> Option<Position> {
        self.positions.get(&(chat_id, *mint)).map(|p| *p.value())
    }

    /// Seeds a position during rebuild from the trade history.
    pub fn restore(&self, chat_id: i64, mint: &Pubkey, position: Position) {
        self.positions.insert((chat_id, *mint), position);
    }

    /// Confirmed buy fill: grows the position by the observed amounts.
    pub fn apply_buy(
        &self,
        chat_id: i64,
        mint: &Pubkey,
        tokens_received: u128,
        sol_spent: u64,
        fee: u64,
    ) -> Position {
        let mut entry = self.positions.entry((chat_id, *mint)).or_default();
        entry.amount_raw += tokens_received;
        entry.sol_spent = entry.sol_spent.saturating_add(sol_spent);
        entry.sol_fee_buy = entry.sol_fee_buy.saturating_add(fee);
        *entry
    }

    /// Confirmed sell fill. A full-position sell zeroes both `amount_raw`
    /// and `sol_spent`; a partial sell reduces the cost basis pro-rata by
    /// the token fraction sold. The closed position stays in the map for
    /// history.
    pub fn apply_sell(
        &self,
        chat_id: i64,
        mint: &Pubkey,
        tokens_sold: u128,
        sol_received: u64,
        fee: u64,
    ) -> (Position, SellOutcome) {
        let mut entry = self.positions.entry((chat_id, *mint)).or_default();
        let tokens_sold = tokens_sold.min(entry.amount_raw);

        let cost_basis_sold = if entry.amount_raw == 0 {
            0
        } else if tokens_sold == entry.amount_raw {
            entry.sol_spent
        } else {
            ((entry.sol_spent as u128) * tokens_sold / entry.amount_raw) as u64
        };

        entry.sol_fee_sell = entry.sol_fee_sell.saturating_add(fee);
        let pnl_gross = sol_received as i128 - cost_basis_sold as i128;
        let pnl_net =
            pnl_gross - (entry.sol_fee_buy as i128 + entry.sol_fee_sell as i128);

        entry.amount_raw -= tokens_sold;
        entry.sol_spent = entry.sol_spent.saturating_sub(cost_basis_sold);

        let outcome = SellOutcome {
            pnl_gross_lamports: pnl_gross,
            pnl_net_lamports: pnl_net,
            closed: entry.amount_raw == 0,
        };
        (*entry, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buys_accumulate_cost_basis() {
        let ledger = PositionLedger::new();
        let mint = Pubkey::new_unique();
        ledger.apply_buy(1, &mint, 1_000, 500_000_000, 5_000);
        let position = ledger.apply_buy(1, &mint, 500, 250_000_000, 5_000);
        assert_eq!(position.amount_raw, 1_500);
        assert_eq!(position.sol_spent, 750_000_000);
        assert_eq!(position.sol_fee_buy, 10_000);
    }

    #[test]
    fn full_sell_zeroes_position_and_reports_pnl() {
        let ledger = PositionLedger::new();
        let mint = Pubkey::new_unique();
        ledger.apply_buy(1, &mint, 12_345_678, 500_000_000, 0);
        let (position, outcome) = ledger.apply_sell(1, &mint, 12_345_678, 480_000_000, 0);
        assert!(position.is_closed());
        assert_eq!(position.sol_spent, 0);
        assert_eq!(outcome.pnl_gross_lamports, -20_000_000);
        assert!(outcome.closed);
        // Kept for history, readable as closed.
        assert!(ledger.get(1, &mint).unwrap().is_closed());
    }

    #[test]
    fn partial_sell_reduces_basis_pro_rata() {
        let ledger = PositionLedger::new();
        let mint = Pubkey::new_unique();
        ledger.apply_buy(7, &mint, 1_000, 100_000, 0);
        let (position, outcome) = ledger.apply_sell(7, &mint, 250, 40_000, 0);
        assert_eq!(position.amount_raw, 750);
        assert_eq!(position.sol_spent, 75_000);
        assert_eq!(outcome.pnl_gross_lamports, 15_000);
        assert!(!outcome.closed);
    }

    #[test]
    fn oversell_clamps_to_holding() {
        let ledger = PositionLedger::new();
        let mint = Pubkey::new_unique();
        ledger.apply_buy(7, &mint, 100, 1_000, 0);
        let (position, _) = ledger.apply_sell(7, &mint, 500, 2_000, 0);
        assert_eq!(position.amount_raw, 0);
        assert_eq!(position.sol_spent, 0);
    }

    #[test]
    fn sell_amount_by_percent_validates_bounds() {
        let position = Position { amount_raw: 1_000, ..Default::default() };
        assert_eq!(position.sell_amount_by_percent(25).unwrap(), 250);
        assert_eq!(position.sell_amount_by_percent(100).unwrap(), 1_000);
        assert!(position.sell_amount_by_percent(0).is_err());
        assert!(position.sell_amount_by_percent(101).is_err());
    }

    #[test]
    fn net_pnl_subtracts_both_fee_legs() {
        let ledger = PositionLedger::new();
        let mint = Pubkey::new_unique();
        ledger.apply_buy(9, &mint, 100, 1_000_000, 7_000);
        let (_, outcome) = ledger.apply_sell(9, &mint, 100, 1_100_000, 3_000);
        assert_eq!(outcome.pnl_gross_lamports, 100_000);
        assert_eq!(outcome.pnl_net_lamports, 100_000 - 7_000 - 3_000);
    }
}
