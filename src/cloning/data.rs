//! Instruction-data policy. Three strategies keyed on (program, side):
//! preserve the leader's bytes, surgically refresh time-sensitive fields in
//! place, or rebuild the buffer from the platform's known layout with the
//! user's economics stamped in.

use crate::classifier::{Platform, TradeSide};
use crate::constants::platforms::{PUMPFUN_BUY_DISCRIMINATOR, PUMPFUN_SELL_DISCRIMINATOR};
use crate::instruction::utils::raydium_launchpad;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStrategy {
    Preserve,
    /// Overwrite a plausible unix-deadline field, keep everything else.
    Surgical,
    Reconstruct(ReconstructKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconstructKind {
    PumpFunBuy,
    PumpFunSell,
    RaydiumLaunchpadBuy,
}

/// Economic inputs for reconstruction. Buys: `amount_in` is lamports.
/// Sells: `amount_in` is token base units and `expected_out` the projected
/// SOL proceeds when the platform state makes them computable.
#[derive(Debug, Clone, Copy)]
pub struct EconomicParams {
    pub amount_in: u64,
    pub slippage_bps: u64,
    pub expected_out: Option<u64>,
}

impl EconomicParams {
    /// `amount * (10000 + slippage) / 10000`, saturating.
    pub fn max_in_with_slippage(&self) -> u64 {
        mul_bps(self.amount_in, 10_000 + self.slippage_bps)
    }

    /// `expected * (10000 - slippage) / 10000`; zero when no projection.
    pub fn min_out_with_slippage(&self) -> u64 {
        mul_bps(self.expected_out.unwrap_or(0), 10_000u64.saturating_sub(self.slippage_bps))
    }
}

fn mul_bps(amount: u64, bps: u64) -> u64 {
    ((amount as u128) * (bps as u128) / 10_000) as u64
}

/// Strategy table. Unrecognized and low-risk programs preserve: their
/// decoding does not depend on who signs.
pub fn strategy_for(platform: Platform, side: TradeSide) -> DataStrategy {
    match (platform, side) {
        (Platform::PumpFunBondingCurve, TradeSide::Buy) => {
            DataStrategy::Reconstruct(ReconstructKind::PumpFunBuy)
        }
        (Platform::PumpFunBondingCurve, TradeSide::Sell) => {
            DataStrategy::Reconstruct(ReconstructKind::PumpFunSell)
        }
        (Platform::RaydiumLaunchpad, TradeSide::Buy) => {
            DataStrategy::Reconstruct(ReconstructKind::RaydiumLaunchpadBuy)
        }
        (Platform::Jupiter, _) => DataStrategy::Surgical,
        _ => DataStrategy::Preserve,
    }
}

/// Applies a strategy to the leader's data. `now_unix` feeds the surgical
/// deadline refresh.
pub fn apply(
    strategy: DataStrategy,
    leader_data: &[u8],
    econ: &EconomicParams,
    now_unix: i64,
) -> Vec<u8> {
    match strategy {
        DataStrategy::Preserve => leader_data.to_vec(),
        DataStrategy::Surgical => refresh_deadline(leader_data, now_unix),
        DataStrategy::Reconstruct(kind) => reconstruct(kind, leader_data, econ),
    }
}

fn reconstruct(kind: ReconstructKind, leader_data: &[u8], econ: &EconomicParams) -> Vec<u8> {
    match kind {
        ReconstructKind::PumpFunBuy => {
            // discriminator ∥ token-amount ∥ max-sol-cost. Loose token bound,
            // tight cost bound.
            let mut data = Vec::with_capacity(24);
            data.extend_from_slice(&leader_discriminator(leader_data, PUMPFUN_BUY_DISCRIMINATOR));
            data.extend_from_slice(&1u64.to_le_bytes());
            data.extend_from_slice(&econ.max_in_with_slippage().to_le_bytes());
            data
        }
        ReconstructKind::PumpFunSell => {
            let mut data = Vec::with_capacity(24);
            data.extend_from_slice(&leader_discriminator(leader_data, PUMPFUN_SELL_DISCRIMINATOR));
            data.extend_from_slice(&econ.amount_in.to_le_bytes());
            data.extend_from_slice(&econ.min_out_with_slippage().to_le_bytes());
            data
        }
        ReconstructKind::RaydiumLaunchpadBuy => raydium_launchpad::buy_exact_in_data(
            leader_discriminator(leader_data, raydium_launchpad::discriminators::BUY_EXACT_IN),
            econ.amount_in,
            1,
            raydium_launchpad::share_fee_rate(leader_data),
        ),
    }
}

/// The leader transaction is the source of truth on which program variant is
/// live; its discriminator wins when present.
fn leader_discriminator(leader_data: &[u8], fallback: [u8; 8]) -> [u8; 8] {
    if leader_data.len() >= 8 {
        leader_data[0..8].try_into().unwrap()
    } else {
        fallback
    }
}

/// Epoch-seconds window treated as "this is a deadline field".
const DEADLINE_MIN: u64 = 1_577_836_800; // 2020-01-01
const DEADLINE_MAX: u64 = 4_102_444_800; // 2100-01-01
const DEADLINE_SLACK_SECONDS: u64 = 60;

/// Finds the first 8-byte little-endian value in a plausible epoch range
/// (past the discriminator) and replaces it with a fresh deadline. Data
/// without such a field passes through unchanged.
fn refresh_deadline(leader_data: &[u8], now_unix: i64) -> Vec<u8> {
    let mut data = leader_data.to_vec();
    if data.len() < 16 || now_unix <= 0 {
        return data;
    }
    for offset in 8..=data.len() - 8 {
        let value = u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap());
        if (DEADLINE_MIN..=DEADLINE_MAX).contains(&value) {
            let fresh = now_unix as u64 + DEADLINE_SLACK_SECONDS;
            data[offset..offset + 8].copy_from_slice(&fresh.to_le_bytes());
            return data;
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_735_689_600; // 2025-01-01

    #[test]
    fn pumpfun_buy_reconstruction_stamps_user_economics() {
        let econ = EconomicParams { amount_in: 10_000_000, slippage_bps: 500, expected_out: None };
        let leader_data = {
            let mut d = PUMPFUN_BUY_DISCRIMINATOR.to_vec();
            d.extend_from_slice(&99u64.to_le_bytes());
            d.extend_from_slice(&77u64.to_le_bytes());
            d
        };
        let data = apply(
            DataStrategy::Reconstruct(ReconstructKind::PumpFunBuy),
            &leader_data,
            &econ,
            NOW,
        );
        assert_eq!(&data[0..8], &PUMPFUN_BUY_DISCRIMINATOR);
        assert_eq!(u64::from_le_bytes(data[8..16].try_into().unwrap()), 1);
        assert_eq!(u64::from_le_bytes(data[16..24].try_into().unwrap()), 10_500_000);
    }

    #[test]
    fn reconstruction_copies_leader_discriminator_variant() {
        let variant = [9u8; 8];
        let econ = EconomicParams { amount_in: 1_000, slippage_bps: 100, expected_out: None };
        let data = apply(
            DataStrategy::Reconstruct(ReconstructKind::PumpFunBuy),
            &variant,
            &econ,
            NOW,
        );
        assert_eq!(&data[0..8], &variant);
    }

    #[test]
    fn pumpfun_sell_uses_expected_proceeds() {
        let econ = EconomicParams {
            amount_in: 12_345_678,
            slippage_bps: 500,
            expected_out: Some(500_000_000),
        };
        let data = apply(
            DataStrategy::Reconstruct(ReconstructKind::PumpFunSell),
            &[],
            &econ,
            NOW,
        );
        assert_eq!(&data[0..8], &PUMPFUN_SELL_DISCRIMINATOR);
        assert_eq!(u64::from_le_bytes(data[8..16].try_into().unwrap()), 12_345_678);
        assert_eq!(u64::from_le_bytes(data[16..24].try_into().unwrap()), 475_000_000);
    }

    #[test]
    fn surgical_refreshes_only_the_deadline_field() {
        let stale_deadline = 1_700_000_000u64;
        let mut data = vec![0xABu8; 8];
        data.extend_from_slice(&42u64.to_le_bytes());
        data.extend_from_slice(&stale_deadline.to_le_bytes());
        let econ = EconomicParams { amount_in: 0, slippage_bps: 0, expected_out: None };

        let out = apply(DataStrategy::Surgical, &data, &econ, NOW);
        assert_eq!(&out[0..8], &data[0..8]);
        assert_eq!(u64::from_le_bytes(out[8..16].try_into().unwrap()), 42);
        assert_eq!(
            u64::from_le_bytes(out[16..24].try_into().unwrap()),
            NOW as u64 + DEADLINE_SLACK_SECONDS
        );
    }

    #[test]
    fn surgical_without_plausible_field_preserves() {
        let mut data = vec![0x11u8; 8];
        data.extend_from_slice(&3u64.to_le_bytes());
        let econ = EconomicParams { amount_in: 0, slippage_bps: 0, expected_out: None };
        assert_eq!(apply(DataStrategy::Surgical, &data, &econ, NOW), data);
    }

    #[test]
    fn launchpad_buy_keeps_leader_share_fee_rate() {
        let leader_data = raydium_launchpad::buy_exact_in_data(
            raydium_launchpad::discriminators::BUY_EXACT_IN,
            5_000_000_000,
            123_456,
            25,
        );
        let econ = EconomicParams { amount_in: 10_000_000, slippage_bps: 500, expected_out: None };
        let data = apply(
            DataStrategy::Reconstruct(ReconstructKind::RaydiumLaunchpadBuy),
            &leader_data,
            &econ,
            NOW,
        );
        assert_eq!(u64::from_le_bytes(data[8..16].try_into().unwrap()), 10_000_000);
        assert_eq!(u64::from_le_bytes(data[16..24].try_into().unwrap()), 1);
        assert_eq!(u64::from_le_bytes(data[24..32].try_into().unwrap()), 25);
    }

    #[test]
    fn preserve_is_verbatim() {
        let data = vec![1, 2, 3, 4];
        let econ = EconomicParams { amount_in: 9, slippage_bps: 9, expected_out: None };
        assert_eq!(apply(DataStrategy::Preserve, &data, &econ, NOW), data);
    }
}
