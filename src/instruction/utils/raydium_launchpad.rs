//! Raydium Launchpad instruction-data layout. The cloner reuses the leader's
//! account list and only rebuilds the data buffer, so address helpers are not
//! needed here.

/// Instruction discriminators from the launchpad IDL. Only `buy_exact_in`
/// is reconstructed; launchpad sells preserve the leader's data.
pub mod discriminators {
    pub const BUY_EXACT_IN: [u8; 8] = crate::constants::platforms::RAYDIUM_LAUNCHPAD_BUY_DISCRIMINATOR;
}

/// `buy_exact_in` data: discriminator ∥ amount_in ∥ minimum_amount_out ∥
/// share_fee_rate, all u64 little-endian.
pub fn buy_exact_in_data(
    discriminator: [u8; 8],
    amount_in: u64,
    minimum_amount_out: u64,
    share_fee_rate: u64,
) -> Vec<u8> {
    let mut data = Vec::with_capacity(8 + 8 + 8 + 8);
    data.extend_from_slice(&discriminator);
    data.extend_from_slice(&amount_in.to_le_bytes());
    data.extend_from_slice(&minimum_amount_out.to_le_bytes());
    data.extend_from_slice(&share_fee_rate.to_le_bytes());
    data
}

/// Reads the trailing `share_fee_rate` from a leader's `buy_exact_in` data,
/// zero when absent.
pub fn share_fee_rate(leader_data: &[u8]) -> u64 {
    if leader_data.len() >= 32 {
        u64::from_le_bytes(leader_data[24..32].try_into().unwrap())
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_data_layout() {
        let data = buy_exact_in_data(discriminators::BUY_EXACT_IN, 10_000_000, 1, 25);
        assert_eq!(data.len(), 32);
        assert_eq!(&data[0..8], &discriminators::BUY_EXACT_IN);
        assert_eq!(u64::from_le_bytes(data[8..16].try_into().unwrap()), 10_000_000);
        assert_eq!(u64::from_le_bytes(data[16..24].try_into().unwrap()), 1);
        assert_eq!(share_fee_rate(&data), 25);
    }
}
