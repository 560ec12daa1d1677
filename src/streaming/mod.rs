pub mod dedup;
pub mod ingest;
pub mod poller;

use std::sync::Arc;

use solana_sdk::{pubkey::Pubkey, signature::Signature};

/// Signer/writability of one resolved account key within a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountFlags {
    pub is_signer: bool,
    pub is_writable: bool,
}

/// One compiled instruction, indices into the resolved account-key list.
#[derive(Debug, Clone)]
pub struct RawInstruction {
    pub program_id_index: usize,
    pub account_indices: Vec<usize>,
    pub data: Vec<u8>,
}

/// A pre/post token balance row from transaction meta.
#[derive(Debug, Clone)]
pub struct RawTokenBalance {
    pub account_index: usize,
    pub mint: Pubkey,
    pub owner: Pubkey,
    pub amount_raw: u128,
}

/// A leader transaction, normalized far enough to reproduce any instruction
/// it executed. `account_keys` is the full ordered list: static keys, then
/// looked-up writable, then looked-up readonly.
#[derive(Debug, Clone, Default)]
pub struct RawTransaction {
    pub account_keys: Vec<Pubkey>,
    pub flags: Vec<AccountFlags>,
    /// Top-level instructions, in execution order.
    pub instructions: Vec<RawInstruction>,
    /// CPI instructions from meta, flattened in execution order.
    pub inner_instructions: Vec<RawInstruction>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub pre_token_balances: Vec<RawTokenBalance>,
    pub post_token_balances: Vec<RawTokenBalance>,
    pub log_messages: Vec<String>,
    pub fee: u64,
}

impl RawTransaction {
    pub fn account_index(&self, key: &Pubkey) -> Option<usize> {
        self.account_keys.iter().position(|k| k == key)
    }
}

/// Normalized leader activity, the unit of work for the classifier. One
/// transaction touching several tracked leaders yields one event per leader.
#[derive(Debug, Clone)]
pub struct LeaderTxEvent {
    pub leader: Pubkey,
    pub signature: Signature,
    pub slot: u64,
    pub tx: Arc<RawTransaction>,
}

/// Circuit-breaker state owned by the stream ingest. `Degraded` starts the
/// fallback poller; returning to `Healthy` stops it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamHealth {
    Healthy,
    Degraded,
}

/// Compute per-index flags for a resolved v0 account-key list.
///
/// Layout: `static_len` keys from the message (signers first, each group with
/// its read-only tail), then `loaded_writable` keys, then `loaded_readonly`.
pub fn account_flags(
    static_len: usize,
    num_required_signatures: usize,
    num_readonly_signed: usize,
    num_readonly_unsigned: usize,
    loaded_writable: usize,
    loaded_readonly: usize,
) -> Vec<AccountFlags> {
    let mut flags = Vec::with_capacity(static_len + loaded_writable + loaded_readonly);
    for idx in 0..static_len {
        let is_signer = idx < num_required_signatures;
        let is_writable = if is_signer {
            idx < num_required_signatures.saturating_sub(num_readonly_signed)
        } else {
            idx < static_len.saturating_sub(num_readonly_unsigned)
        };
        flags.push(AccountFlags { is_signer, is_writable });
    }
    for _ in 0..loaded_writable {
        flags.push(AccountFlags { is_signer: false, is_writable: true });
    }
    for _ in 0..loaded_readonly {
        flags.push(AccountFlags { is_signer: false, is_writable: false });
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_follow_message_layout() {
        // 2 signers (1 readonly-signed), 3 static non-signers (1 readonly),
        // 1 loaded writable, 2 loaded readonly.
        let flags = account_flags(5, 2, 1, 1, 1, 2);
        assert_eq!(flags.len(), 8);
        assert!(flags[0].is_signer && flags[0].is_writable);
        assert!(flags[1].is_signer && !flags[1].is_writable);
        assert!(!flags[2].is_signer && flags[2].is_writable);
        assert!(!flags[3].is_signer && flags[3].is_writable);
        assert!(!flags[4].is_signer && !flags[4].is_writable);
        assert!(flags[5].is_writable);
        assert!(!flags[6].is_writable);
        assert!(!flags[7].is_writable);
    }
}
