//! Program ids and instruction discriminators for the recognized DEXes and
//! routers. Additional "variant" program ids for a platform are supplied
//! through `EngineConfig::extra_platform_programs`; this module carries the
//! canonical ones.

use solana_sdk::{pubkey, pubkey::Pubkey};

pub const PUMPFUN: Pubkey = pubkey!("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P");
pub const PUMPFUN_AMM: Pubkey = pubkey!("pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA");

pub const RAYDIUM_V4: Pubkey = pubkey!("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8");
pub const RAYDIUM_CPMM: Pubkey = pubkey!("CPMMoo8L3F4NbTegBCKVNunggL7H1ZpdTHKxQB5qKP1C");
pub const RAYDIUM_CLMM: Pubkey = pubkey!("CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK");
pub const RAYDIUM_LAUNCHPAD: Pubkey = pubkey!("LanMV9sAd7wArD4vJFi2qDdfnVhFxYSUg6eADduJ3uj");

pub const METEORA_DLMM: Pubkey = pubkey!("LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo");
pub const METEORA_DBC: Pubkey = pubkey!("dbcij3LWUppWqq96dh6gJWwBifmcGfLSB5D4DuSMaqN");
pub const METEORA_CP_AMM: Pubkey = pubkey!("cpamdpZCGKUy5JxQXB4dcpGPiikHawvSWAd6mEn1sGG");

pub const JUPITER: Pubkey = pubkey!("JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4");
pub const PHOTON_ROUTER: Pubkey = pubkey!("BSfD6SHZigAfDWSjzD5Q41jw8LmKwtmjskPH9XW1mrRW");

/// Pump.fun bonding-curve instruction discriminators.
pub const PUMPFUN_BUY_DISCRIMINATOR: [u8; 8] = [0x66, 0x06, 0x3D, 0x11, 0x01, 0x05, 0x24, 0x72];
pub const PUMPFUN_SELL_DISCRIMINATOR: [u8; 8] = [0x2A, 0x7A, 0x81, 0x76, 0x27, 0x66, 0x93, 0x9F];

/// Raydium Launchpad `buy_exact_in` discriminator.
pub const RAYDIUM_LAUNCHPAD_BUY_DISCRIMINATOR: [u8; 8] =
    [0xFA, 0xEA, 0x0D, 0x7B, 0xD5, 0x9C, 0x13, 0xEC];

/// Block-engine tip accounts for the optional per-trade tip transfer.
pub const BLOCK_ENGINE_TIP_ACCOUNTS: [Pubkey; 4] = [
    pubkey!("96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5"),
    pubkey!("HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe"),
    pubkey!("Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY"),
    pubkey!("ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49"),
];
