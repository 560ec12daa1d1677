use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Keypair};
use std::str::FromStr;

use crate::constants::trade;
use crate::error::{EngineError, EngineResult};

pub type SolanaRpcClient = solana_client::nonblocking::rpc_client::RpcClient;

pub type AnyResult<T> = anyhow::Result<T>;

/// Top-level engine configuration, built by the embedding binary.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Canonical gRPC ingress endpoint. Fallbacks rotate on reconnect.
    pub grpc_endpoint: String,
    #[serde(default)]
    pub grpc_fallback_endpoints: Vec<String>,
    #[serde(default)]
    pub grpc_x_token: Option<String>,
    pub rpc_url: String,
    #[serde(skip_deserializing, default = "default_commitment")]
    pub commitment: CommitmentConfig,
    /// Default buy size, in SOL, for users without an explicit setting.
    #[serde(default = "default_sol_trade_amount")]
    pub default_sol_trade_amount: f64,
    /// Buys below this many lamports are skipped before cloning.
    #[serde(default = "default_min_sol_per_trade")]
    pub min_sol_amount_per_trade: u64,
    #[serde(default)]
    pub priority_fee: PriorityFeePolicy,
    #[serde(default = "default_compute_unit")]
    pub compute_unit_default: u32,
    #[serde(default)]
    pub janitor: JanitorPolicy,
    #[serde(default = "default_reconnect_cap")]
    pub stream_reconnect_cap_ms: u64,
    /// Optional block-engine tip, as a ratio of the trade's SOL amount.
    #[serde(default)]
    pub block_engine_tip_ratio: Option<f64>,
    /// Known-variant program ids, base58. The recognizer table is data.
    #[serde(default)]
    pub extra_pumpfun_programs: Vec<String>,
    #[serde(default)]
    pub extra_meteora_dbc_programs: Vec<String>,
}

fn default_commitment() -> CommitmentConfig {
    CommitmentConfig::confirmed()
}
fn default_sol_trade_amount() -> f64 {
    0.01
}
fn default_min_sol_per_trade() -> u64 {
    1_000_000
}
fn default_compute_unit() -> u32 {
    trade::DEFAULT_COMPUTE_UNIT_LIMIT
}
fn default_reconnect_cap() -> u64 {
    trade::STREAM_RECONNECT_CAP_MS
}

impl EngineConfig {
    /// Config with engine defaults for everything but the two endpoints.
    pub fn new(grpc_endpoint: impl Into<String>, rpc_url: impl Into<String>) -> Self {
        Self {
            grpc_endpoint: grpc_endpoint.into(),
            grpc_fallback_endpoints: Vec::new(),
            grpc_x_token: None,
            rpc_url: rpc_url.into(),
            commitment: default_commitment(),
            default_sol_trade_amount: default_sol_trade_amount(),
            min_sol_amount_per_trade: default_min_sol_per_trade(),
            priority_fee: PriorityFeePolicy::default(),
            compute_unit_default: default_compute_unit(),
            janitor: JanitorPolicy::default(),
            stream_reconnect_cap_ms: default_reconnect_cap(),
            block_engine_tip_ratio: None,
            extra_pumpfun_programs: Vec::new(),
            extra_meteora_dbc_programs: Vec::new(),
        }
    }

    pub fn from_json_str(raw: &str) -> EngineResult<Self> {
        let config: EngineConfig = serde_json::from_str(raw)
            .map_err(|e| EngineError::ConfigFatal(format!("config parse: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.grpc_endpoint.trim().is_empty() {
            return Err(EngineError::ConfigFatal("grpc_endpoint is empty".into()));
        }
        if self.rpc_url.trim().is_empty() {
            return Err(EngineError::ConfigFatal("rpc_url is empty".into()));
        }
        if self.default_sol_trade_amount <= 0.0 {
            return Err(EngineError::ConfigFatal(
                "default_sol_trade_amount must be positive".into(),
            ));
        }
        self.parse_extra_programs()?;
        Ok(())
    }

    pub fn default_trade_lamports(&self) -> u64 {
        (self.default_sol_trade_amount * crate::constants::LAMPORTS_PER_SOL as f64) as u64
    }

    pub fn parse_extra_programs(&self) -> EngineResult<ExtraPrograms> {
        let parse = |raw: &[String], what: &str| -> EngineResult<Vec<Pubkey>> {
            raw.iter()
                .map(|s| {
                    Pubkey::from_str(s)
                        .map_err(|e| EngineError::ConfigFatal(format!("{what} id {s}: {e}")))
                })
                .collect()
        };
        Ok(ExtraPrograms {
            pumpfun: parse(&self.extra_pumpfun_programs, "pump.fun variant")?,
            meteora_dbc: parse(&self.extra_meteora_dbc_programs, "meteora dbc variant")?,
        })
    }
}

/// Variant program ids accepted by the platform recognizer in addition to the
/// canonical constants.
#[derive(Debug, Clone, Default)]
pub struct ExtraPrograms {
    pub pumpfun: Vec<Pubkey>,
    pub meteora_dbc: Vec<Pubkey>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PriorityFeePolicy {
    pub ratio_of_sol: f64,
    pub cap_micro_lamports: u64,
}

impl Default for PriorityFeePolicy {
    fn default() -> Self {
        Self {
            ratio_of_sol: trade::DEFAULT_PRIORITY_FEE_RATIO,
            cap_micro_lamports: trade::DEFAULT_PRIORITY_FEE_CAP_MICRO_LAMPORTS,
        }
    }
}

impl PriorityFeePolicy {
    /// Unit price in micro-lamports for a trade spending `sol_amount` lamports.
    pub fn unit_price(&self, sol_amount: u64) -> u64 {
        ((sol_amount as f64 * self.ratio_of_sol) as u64).min(self.cap_micro_lamports)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct JanitorPolicy {
    pub interval_ms: u64,
    pub pumpfun_mcap_threshold: f64,
    pub launchpad_mcap_threshold: f64,
    pub launchpad_grace_ms: u64,
    pub general_mcap_threshold: f64,
    pub general_grace_ms: u64,
}

impl Default for JanitorPolicy {
    fn default() -> Self {
        Self {
            interval_ms: trade::JANITOR_INTERVAL_MS,
            pumpfun_mcap_threshold: trade::JANITOR_PUMPFUN_MCAP_THRESHOLD,
            launchpad_mcap_threshold: trade::JANITOR_LAUNCHPAD_MCAP_THRESHOLD,
            launchpad_grace_ms: trade::JANITOR_LAUNCHPAD_GRACE_MS,
            general_mcap_threshold: trade::JANITOR_GENERAL_MCAP_THRESHOLD,
            general_grace_ms: trade::JANITOR_GENERAL_GRACE_MS,
        }
    }
}

/// Per-user settings, read from the external store.
#[derive(Debug, Clone)]
pub struct UserSettings {
    pub chat_id: i64,
    /// Buy size in lamports.
    pub sol_amount_per_trade: u64,
    pub slippage_bps: u64,
    pub primary_wallet_label: String,
    pub is_admin: bool,
}

/// An already-decrypted signing handle for one trading wallet. The engine
/// never sees key material at rest.
#[derive(Clone)]
pub struct WalletHandle {
    pub pubkey: Pubkey,
    pub keypair: Arc<Keypair>,
    pub nonce: Option<NonceHandle>,
}

impl std::fmt::Debug for WalletHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Keys never reach logs.
        f.debug_struct("WalletHandle").field("pubkey", &self.pubkey).finish_non_exhaustive()
    }
}

/// Durable-nonce wiring for a wallet that uses one.
#[derive(Clone)]
pub struct NonceHandle {
    pub nonce_account: Pubkey,
    pub authority: Arc<Keypair>,
}

impl std::fmt::Debug for NonceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceHandle")
            .field("nonce_account", &self.nonce_account)
            .finish_non_exhaustive()
    }
}

/// One (user, leader) copy-trading subscription row.
#[derive(Debug, Clone)]
pub struct TraderSubscription {
    pub owner_chat_id: i64,
    pub leader: Pubkey,
    pub name: String,
    pub active: bool,
}

/// Parse a base58 pubkey with a contextual error.
pub fn parse_pubkey(raw: &str) -> AnyResult<Pubkey> {
    Pubkey::from_str(raw).with_context(|| format!("invalid pubkey: {raw}"))
}
