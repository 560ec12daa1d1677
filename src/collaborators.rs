//! External collaborators. The operator UI, the relational store, the pricing
//! API and secret storage live outside this crate; the engine consumes them
//! through these traits and emits events back through the notifier. A single
//! read-only [`Collaborators`] handle is passed to every task at spawn.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;

use crate::classifier::TradeSide;
use crate::common::{AnyResult, TraderSubscription, UserSettings, WalletHandle};

/// Token metadata used by the janitor's market-cap rule.
#[derive(Debug, Clone, Copy)]
pub struct TokenMetadata {
    pub total_supply: u64,
    pub decimals: u8,
}

/// Sell-side context for a (user, mint) pair.
#[derive(Debug, Clone, Copy)]
pub struct SellState {
    /// On-chain token balance, base units.
    pub token_balance_raw: u64,
    /// Expected SOL proceeds for a full-position sell, when the platform's
    /// state (e.g. a bonding curve) makes it computable.
    pub expected_sol_out: Option<u64>,
}

/// Per-platform balance and price lookups.
#[async_trait]
pub trait ApiManager: Send + Sync {
    /// Batched price lookup; SOL per whole token.
    async fn get_token_prices(&self, mints: &[Pubkey]) -> AnyResult<HashMap<Pubkey, f64>>;
    async fn get_token_metadatas(
        &self,
        mints: &[Pubkey],
    ) -> AnyResult<HashMap<Pubkey, TokenMetadata>>;
    async fn get_sell_state(&self, user: &Pubkey, mint: &Pubkey) -> AnyResult<SellState>;
}

/// Dispatch outcome carried by [`TradeRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradeStatus {
    Confirmed,
    Failed(String),
    /// Confirmation deadline passed; reconciliation resolves it later.
    Pending,
}

/// One row written to the `trades` table per dispatch result.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub chat_id: i64,
    pub wallet: Pubkey,
    pub leader: Pubkey,
    pub mint: Pubkey,
    pub side: TradeSide,
    pub signature: String,
    pub status: TradeStatus,
    pub sol_delta_lamports: i128,
    pub token_delta_raw: i128,
    pub fee_lamports: u64,
    pub slot: Option<u64>,
    pub unix_ms: i64,
}

/// The relational store: users, wallets, traders, trades, positions.
#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn active_subscriptions(&self) -> AnyResult<Vec<TraderSubscription>>;
    async fn user_settings(&self, chat_id: i64) -> AnyResult<UserSettings>;
    /// Resolves and decrypts the user's primary signing wallet. Decryption
    /// happens on the store's side; the engine only ever holds the handle.
    async fn signing_wallet(&self, chat_id: i64, label: &str) -> AnyResult<WalletHandle>;
    async fn record_trade(&self, record: &TradeRecord) -> AnyResult<()>;
    async fn update_position(
        &self,
        chat_id: i64,
        mint: &Pubkey,
        position: &crate::trading::positions::Position,
    ) -> AnyResult<()>;
}

#[derive(Debug, Clone)]
pub enum TradeEvent {
    Completed {
        chat_id: i64,
        mint: Pubkey,
        side: TradeSide,
        signature: String,
        sol_delta_lamports: i128,
        token_delta_raw: i128,
        pnl_gross_lamports: Option<i128>,
        pnl_net_lamports: Option<i128>,
    },
    Failed {
        chat_id: i64,
        mint: Pubkey,
        side: TradeSide,
        reason: String,
    },
    Pending {
        chat_id: i64,
        mint: Pubkey,
        signature: String,
    },
}

/// Operator-facing notification sink (the Telegram-style UI).
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: TradeEvent);
}

/// Read-only bundle of collaborator handles, cloned into each task.
#[derive(Clone)]
pub struct Collaborators {
    pub api: Arc<dyn ApiManager>,
    pub store: Arc<dyn TradeStore>,
    pub notifier: Arc<dyn Notifier>,
}
