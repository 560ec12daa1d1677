use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Engine-level error taxonomy. Only `ConfigFatal` terminates the process;
/// every other kind is scoped to a single event or user job.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    ConfigFatal(String),

    /// Transaction is not a recognizable swap. Logged at debug and dropped.
    #[error("not a recognizable swap")]
    ClassifierReject,

    /// The clone cannot be built for this user; the job is skipped and
    /// `TradeFailed` is emitted. No state changes.
    #[error("cloner fatal: {reason}")]
    ClonerFatal { reason: String },

    /// Network-level send failure; retried inside the dispatcher.
    #[error("transient dispatch error: {0}")]
    DispatchTransient(String),

    /// Confirmed on-chain failure. Never retried.
    #[error("transaction {signature} failed on-chain: {err}")]
    DispatchOnChainFail { signature: String, err: String },

    /// Confirmation deadline exceeded. The transaction may still land;
    /// reconciliation resolves it later.
    #[error("confirmation timed out for {signature}")]
    DispatchTimeout { signature: String },

    #[error("stream disconnected: {0}")]
    StreamDisconnected(String),

    #[error("InsufficientBalance: {user} is below the minimum trade amount")]
    InsufficientBalance { user: Pubkey },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Whether the dispatcher may retry the job once at the orchestrator level.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::DispatchTransient(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
