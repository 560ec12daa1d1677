//! Engine-wide trade defaults. Everything here can be overridden through
//! `EngineConfig`; the janitor thresholds and the fee policy are the values
//! the engine ships with.

/// Slippage applied when a user has none configured, in basis points.
pub const DEFAULT_SLIPPAGE_BPS: u64 = 500;

/// Compute-unit limit used when the leader transaction carries none.
pub const DEFAULT_COMPUTE_UNIT_LIMIT: u32 = 1_200_000;

/// Priority fee = min(user_sol_amount * ratio, cap), in micro-lamports.
pub const DEFAULT_PRIORITY_FEE_RATIO: f64 = 0.15;
pub const DEFAULT_PRIORITY_FEE_CAP_MICRO_LAMPORTS: u64 = 1_000_000;

/// Dispatcher retry/backoff bounds for transient send errors.
pub const DISPATCH_MAX_SEND_RETRIES: usize = 5;
pub const DISPATCH_BACKOFF_MIN_MS: u64 = 50;
pub const DISPATCH_BACKOFF_MAX_MS: u64 = 2_000;

/// Hard confirmation deadline per dispatch.
pub const CONFIRMATION_TIMEOUT_MS: u64 = 30_000;

/// Coarse default for all other blocking RPC calls.
pub const RPC_CALL_TIMEOUT_MS: u64 = 20_000;

/// Stream health: silence longer than this flips the circuit breaker.
pub const STREAM_STALL_THRESHOLD_MS: u64 = 30_000;
pub const STREAM_RECONNECT_CAP_MS: u64 = 30_000;
pub const STREAM_MAX_QUIET_RECONNECTS: u32 = 10;

/// Fallback poller cadence and per-leader dedup window.
pub const POLL_INTERVAL_MS: u64 = 25_000;
pub const SIGNATURE_DEDUP_CAPACITY: usize = 256;

/// Janitor cadence and platform-class pruning rules.
pub const JANITOR_INTERVAL_MS: u64 = 60_000;
pub const JANITOR_PUMPFUN_MCAP_THRESHOLD: f64 = 1_000.0;
pub const JANITOR_LAUNCHPAD_MCAP_THRESHOLD: f64 = 50_000.0;
pub const JANITOR_LAUNCHPAD_GRACE_MS: u64 = 5 * 60 * 1_000;
pub const JANITOR_GENERAL_MCAP_THRESHOLD: f64 = 250_000.0;
pub const JANITOR_GENERAL_GRACE_MS: u64 = 60 * 60 * 1_000;
