pub mod ata;
pub mod nonce_cache;
pub mod types;

pub use types::*;
