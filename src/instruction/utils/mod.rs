pub mod pumpfun;
pub mod raydium_launchpad;
