//! Wallet pool management
//!
//! Reputation-tracked signing-identity handles with cooldown, retirement,
//! and checkout-style reservations. No signing material and no network
//! calls live here.

pub mod pool;
pub mod types;

pub use pool::{WalletPool, WalletPoolConfig, WalletPoolManager, WalletReservation};
pub use types::{DetectionFlag, FlagKind, WalletPoolStats, WalletRecord, WalletState};
