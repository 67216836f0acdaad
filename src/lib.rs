//! Behavioral Obfuscation Core
//!
//! Decision engine for an automated trading agent that must keep its
//! transaction stream statistically indistinguishable from human traders:
//! behavioral profiles, a reputation-rotated wallet pool, per-transaction
//! parameter shaping, session activity/rest cycles, self-monitoring
//! pattern detection, and a fallback-safe decision orchestrator.
//!
//! Transaction submission, signing, RPC, and market data live outside
//! this crate; it only decides when, with which wallet, and in what shape.

pub mod config;
pub mod detector;
pub mod error;
pub mod jitter;
pub mod orchestrator;
pub mod profile;
pub mod session;
pub mod shaping;
pub mod wallet;

// Re-export commonly used types
pub use config::CoreConfig;
pub use error::{Error, Result};
pub use orchestrator::{Decision, NullAdvisor, Orchestrator, ProfileAdvisor};
pub use shaping::{OperationIntent, OperationKind, TransactionParameters};
