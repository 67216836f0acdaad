//! Core types for the wallet pool
//!
//! A wallet here is an opaque signing-identity handle with reputation and
//! lifecycle state. The core never touches signing material; records are
//! registered from an external wallet registry at startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a pooled wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletState {
    /// Eligible for selection
    Active,

    /// Temporarily ineligible; promoted back to Active when the cooldown
    /// expires
    Cooldown,

    /// Permanently ineligible (one-way transition)
    Retired,
}

impl std::fmt::Display for WalletState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletState::Active => write!(f, "active"),
            WalletState::Cooldown => write!(f, "cooldown"),
            WalletState::Retired => write!(f, "retired"),
        }
    }
}

/// Kind of detection evidence attached to a wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    /// Transaction rejected by the venue
    RejectedTransaction,

    /// Unusual latency reported by the executor
    UnusualLatency,

    /// Explicit flag from an exchange or venue
    ExchangeFlag,

    /// Our own pattern detector flagged this wallet's stream
    SelfDetectedPattern,
}

/// A timestamped detection flag
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DetectionFlag {
    pub kind: FlagKind,
    pub at: DateTime<Utc>,
}

/// One pooled signing identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    /// Opaque handle, never the raw credential
    pub id: String,

    /// Network this wallet belongs to
    pub network: String,

    /// Reputation in [0, 1]; mutated only through the reputation update
    pub reputation: f64,

    /// Total transactions attributed to this wallet
    pub transactions_sent: u64,

    /// Last time this wallet was selected
    pub last_used_at: Option<DateTime<Utc>>,

    /// End of the current cooldown, when in Cooldown
    pub cooldown_until: Option<DateTime<Utc>>,

    /// Detection evidence, oldest first
    pub detection_flags: Vec<DetectionFlag>,

    /// Lifecycle state
    pub state: WalletState,
}

impl WalletRecord {
    /// A fresh Active wallet with neutral-good reputation
    pub fn new(id: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            network: network.into(),
            reputation: 0.8,
            transactions_sent: 0,
            last_used_at: None,
            cooldown_until: None,
            detection_flags: Vec::new(),
            state: WalletState::Active,
        }
    }

    /// Count flags within the trailing window ending at `now`
    pub fn flags_within(&self, window: chrono::Duration, now: DateTime<Utc>) -> usize {
        let cutoff = now - window;
        self.detection_flags.iter().filter(|f| f.at >= cutoff).count()
    }
}

/// Observability snapshot of one network's pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletPoolStats {
    pub network: String,
    pub total: usize,
    pub active: usize,
    pub cooldown: usize,
    pub retired: usize,
    pub reserved: usize,
    pub mean_reputation: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wallet_is_active() {
        let wallet = WalletRecord::new("w1", "mainnet");
        assert_eq!(wallet.state, WalletState::Active);
        assert!(wallet.reputation > 0.0 && wallet.reputation <= 1.0);
        assert!(wallet.detection_flags.is_empty());
    }

    #[test]
    fn test_flags_within_window() {
        let now = Utc::now();
        let mut wallet = WalletRecord::new("w1", "mainnet");
        wallet.detection_flags.push(DetectionFlag {
            kind: FlagKind::ExchangeFlag,
            at: now - chrono::Duration::hours(30),
        });
        wallet.detection_flags.push(DetectionFlag {
            kind: FlagKind::RejectedTransaction,
            at: now - chrono::Duration::hours(1),
        });

        assert_eq!(wallet.flags_within(chrono::Duration::hours(24), now), 1);
        assert_eq!(wallet.flags_within(chrono::Duration::hours(48), now), 2);
    }
}
