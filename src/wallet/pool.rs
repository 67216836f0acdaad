//! Wallet pool: reputation-scored selection with checkout reservations
//!
//! Each network owns one pool. Selection picks the eligible wallet
//! maximizing `reputation * age_factor(time since last use)`; the age
//! factor is capped so no single wallet is always chosen, and near-ties
//! are broken uniformly at random. A selected wallet is checked out
//! (reserved) until its outcome is reported, so concurrent in-flight
//! operations never share a wallet. Reputation moves only through the
//! outcome commit path.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::jitter::Jitter;

use super::types::{DetectionFlag, FlagKind, WalletPoolStats, WalletRecord, WalletState};

/// Wallet pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletPoolConfig {
    /// Reputation gain per success: `r += (1 - r) * reward_rate`
    #[serde(default = "default_reward_rate")]
    pub reward_rate: f64,

    /// Reputation loss per failure: `r -= r * penalty_rate`
    #[serde(default = "default_penalty_rate")]
    pub penalty_rate: f64,

    /// Flags within the trailing window beyond which a wallet retires
    #[serde(default = "default_max_flags")]
    pub max_flags_before_retire: usize,

    /// Trailing window for flag counting, in hours
    #[serde(default = "default_flag_window_hours")]
    pub flag_window_hours: u64,

    /// Seconds of idleness over which the age factor ramps from 1 to cap
    #[serde(default = "default_age_ramp_secs")]
    pub age_ramp_secs: u64,

    /// Cap on the age factor
    #[serde(default = "default_age_factor_cap")]
    pub age_factor_cap: f64,

    /// Scores within this distance of the best are treated as tied
    #[serde(default = "default_tie_epsilon")]
    pub tie_epsilon: f64,
}

fn default_reward_rate() -> f64 {
    0.10
}
fn default_penalty_rate() -> f64 {
    0.25
}
fn default_max_flags() -> usize {
    3
}
fn default_flag_window_hours() -> u64 {
    24
}
fn default_age_ramp_secs() -> u64 {
    3600
}
fn default_age_factor_cap() -> f64 {
    2.0
}
fn default_tie_epsilon() -> f64 {
    0.05
}

impl Default for WalletPoolConfig {
    fn default() -> Self {
        Self {
            reward_rate: default_reward_rate(),
            penalty_rate: default_penalty_rate(),
            max_flags_before_retire: default_max_flags(),
            flag_window_hours: default_flag_window_hours(),
            age_ramp_secs: default_age_ramp_secs(),
            age_factor_cap: default_age_factor_cap(),
            tie_epsilon: default_tie_epsilon(),
        }
    }
}

impl WalletPoolConfig {
    pub fn validate(&self) -> Result<()> {
        for (label, rate) in [("reward_rate", self.reward_rate), ("penalty_rate", self.penalty_rate)] {
            if rate <= 0.0 || rate >= 1.0 {
                return Err(Error::Config(format!(
                    "{} = {} is outside (0, 1)",
                    label, rate
                )));
            }
        }
        if self.age_factor_cap < 1.0 {
            return Err(Error::Config(
                "age_factor_cap must be >= 1.0".to_string(),
            ));
        }
        if self.tie_epsilon < 0.0 {
            return Err(Error::Config("tie_epsilon must be >= 0".to_string()));
        }
        Ok(())
    }
}

/// Checkout token for a selected wallet
#[derive(Debug, Clone)]
pub struct WalletReservation {
    pub id: String,
    pub wallet_id: String,
    pub network: String,
    pub reserved_at: DateTime<Utc>,
}

struct ReservationSlot {
    wallet_id: String,
    /// last_used_at before this checkout, restored on release
    prior_last_used: Option<DateTime<Utc>>,
}

struct PoolInner {
    wallets: HashMap<String, WalletRecord>,
    /// Registration order, for deterministic scoring under a seeded jitter
    order: Vec<String>,
    reserved: HashSet<String>,
    reservations: HashMap<String, ReservationSlot>,
    jitter: Jitter,
}

/// One network's wallet pool
pub struct WalletPool {
    network: String,
    config: WalletPoolConfig,
    inner: Mutex<PoolInner>,
}

impl WalletPool {
    pub fn new(network: impl Into<String>, config: WalletPoolConfig, seed: Option<u64>) -> Self {
        Self {
            network: network.into(),
            config,
            inner: Mutex::new(PoolInner {
                wallets: HashMap::new(),
                order: Vec::new(),
                reserved: HashSet::new(),
                reservations: HashMap::new(),
                jitter: Jitter::new(seed),
            }),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Register a wallet supplied by the external registry
    pub async fn register(&self, record: WalletRecord) -> Result<()> {
        if record.network != self.network {
            return Err(Error::Config(format!(
                "wallet {} belongs to network {}, pool is {}",
                record.id, record.network, self.network
            )));
        }
        let mut inner = self.inner.lock().await;
        if inner.wallets.contains_key(&record.id) {
            return Err(Error::Config(format!("duplicate wallet id: {}", record.id)));
        }
        info!(wallet = %record.id, network = %self.network, "Registered wallet");
        inner.order.push(record.id.clone());
        inner.wallets.insert(record.id.clone(), record);
        Ok(())
    }

    /// Reserve the best eligible wallet as of `now`.
    ///
    /// Lazily promotes expired cooldowns first. Fails with
    /// `WalletPoolExhausted` when nothing is Active and unreserved; callers
    /// must treat that as a hard stop for this network.
    pub async fn reserve_at(&self, now: DateTime<Utc>) -> Result<WalletReservation> {
        let mut inner = self.inner.lock().await;
        let total = inner.wallets.len();

        // Lazy cooldown sweep
        for id in inner.order.clone() {
            if let Some(wallet) = inner.wallets.get_mut(&id) {
                if wallet.state == WalletState::Cooldown
                    && wallet.cooldown_until.map(|until| now >= until).unwrap_or(true)
                {
                    wallet.state = WalletState::Active;
                    wallet.cooldown_until = None;
                    debug!(wallet = %id, network = %self.network, "Cooldown expired");
                }
            }
        }

        let mut scored: Vec<(String, f64)> = Vec::new();
        for id in &inner.order {
            let wallet = &inner.wallets[id];
            if wallet.state != WalletState::Active || inner.reserved.contains(id) {
                continue;
            }
            scored.push((id.clone(), self.score(wallet, now)));
        }

        if scored.is_empty() {
            return Err(Error::WalletPoolExhausted {
                network: self.network.clone(),
                eligible: 0,
                total,
            });
        }

        let best = scored
            .iter()
            .map(|(_, s)| *s)
            .fold(f64::NEG_INFINITY, f64::max);
        let tied: Vec<&String> = scored
            .iter()
            .filter(|(_, s)| best - *s <= self.config.tie_epsilon)
            .map(|(id, _)| id)
            .collect();
        let chosen = if tied.len() == 1 {
            tied[0].clone()
        } else {
            let idx = inner.jitter.range_u64(0, tied.len() as u64 - 1) as usize;
            tied[idx].clone()
        };

        let prior_last_used = match inner.wallets.get_mut(&chosen) {
            Some(wallet) => {
                let prior = wallet.last_used_at;
                wallet.last_used_at = Some(now);
                prior
            }
            None => return Err(Error::WalletNotFound(chosen)),
        };

        let reservation = WalletReservation {
            id: Uuid::new_v4().to_string(),
            wallet_id: chosen.clone(),
            network: self.network.clone(),
            reserved_at: now,
        };
        inner.reserved.insert(chosen.clone());
        inner.reservations.insert(
            reservation.id.clone(),
            ReservationSlot {
                wallet_id: chosen.clone(),
                prior_last_used,
            },
        );

        debug!(wallet = %chosen, network = %self.network, "Reserved wallet");
        Ok(reservation)
    }

    /// Reserve using the current wall clock
    pub async fn reserve(&self) -> Result<WalletReservation> {
        self.reserve_at(Utc::now()).await
    }

    /// Release a reservation without an outcome (failed decide path).
    ///
    /// The wallet is returned untouched: its last-used timestamp is rolled
    /// back so the aborted call does not count as a use.
    pub async fn release(&self, reservation_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .reservations
            .remove(reservation_id)
            .ok_or_else(|| Error::UnknownReservation(reservation_id.to_string()))?;
        inner.reserved.remove(&slot.wallet_id);
        if let Some(wallet) = inner.wallets.get_mut(&slot.wallet_id) {
            wallet.last_used_at = slot.prior_last_used;
        }
        debug!(wallet = %slot.wallet_id, network = %self.network, "Released reservation");
        Ok(())
    }

    /// Report the outcome for a checked-out wallet as of `now`.
    ///
    /// This is the sole reputation mutation path: success moves reputation
    /// toward 1, failure toward 0, and every flag is appended. A wallet
    /// exceeding the flag budget within the trailing window retires
    /// permanently.
    pub async fn commit_at(
        &self,
        reservation_id: &str,
        success: bool,
        flags: &[FlagKind],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .reservations
            .remove(reservation_id)
            .ok_or_else(|| Error::UnknownReservation(reservation_id.to_string()))?;
        inner.reserved.remove(&slot.wallet_id);

        let window = Duration::hours(self.config.flag_window_hours as i64);
        let max_flags = self.config.max_flags_before_retire;
        let (reward, penalty) = (self.config.reward_rate, self.config.penalty_rate);
        let network = self.network.clone();

        let wallet = inner
            .wallets
            .get_mut(&slot.wallet_id)
            .ok_or_else(|| Error::WalletNotFound(slot.wallet_id.clone()))?;

        if success {
            wallet.reputation += (1.0 - wallet.reputation) * reward;
        } else {
            wallet.reputation -= wallet.reputation * penalty;
        }
        wallet.reputation = wallet.reputation.clamp(0.0, 1.0);
        wallet.transactions_sent += 1;

        for kind in flags {
            wallet.detection_flags.push(DetectionFlag { kind: *kind, at: now });
        }

        if wallet.state != WalletState::Retired
            && wallet.flags_within(window, now) > max_flags
        {
            wallet.state = WalletState::Retired;
            wallet.cooldown_until = None;
            warn!(
                wallet = %wallet.id,
                network = %network,
                flags = wallet.detection_flags.len(),
                "Wallet retired after exceeding flag budget"
            );
        }

        debug!(
            wallet = %slot.wallet_id,
            network = %network,
            success,
            reputation = wallet.reputation,
            "Committed wallet outcome"
        );
        Ok(())
    }

    /// Report an outcome using the current wall clock
    pub async fn commit(&self, reservation_id: &str, success: bool, flags: &[FlagKind]) -> Result<()> {
        self.commit_at(reservation_id, success, flags, Utc::now()).await
    }

    /// Move a wallet to Cooldown until `now + duration`.
    ///
    /// Retired wallets stay retired.
    pub async fn set_cooldown_at(
        &self,
        wallet_id: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let wallet = inner
            .wallets
            .get_mut(wallet_id)
            .ok_or_else(|| Error::WalletNotFound(wallet_id.to_string()))?;
        if wallet.state == WalletState::Retired {
            return Ok(());
        }
        wallet.state = WalletState::Cooldown;
        wallet.cooldown_until = Some(now + duration);
        debug!(wallet = %wallet_id, network = %self.network, "Wallet cooling down");
        Ok(())
    }

    pub async fn set_cooldown(&self, wallet_id: &str, duration: Duration) -> Result<()> {
        self.set_cooldown_at(wallet_id, duration, Utc::now()).await
    }

    /// Idempotent observability snapshot
    pub async fn stats(&self) -> WalletPoolStats {
        let inner = self.inner.lock().await;
        let mut stats = WalletPoolStats {
            network: self.network.clone(),
            total: inner.wallets.len(),
            active: 0,
            cooldown: 0,
            retired: 0,
            reserved: inner.reserved.len(),
            mean_reputation: 0.0,
        };
        for wallet in inner.wallets.values() {
            match wallet.state {
                WalletState::Active => stats.active += 1,
                WalletState::Cooldown => stats.cooldown += 1,
                WalletState::Retired => stats.retired += 1,
            }
            stats.mean_reputation += wallet.reputation;
        }
        if stats.total > 0 {
            stats.mean_reputation /= stats.total as f64;
        }
        stats
    }

    /// Copy of one wallet record, for inspection
    pub async fn snapshot(&self, wallet_id: &str) -> Option<WalletRecord> {
        let inner = self.inner.lock().await;
        inner.wallets.get(wallet_id).cloned()
    }

    fn score(&self, wallet: &WalletRecord, now: DateTime<Utc>) -> f64 {
        let age_factor = match wallet.last_used_at {
            None => self.config.age_factor_cap,
            Some(last) => {
                let idle_secs = (now - last).num_seconds().max(0) as f64;
                (1.0 + idle_secs / self.config.age_ramp_secs as f64)
                    .min(self.config.age_factor_cap)
            }
        };
        wallet.reputation * age_factor
    }
}

/// All pools, one per network
pub struct WalletPoolManager {
    config: WalletPoolConfig,
    pools: DashMap<String, std::sync::Arc<WalletPool>>,
    seed: Option<u64>,
}

impl WalletPoolManager {
    pub fn new(config: WalletPoolConfig, seed: Option<u64>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pools: DashMap::new(),
            seed,
        })
    }

    /// Register a wallet, creating the network's pool on first sight
    pub async fn register(&self, record: WalletRecord) -> Result<()> {
        let pool = self
            .pools
            .entry(record.network.clone())
            .or_insert_with(|| {
                std::sync::Arc::new(WalletPool::new(
                    record.network.clone(),
                    self.config.clone(),
                    self.seed,
                ))
            })
            .clone();
        pool.register(record).await
    }

    /// Pool for a network; errors when no wallet was ever registered there
    pub fn pool(&self, network: &str) -> Result<std::sync::Arc<WalletPool>> {
        self.pools
            .get(network)
            .map(|p| p.clone())
            .ok_or_else(|| Error::WalletPoolExhausted {
                network: network.to_string(),
                eligible: 0,
                total: 0,
            })
    }

    pub async fn stats(&self, network: &str) -> Result<WalletPoolStats> {
        Ok(self.pool(network)?.stats().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_pool(n: usize) -> WalletPool {
        let pool = WalletPool::new("mainnet", WalletPoolConfig::default(), Some(42));
        for i in 0..n {
            pool.register(WalletRecord::new(format!("w{}", i), "mainnet"))
                .await
                .unwrap();
        }
        pool
    }

    /// Reserve repeatedly until `target` comes up, then retire it with a
    /// flood of flags; other wallets are released untouched.
    async fn retire(pool: &WalletPool, target: &str, now: DateTime<Utc>) {
        loop {
            let r = pool.reserve_at(now).await.unwrap();
            if r.wallet_id == target {
                pool.commit_at(&r.id, false, &[FlagKind::ExchangeFlag; 4], now)
                    .await
                    .unwrap();
                return;
            }
            pool.release(&r.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_selection_never_returns_retired_or_cooldown() {
        let now = Utc::now();
        let pool = seeded_pool(3).await;

        retire(&pool, "w0", now).await;
        retire(&pool, "w1", now).await;
        assert_eq!(
            pool.snapshot("w0").await.unwrap().state,
            WalletState::Retired
        );
        assert_eq!(
            pool.snapshot("w1").await.unwrap().state,
            WalletState::Retired
        );

        // 100 consecutive selections all return the remaining wallet
        for _ in 0..100 {
            let r = pool.reserve_at(now).await.unwrap();
            assert_eq!(r.wallet_id, "w2");
            let snap = pool.snapshot(&r.wallet_id).await.unwrap();
            assert_eq!(snap.state, WalletState::Active);
            pool.release(&r.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_exhaustion_is_an_error() {
        let now = Utc::now();
        let pool = seeded_pool(1).await;
        let _held = pool.reserve_at(now).await.unwrap();

        let err = pool.reserve_at(now).await.unwrap_err();
        assert!(matches!(err, Error::WalletPoolExhausted { .. }));
    }

    #[tokio::test]
    async fn test_reservation_exclusivity() {
        let now = Utc::now();
        let pool = seeded_pool(2).await;

        let a = pool.reserve_at(now).await.unwrap();
        let b = pool.reserve_at(now).await.unwrap();
        assert_ne!(a.wallet_id, b.wallet_id);
    }

    #[tokio::test]
    async fn test_reputation_monotone_per_direction() {
        let now = Utc::now();
        let pool = seeded_pool(1).await;

        let before = pool.snapshot("w0").await.unwrap().reputation;
        let r = pool.reserve_at(now).await.unwrap();
        pool.commit_at(&r.id, true, &[], now).await.unwrap();
        let after_success = pool.snapshot("w0").await.unwrap().reputation;
        assert!(after_success > before);
        assert!(after_success <= 1.0);

        let r = pool.reserve_at(now).await.unwrap();
        pool.commit_at(&r.id, false, &[], now).await.unwrap();
        let after_failure = pool.snapshot("w0").await.unwrap().reputation;
        assert!(after_failure < after_success);
        assert!(after_failure >= 0.0);
    }

    #[tokio::test]
    async fn test_release_is_side_effect_free() {
        let now = Utc::now();
        let pool = seeded_pool(1).await;

        let before = pool.snapshot("w0").await.unwrap();
        let r = pool.reserve_at(now).await.unwrap();
        pool.release(&r.id).await.unwrap();
        let after = pool.snapshot("w0").await.unwrap();

        assert_eq!(after.last_used_at, before.last_used_at);
        assert_eq!(after.reputation, before.reputation);
        assert_eq!(after.transactions_sent, before.transactions_sent);
    }

    #[tokio::test]
    async fn test_cooldown_expiry_promotes_lazily() {
        let now = Utc::now();
        let pool = seeded_pool(1).await;

        pool.set_cooldown_at("w0", Duration::minutes(10), now).await.unwrap();
        assert!(pool.reserve_at(now).await.is_err());

        let later = now + Duration::minutes(11);
        let r = pool.reserve_at(later).await.unwrap();
        assert_eq!(r.wallet_id, "w0");
    }

    #[tokio::test]
    async fn test_retirement_is_one_way() {
        let now = Utc::now();
        let pool = seeded_pool(1).await;

        let r = pool.reserve_at(now).await.unwrap();
        pool.commit_at(
            &r.id,
            false,
            &[FlagKind::ExchangeFlag; 4],
            now,
        )
        .await
        .unwrap();
        assert_eq!(
            pool.snapshot("w0").await.unwrap().state,
            WalletState::Retired
        );

        // Cooldown on a retired wallet is a no-op, never reactivates it
        pool.set_cooldown_at("w0", Duration::seconds(0), now).await.unwrap();
        assert_eq!(
            pool.snapshot("w0").await.unwrap().state,
            WalletState::Retired
        );
        assert!(pool.reserve_at(now + Duration::hours(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_idle_wallet_preferred() {
        let now = Utc::now();
        let pool = seeded_pool(2).await;

        // Use w-something, then both are idle except the used one
        let r = pool.reserve_at(now).await.unwrap();
        let first = r.wallet_id.clone();
        pool.commit_at(&r.id, true, &[], now).await.unwrap();

        // Shortly after, the never-used wallet should win on age factor
        let r2 = pool.reserve_at(now + Duration::seconds(5)).await.unwrap();
        assert_ne!(r2.wallet_id, first);
    }

    #[test]
    fn test_stats_idempotent() {
        tokio_test::block_on(async {
            let pool = seeded_pool(3).await;
            let a = pool.stats().await;
            let b = pool.stats().await;
            assert_eq!(a, b);
            assert_eq!(a.total, 3);
            assert_eq!(a.active, 3);
        });
    }

    #[tokio::test]
    async fn test_manager_routes_by_network() {
        let manager = WalletPoolManager::new(WalletPoolConfig::default(), Some(1)).unwrap();
        manager.register(WalletRecord::new("w0", "mainnet")).await.unwrap();
        manager.register(WalletRecord::new("w1", "base")).await.unwrap();

        assert_eq!(manager.stats("mainnet").await.unwrap().total, 1);
        assert_eq!(manager.stats("base").await.unwrap().total, 1);
        assert!(manager.pool("unknown").is_err());
    }

    #[test]
    fn test_config_validation() {
        let mut config = WalletPoolConfig::default();
        assert!(config.validate().is_ok());
        config.reward_rate = 1.5;
        assert!(config.validate().is_err());
    }
}
