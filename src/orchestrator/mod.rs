//! Decision orchestrator
//!
//! The single entry point of the core. For each operation intent it
//! checks session admissibility, rotates the active profile when risk or
//! age demands it (advisor under a hard timeout, rule-based fallback with
//! hysteresis), reserves a wallet, shapes the transaction parameters, and
//! feeds the pattern detector. Outcomes reported by the executor flow
//! back through `report_outcome` into wallet reputation and risk.

pub mod advisor;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::detector::{DetectionSignal, PatternDetector, RiskState, SignalKind};
use crate::error::{Error, Result};
use crate::jitter::Jitter;
use crate::profile::{PatternSelector, ProfileSet};
use crate::session::{Admission, SessionSimulator};
use crate::shaping::{OperationIntent, ShapingConfig, ShapingEngine, TransactionParameters};
use crate::wallet::{FlagKind, WalletPoolManager, WalletPoolStats};

pub use advisor::{AdvisorContext, NullAdvisor, ProfileAdvisor, ProfileSuggestion};

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Profile used for a network until the first rotation
    pub initial_profile: String,

    /// Risk level above which rotation is attempted
    #[serde(default = "default_rotate_up_threshold")]
    pub rotate_up_threshold: f64,

    /// Rotation is attempted once the active profile is older than this
    #[serde(default = "default_max_profile_age_minutes")]
    pub max_profile_age_minutes: u64,

    /// Performance vs. discretion trade-off in [0, 1]; 1 is all throughput
    #[serde(default = "default_performance_priority")]
    pub performance_priority: f64,

    /// A challenger must beat the incumbent by this margin to rotate
    #[serde(default = "default_hysteresis_margin")]
    pub hysteresis_margin: f64,

    /// Hard budget for one advisor call, in milliseconds
    #[serde(default = "default_advisor_timeout_ms")]
    pub advisor_timeout_ms: u64,

    /// Advisor suggestions below this confidence are ignored
    #[serde(default = "default_min_advisor_confidence")]
    pub min_advisor_confidence: f64,
}

fn default_rotate_up_threshold() -> f64 {
    0.5
}
fn default_max_profile_age_minutes() -> u64 {
    240
}
fn default_performance_priority() -> f64 {
    0.5
}
fn default_hysteresis_margin() -> f64 {
    0.10
}
fn default_advisor_timeout_ms() -> u64 {
    500
}
fn default_min_advisor_confidence() -> f64 {
    0.7
}

impl OrchestratorConfig {
    pub fn new(initial_profile: impl Into<String>) -> Self {
        Self {
            initial_profile: initial_profile.into(),
            rotate_up_threshold: default_rotate_up_threshold(),
            max_profile_age_minutes: default_max_profile_age_minutes(),
            performance_priority: default_performance_priority(),
            hysteresis_margin: default_hysteresis_margin(),
            advisor_timeout_ms: default_advisor_timeout_ms(),
            min_advisor_confidence: default_min_advisor_confidence(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_profile.is_empty() {
            return Err(Error::Config("initial_profile must be set".to_string()));
        }
        if !(0.0..=1.0).contains(&self.performance_priority) {
            return Err(Error::Config(
                "performance_priority must be within [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.rotate_up_threshold) {
            return Err(Error::Config(
                "rotate_up_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.hysteresis_margin < 0.0 {
            return Err(Error::Config(
                "hysteresis_margin must be >= 0".to_string(),
            ));
        }
        if self.advisor_timeout_ms == 0 {
            return Err(Error::Config(
                "advisor_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of one decide call
#[derive(Debug, Clone)]
pub enum Decision {
    /// Parameters ready for the executor, in submission order
    Ready {
        operation_id: String,
        wallet_id: String,
        params: Vec<TransactionParameters>,
    },

    /// Not an error: re-poll no earlier than `until`
    Deferred { until: DateTime<Utc> },
}

struct ActiveProfile {
    profile_id: String,
    since: DateTime<Utc>,
}

/// Mutable shaping state owned by one (profile, network) pair. Locking
/// it doubles as the pair's FIFO section: tokio mutexes wake waiters in
/// acquisition order, and pairs never share a lock, so no cross-network
/// serialization point exists.
struct PairState {
    engine: ShapingEngine,
    selector: PatternSelector,
    jitter: Jitter,
}

/// Aggregate outcome state for one operation; every sub-transaction of a
/// split shares it, and the wallet reservation commits once the final
/// part has reported.
struct InflightOperation {
    reservation_id: String,
    network: String,
    remaining: usize,
    all_succeeded: bool,
    flags: Vec<FlagKind>,
}

/// The decision core's entry point
pub struct Orchestrator {
    profiles: ProfileSet,
    wallets: Arc<WalletPoolManager>,
    sessions: SessionSimulator,
    detector: PatternDetector,
    advisor: Arc<dyn ProfileAdvisor>,
    config: OrchestratorConfig,
    shaping: ShapingConfig,
    seed: Option<u64>,

    /// Active profile per network
    active: DashMap<String, ActiveProfile>,

    /// Per-pair shaping state and FIFO lock
    pairs: DashMap<(String, String), Arc<Mutex<PairState>>>,

    /// Outstanding sub-transactions awaiting an executor outcome, keyed
    /// by transaction id; parts of one operation share the aggregate
    inflight: DashMap<String, Arc<Mutex<InflightOperation>>>,
}

impl Orchestrator {
    /// Assemble the core. Must be called within a tokio runtime (the
    /// pattern detector spawns its observation worker).
    pub fn new(
        profiles: ProfileSet,
        wallets: Arc<WalletPoolManager>,
        shaping: ShapingConfig,
        detector: PatternDetector,
        advisor: Arc<dyn ProfileAdvisor>,
        config: OrchestratorConfig,
        seed: Option<u64>,
    ) -> Result<Self> {
        config.validate()?;
        shaping.validate()?;
        // Fail at startup, not on the first decide
        profiles.get(&config.initial_profile)?;

        Ok(Self {
            profiles,
            wallets,
            sessions: SessionSimulator::new(seed),
            detector,
            advisor,
            config,
            shaping,
            seed,
            active: DashMap::new(),
            pairs: DashMap::new(),
            inflight: DashMap::new(),
        })
    }

    /// Decide what, when, and with which wallet to execute for an intent.
    pub async fn decide(&self, intent: &OperationIntent) -> Result<Decision> {
        self.decide_at(intent, Utc::now()).await
    }

    /// Clock-explicit variant of [`decide`](Self::decide).
    pub async fn decide_at(&self, intent: &OperationIntent, now: DateTime<Utc>) -> Result<Decision> {
        let profile_id = self.resolve_profile(&intent.network, now).await;
        let profile = self.profiles.get(&profile_id)?;

        // Fail before touching session state when the network has no pool
        let pool = self.wallets.pool(&intent.network)?;

        // Per-pair FIFO section: admission through observation
        let pair = self.pair_state(&profile_id, &intent.network);
        let mut state = pair.lock().await;
        let state = &mut *state;

        match self.sessions.admission(profile, &intent.network, now).await {
            Admission::Deferred { until } => {
                debug!(
                    network = %intent.network,
                    profile = %profile_id,
                    %until,
                    "Operation deferred by session simulator"
                );
                return Ok(Decision::Deferred { until });
            }
            Admission::Admitted => {}
        }

        let operation_id = Uuid::new_v4().to_string();
        let reservation = pool.reserve_at(now).await?;

        let pattern = state.selector.select(profile, &mut state.jitter);
        let shaped =
            state
                .engine
                .shape(&operation_id, intent, profile, pattern, &reservation.wallet_id);

        let params = match shaped {
            Ok(params) => params,
            Err(e) => {
                // A failed call must not consume the wallet
                pool.release(&reservation.id).await?;
                warn!(network = %intent.network, error = %e, "Parameterization failed");
                return Err(e);
            }
        };

        self.sessions.record_operation(&profile_id, &intent.network).await;
        let op = Arc::new(Mutex::new(InflightOperation {
            reservation_id: reservation.id.clone(),
            network: intent.network.clone(),
            remaining: params.len(),
            all_succeeded: true,
            flags: Vec::new(),
        }));
        for p in &params {
            self.detector.observe(p, &profile_id, now);
            self.inflight.insert(p.transaction_id.clone(), op.clone());
        }

        debug!(
            network = %intent.network,
            profile = %profile_id,
            wallet = %reservation.wallet_id,
            parts = params.len(),
            "Operation parameterized"
        );

        Ok(Decision::Ready {
            operation_id,
            wallet_id: reservation.wallet_id,
            params,
        })
    }

    /// Executor feedback for one attempted sub-transaction.
    ///
    /// Sole input to wallet reputation and to external detection signals.
    /// Each `TransactionParameters` carries its own `transaction_id` and
    /// is reported exactly once; the wallet reservation commits with the
    /// aggregated outcome when the operation's final part reports.
    pub async fn report_outcome(
        &self,
        transaction_id: &str,
        success: bool,
        flags: &[FlagKind],
    ) -> Result<()> {
        self.report_outcome_at(transaction_id, success, flags, Utc::now()).await
    }

    /// Clock-explicit variant of [`report_outcome`](Self::report_outcome).
    pub async fn report_outcome_at(
        &self,
        transaction_id: &str,
        success: bool,
        flags: &[FlagKind],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let (_, op) = self
            .inflight
            .remove(transaction_id)
            .ok_or_else(|| Error::UnknownTransaction(transaction_id.to_string()))?;

        let mut state = op.lock().await;
        state.all_succeeded &= success;
        state.flags.extend_from_slice(flags);
        state.remaining -= 1;

        // Detection signals are injected per attempted transaction
        if !success && flags.is_empty() {
            self.detector.report_signal(DetectionSignal {
                kind: SignalKind::RejectedTransaction,
                network: state.network.clone(),
                timestamp: now,
                severity: 0.2,
            });
        }
        for flag in flags {
            self.detector.report_signal(DetectionSignal {
                kind: signal_kind_for(*flag),
                network: state.network.clone(),
                timestamp: now,
                severity: severity_for(*flag),
            });
        }

        if state.remaining == 0 {
            let pool = self.wallets.pool(&state.network)?;
            pool.commit_at(&state.reservation_id, state.all_succeeded, &state.flags, now)
                .await?;
            debug!(
                network = %state.network,
                success = state.all_succeeded,
                flags = state.flags.len(),
                "Operation outcome committed"
            );
        }
        Ok(())
    }

    /// Idempotent risk snapshot for a network
    pub fn risk_state(&self, network: &str) -> RiskState {
        self.detector.risk_state(network, Utc::now())
    }

    /// Idempotent wallet pool snapshot for a network
    pub async fn wallet_pool_stats(&self, network: &str) -> Result<WalletPoolStats> {
        self.wallets.stats(network).await
    }

    /// Stop all sessions permanently
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
        info!("Orchestrator shut down");
    }

    /// Active profile for a network, rotating first when risk or age says so
    async fn resolve_profile(&self, network: &str, now: DateTime<Utc>) -> String {
        let incumbent = self
            .active
            .entry(network.to_string())
            .or_insert_with(|| ActiveProfile {
                profile_id: self.config.initial_profile.clone(),
                since: now,
            })
            .profile_id
            .clone();

        let risk = self.detector.risk_level(network, now);
        let last_rotation = self
            .detector
            .last_rotation_at(network)
            .unwrap_or_else(|| self.active.get(network).map(|a| a.since).unwrap_or(now));
        let age = now - last_rotation;
        let max_age = Duration::minutes(self.config.max_profile_age_minutes as i64);

        if risk <= self.config.rotate_up_threshold && age < max_age {
            return incumbent;
        }

        let chosen = self.pick_profile(network, &incumbent, risk, now).await;
        // Attempt time counts even when the incumbent survives, so a
        // stalling advisor is not consulted on every subsequent call
        self.detector.mark_rotation(network, now);

        if chosen != incumbent {
            info!(network, from = %incumbent, to = %chosen, risk, "Rotated active profile");
            if let Some(mut entry) = self.active.get_mut(network) {
                entry.profile_id = chosen.clone();
                entry.since = now;
            }
        }
        chosen
    }

    /// Advisor first (under the hard budget), rule-based score as fallback
    async fn pick_profile(
        &self,
        network: &str,
        incumbent: &str,
        risk: f64,
        now: DateTime<Utc>,
    ) -> String {
        let ctx = AdvisorContext {
            network: network.to_string(),
            current_profile_id: incumbent.to_string(),
            risk_level: risk,
            candidate_profile_ids: self.profiles.ids().to_vec(),
        };

        let budget = std::time::Duration::from_millis(self.config.advisor_timeout_ms);
        match tokio::time::timeout(budget, self.advisor.suggest_profile(&ctx)).await {
            Ok(Ok(suggestion)) => {
                if suggestion.confidence >= self.config.min_advisor_confidence
                    && self.profiles.get(&suggestion.profile_id).is_ok()
                {
                    debug!(
                        network,
                        profile = %suggestion.profile_id,
                        confidence = suggestion.confidence,
                        "Adopting advisor suggestion"
                    );
                    return suggestion.profile_id;
                }
                debug!(
                    network,
                    confidence = suggestion.confidence,
                    "Advisor suggestion below confidence threshold, using fallback"
                );
            }
            Ok(Err(e)) => {
                debug!(network, error = %e, "Advisor unavailable, using fallback");
            }
            Err(_) => {
                warn!(
                    network,
                    budget_ms = self.config.advisor_timeout_ms,
                    "Advisor timed out, using fallback"
                );
            }
        }

        self.rule_based_pick(network, incumbent, now)
    }

    /// Deterministic fallback: blend throughput against profile risk,
    /// keep the incumbent unless a challenger clearly wins.
    fn rule_based_pick(&self, network: &str, incumbent: &str, now: DateTime<Utc>) -> String {
        let max_freq = self
            .profiles
            .iter()
            .map(|p| p.mean_tx_frequency())
            .fold(f64::MIN_POSITIVE, f64::max);

        let score = |profile_id: &str| -> f64 {
            let profile = match self.profiles.get(profile_id) {
                Ok(p) => p,
                Err(_) => return f64::NEG_INFINITY,
            };
            let throughput = profile.mean_tx_frequency() / max_freq;
            let profile_risk = self.detector.profile_risk(network, profile_id, now);
            self.config.performance_priority * throughput
                + (1.0 - self.config.performance_priority) * (1.0 - profile_risk)
        };

        let incumbent_score = score(incumbent);
        let mut best_id = incumbent.to_string();
        let mut best_score = incumbent_score;
        for id in self.profiles.ids() {
            let s = score(id);
            if s > best_score {
                best_score = s;
                best_id = id.clone();
            }
        }

        if best_id != incumbent && best_score - incumbent_score <= self.config.hysteresis_margin {
            return incumbent.to_string();
        }
        best_id
    }

    fn pair_state(&self, profile_id: &str, network: &str) -> Arc<Mutex<PairState>> {
        self.pairs
            .entry((profile_id.to_string(), network.to_string()))
            .or_insert_with(|| {
                let seed = pair_seed(self.seed, profile_id, network);
                Arc::new(Mutex::new(PairState {
                    engine: ShapingEngine::from_validated(self.shaping.clone(), seed),
                    selector: PatternSelector::new(),
                    jitter: Jitter::new(seed),
                }))
            })
            .clone()
    }
}

/// Derive a distinct deterministic seed per (profile, network) pair
fn pair_seed(seed: Option<u64>, profile_id: &str, network: &str) -> Option<u64> {
    use std::hash::{Hash, Hasher};

    seed.map(|s| {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        profile_id.hash(&mut hasher);
        network.hash(&mut hasher);
        s ^ hasher.finish()
    })
}

fn signal_kind_for(flag: FlagKind) -> SignalKind {
    match flag {
        FlagKind::RejectedTransaction => SignalKind::RejectedTransaction,
        FlagKind::UnusualLatency => SignalKind::UnusualLatencyReported,
        FlagKind::ExchangeFlag => SignalKind::ExchangeFlag,
        FlagKind::SelfDetectedPattern => SignalKind::SelfDetectedPattern,
    }
}

fn severity_for(flag: FlagKind) -> f64 {
    match flag {
        FlagKind::RejectedTransaction => 0.4,
        FlagKind::UnusualLatency => 0.3,
        FlagKind::ExchangeFlag => 0.5,
        FlagKind::SelfDetectedPattern => 0.4,
    }
}
