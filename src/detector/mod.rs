//! Anti-correlation pattern detector
//!
//! The system watches its own output: every produced parameter set is
//! quantized into a (delay, amount, slippage) bucket tuple and folded into
//! two bounded sliding windows, one per (wallet, profile) and one per
//! (network, profile) across all wallets, so a profile repeating itself
//! through wallet rotation is still caught. A tuple repeating past the
//! tolerance in either window raises a SelfDetectedPattern signal, which
//! feeds the per-network risk level with exponential decay so stale
//! detections stop influencing decisions.
//!
//! Observation must never block the decision path: `observe` enqueues on
//! an unbounded channel and a background worker does the folding.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::shaping::TransactionParameters;

/// Kind of detection evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    RejectedTransaction,
    UnusualLatencyReported,
    ExchangeFlag,
    SelfDetectedPattern,
}

/// Evidence that the transaction stream may have been flagged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSignal {
    pub kind: SignalKind,
    pub network: String,
    pub timestamp: DateTime<Utc>,
    /// Severity in [0, 1]
    pub severity: f64,
}

/// Observability snapshot of one network's risk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub network: String,
    pub current_level: f64,
    pub recent_signals: Vec<DetectionSignal>,
    pub last_profile_rotation_at: Option<DateTime<Utc>>,
}

/// Detector configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Max operations kept per (wallet, profile) window
    #[serde(default = "default_window_len")]
    pub window_len: usize,

    /// Max age of window entries, in hours
    #[serde(default = "default_window_age_hours")]
    pub window_age_hours: u64,

    /// Tuple repeats tolerated within a window before signaling
    #[serde(default = "default_max_repeats")]
    pub max_repeats_per_window: usize,

    /// Delay quantization width, in milliseconds
    #[serde(default = "default_delay_bucket_ms")]
    pub delay_bucket_ms: u64,

    /// Slippage quantization width, in percent
    #[serde(default = "default_slippage_bucket_pct")]
    pub slippage_bucket_pct: f64,

    /// Risk half-life, in seconds
    #[serde(default = "default_risk_half_life_secs")]
    pub risk_half_life_secs: u64,

    /// Severity added per repeat beyond the tolerance
    #[serde(default = "default_severity_per_excess")]
    pub severity_per_excess: f64,

    /// Bound on the recent-signal history per network
    #[serde(default = "default_max_recent_signals")]
    pub max_recent_signals: usize,
}

fn default_window_len() -> usize {
    50
}
fn default_window_age_hours() -> u64 {
    24
}
fn default_max_repeats() -> usize {
    3
}
fn default_delay_bucket_ms() -> u64 {
    1000
}
fn default_slippage_bucket_pct() -> f64 {
    0.25
}
fn default_risk_half_life_secs() -> u64 {
    1800
}
fn default_severity_per_excess() -> f64 {
    0.25
}
fn default_max_recent_signals() -> usize {
    32
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_len: default_window_len(),
            window_age_hours: default_window_age_hours(),
            max_repeats_per_window: default_max_repeats(),
            delay_bucket_ms: default_delay_bucket_ms(),
            slippage_bucket_pct: default_slippage_bucket_pct(),
            risk_half_life_secs: default_risk_half_life_secs(),
            severity_per_excess: default_severity_per_excess(),
            max_recent_signals: default_max_recent_signals(),
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.window_len == 0 {
            return Err(Error::Config("window_len must be positive".to_string()));
        }
        if self.max_repeats_per_window == 0 {
            return Err(Error::Config(
                "max_repeats_per_window must be positive".to_string(),
            ));
        }
        if self.delay_bucket_ms == 0 || self.slippage_bucket_pct <= 0.0 {
            return Err(Error::Config(
                "detector bucket widths must be positive".to_string(),
            ));
        }
        if self.risk_half_life_secs == 0 {
            return Err(Error::Config(
                "risk_half_life_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Quantized parameter tuple
type BucketTuple = (i64, i64, i64);

/// One observed parameterization, queued for the worker
#[derive(Debug, Clone)]
pub struct Observation {
    pub network: String,
    pub wallet_id: String,
    pub profile_id: String,
    pub tuple: BucketTuple,
    pub at: DateTime<Utc>,
}

enum WorkerMsg {
    Observe(Observation),
    Flush(oneshot::Sender<()>),
}

/// Exponentially decaying level with bounded signal history
struct RiskEntry {
    level: f64,
    updated_at: DateTime<Utc>,
    recent: VecDeque<DetectionSignal>,
    last_rotation_at: Option<DateTime<Utc>>,
}

impl RiskEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            level: 0.0,
            updated_at: now,
            recent: VecDeque::new(),
            last_rotation_at: None,
        }
    }

    fn decayed_level(&self, now: DateTime<Utc>, half_life_secs: u64) -> f64 {
        let dt = (now - self.updated_at).num_milliseconds().max(0) as f64 / 1000.0;
        self.level * 0.5_f64.powf(dt / half_life_secs as f64)
    }
}

type TupleWindow = VecDeque<(BucketTuple, DateTime<Utc>)>;

struct DetectorShared {
    config: DetectorConfig,
    /// Sliding tuple windows per (wallet, profile)
    windows: DashMap<(String, String), TupleWindow>,
    /// Cross-wallet sliding tuple windows per (network, profile); catches
    /// a profile repeating itself through wallet rotation
    profile_windows: DashMap<(String, String), TupleWindow>,
    /// Per-network risk
    risk: DashMap<String, Mutex<RiskEntry>>,
    /// Per-(network, profile) risk, for rotation scoring
    profile_risk: DashMap<(String, String), Mutex<RiskEntry>>,
}

impl DetectorShared {
    fn apply(&self, obs: Observation) {
        let max_age = Duration::hours(self.config.window_age_hours as i64);

        let wallet_repeats = Self::fold(
            &self.windows,
            (obs.wallet_id.clone(), obs.profile_id.clone()),
            obs.tuple,
            obs.at,
            self.config.window_len,
            max_age,
        );
        let profile_repeats = Self::fold(
            &self.profile_windows,
            (obs.network.clone(), obs.profile_id.clone()),
            obs.tuple,
            obs.at,
            self.config.window_len,
            max_age,
        );
        let repeats = wallet_repeats.max(profile_repeats);

        if repeats > self.config.max_repeats_per_window {
            let excess = repeats - self.config.max_repeats_per_window;
            let severity = (excess as f64 * self.config.severity_per_excess).min(1.0);
            warn!(
                wallet = %obs.wallet_id,
                profile = %obs.profile_id,
                network = %obs.network,
                repeats,
                severity,
                "Self-detected parameter pattern"
            );
            let signal = DetectionSignal {
                kind: SignalKind::SelfDetectedPattern,
                network: obs.network.clone(),
                timestamp: obs.at,
                severity,
            };
            self.add_signal(&signal);
            self.add_profile_signal(&obs.network, &obs.profile_id, &signal);
        }
    }

    /// Push one tuple into the keyed window, trim it, and count how often
    /// that tuple now occurs in it.
    fn fold(
        map: &DashMap<(String, String), TupleWindow>,
        key: (String, String),
        tuple: BucketTuple,
        at: DateTime<Utc>,
        window_len: usize,
        max_age: Duration,
    ) -> usize {
        let mut window = map.entry(key).or_default();
        window.push_back((tuple, at));
        while window.len() > window_len {
            window.pop_front();
        }
        while window
            .front()
            .map(|(_, t)| at - *t > max_age)
            .unwrap_or(false)
        {
            window.pop_front();
        }
        window.iter().filter(|(t, _)| *t == tuple).count()
    }

    fn add_signal(&self, signal: &DetectionSignal) {
        let entry = self
            .risk
            .entry(signal.network.clone())
            .or_insert_with(|| Mutex::new(RiskEntry::new(signal.timestamp)));
        let mut risk = entry.lock().expect("risk lock");
        risk.level = (risk
            .decayed_level(signal.timestamp, self.config.risk_half_life_secs)
            + signal.severity)
            .min(1.0);
        risk.updated_at = signal.timestamp;
        risk.recent.push_back(signal.clone());
        while risk.recent.len() > self.config.max_recent_signals {
            risk.recent.pop_front();
        }
    }

    fn add_profile_signal(&self, network: &str, profile_id: &str, signal: &DetectionSignal) {
        let entry = self
            .profile_risk
            .entry((network.to_string(), profile_id.to_string()))
            .or_insert_with(|| Mutex::new(RiskEntry::new(signal.timestamp)));
        let mut risk = entry.lock().expect("profile risk lock");
        risk.level = (risk
            .decayed_level(signal.timestamp, self.config.risk_half_life_secs)
            + signal.severity)
            .min(1.0);
        risk.updated_at = signal.timestamp;
    }
}

/// Pattern detector with a non-blocking observation path
pub struct PatternDetector {
    shared: Arc<DetectorShared>,
    tx: mpsc::UnboundedSender<WorkerMsg>,
}

impl PatternDetector {
    /// Create the detector and spawn its observation worker.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(DetectorShared {
            config,
            windows: DashMap::new(),
            profile_windows: DashMap::new(),
            risk: DashMap::new(),
            profile_risk: DashMap::new(),
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerMsg>();
        let worker_shared = shared.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    WorkerMsg::Observe(obs) => worker_shared.apply(obs),
                    WorkerMsg::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Pattern detector worker stopped");
        });

        Ok(Self { shared, tx })
    }

    /// Quantize and enqueue a produced parameter set. Fire-and-forget:
    /// never blocks the caller.
    pub fn observe(&self, params: &TransactionParameters, profile_id: &str, at: DateTime<Utc>) {
        let obs = Observation {
            network: params.network.clone(),
            wallet_id: params.wallet_id.clone(),
            profile_id: profile_id.to_string(),
            tuple: self.bucketize(params),
            at,
        };
        // Send only fails when the worker is gone (shutdown)
        let _ = self.tx.send(WorkerMsg::Observe(obs));
    }

    /// Inject an externally observed signal (executor feedback, venue flags)
    pub fn report_signal(&self, signal: DetectionSignal) {
        self.shared.add_signal(&signal);
    }

    /// Current decayed risk level for a network
    pub fn risk_level(&self, network: &str, now: DateTime<Utc>) -> f64 {
        self.shared
            .risk
            .get(network)
            .map(|entry| {
                entry
                    .lock()
                    .expect("risk lock")
                    .decayed_level(now, self.shared.config.risk_half_life_secs)
            })
            .unwrap_or(0.0)
    }

    /// Current decayed risk attributable to one profile on a network
    pub fn profile_risk(&self, network: &str, profile_id: &str, now: DateTime<Utc>) -> f64 {
        self.shared
            .profile_risk
            .get(&(network.to_string(), profile_id.to_string()))
            .map(|entry| {
                entry
                    .lock()
                    .expect("profile risk lock")
                    .decayed_level(now, self.shared.config.risk_half_life_secs)
            })
            .unwrap_or(0.0)
    }

    /// Record that the active profile rotated on a network
    pub fn mark_rotation(&self, network: &str, now: DateTime<Utc>) {
        let entry = self
            .shared
            .risk
            .entry(network.to_string())
            .or_insert_with(|| Mutex::new(RiskEntry::new(now)));
        entry.lock().expect("risk lock").last_rotation_at = Some(now);
    }

    /// Last rotation time for a network, if any
    pub fn last_rotation_at(&self, network: &str) -> Option<DateTime<Utc>> {
        self.shared
            .risk
            .get(network)
            .and_then(|entry| entry.lock().expect("risk lock").last_rotation_at)
    }

    /// Idempotent snapshot of one network's risk state
    pub fn risk_state(&self, network: &str, now: DateTime<Utc>) -> RiskState {
        match self.shared.risk.get(network) {
            Some(entry) => {
                let risk = entry.lock().expect("risk lock");
                RiskState {
                    network: network.to_string(),
                    current_level: risk.decayed_level(now, self.shared.config.risk_half_life_secs),
                    recent_signals: risk.recent.iter().cloned().collect(),
                    last_profile_rotation_at: risk.last_rotation_at,
                }
            }
            None => RiskState {
                network: network.to_string(),
                current_level: 0.0,
                recent_signals: Vec::new(),
                last_profile_rotation_at: None,
            },
        }
    }

    /// Wait until all queued observations have been folded in.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WorkerMsg::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    fn bucketize(&self, params: &TransactionParameters) -> BucketTuple {
        let delay_bucket = (params.delay_ms / self.shared.config.delay_bucket_ms) as i64;
        // Amounts bucket multiplicatively so the grouping is scale-free
        let amount_bucket = (params.amount.max(f64::MIN_POSITIVE).log10() * 10.0).round() as i64;
        let slippage_bucket =
            (params.slippage_tolerance_pct / self.shared.config.slippage_bucket_pct).round() as i64;
        (delay_bucket, amount_bucket, slippage_bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(delay_ms: u64, amount: f64, slippage: f64) -> TransactionParameters {
        params_for("w0", delay_ms, amount, slippage)
    }

    fn params_for(wallet: &str, delay_ms: u64, amount: f64, slippage: f64) -> TransactionParameters {
        TransactionParameters {
            operation_id: "op".to_string(),
            transaction_id: "tx".to_string(),
            wallet_id: wallet.to_string(),
            network: "mainnet".to_string(),
            token: "TOKEN".to_string(),
            amount,
            delay_ms,
            slippage_tolerance_pct: slippage,
            gas_multiplier: 1.2,
            uses_limit_order: false,
            is_dust_transaction: false,
            split_index: 1,
            split_total: 1,
        }
    }

    #[tokio::test]
    async fn test_repeated_tuple_raises_risk() {
        let detector = PatternDetector::new(DetectorConfig::default()).unwrap();
        let now = Utc::now();

        let before = detector.risk_level("mainnet", now);
        // max_repeats_per_window = 3; the 4th identical tuple must signal
        for _ in 0..4 {
            detector.observe(&params(5000, 10.0, 1.5), "p1", now);
        }
        detector.flush().await;

        let after = detector.risk_level("mainnet", now);
        assert!(after > before, "risk {} -> {}", before, after);
        assert!(detector.profile_risk("mainnet", "p1", now) > 0.0);
    }

    #[tokio::test]
    async fn test_profile_repeats_across_wallets_detected() {
        let detector = PatternDetector::new(DetectorConfig::default()).unwrap();
        let now = Utc::now();

        // One repeat per wallet stays under the per-wallet tolerance, but
        // the cross-wallet profile window sees all four
        for wallet in ["w0", "w1", "w2", "w3"] {
            detector.observe(&params_for(wallet, 5000, 10.0, 1.5), "p1", now);
        }
        detector.flush().await;

        assert!(detector.risk_level("mainnet", now) > 0.0);
        assert!(detector.profile_risk("mainnet", "p1", now) > 0.0);
    }

    #[tokio::test]
    async fn test_varied_tuples_stay_quiet() {
        let detector = PatternDetector::new(DetectorConfig::default()).unwrap();
        let now = Utc::now();

        for i in 0..20u64 {
            detector.observe(&params(1000 + i * 3000, 10.0 * (i + 1) as f64, 1.0), "p1", now);
        }
        detector.flush().await;

        assert_eq!(detector.risk_level("mainnet", now), 0.0);
    }

    #[tokio::test]
    async fn test_severity_proportional_to_excess() {
        let config = DetectorConfig::default();
        let d1 = PatternDetector::new(config.clone()).unwrap();
        let d2 = PatternDetector::new(config).unwrap();
        let now = Utc::now();

        for _ in 0..4 {
            d1.observe(&params(5000, 10.0, 1.5), "p1", now);
        }
        for _ in 0..8 {
            d2.observe(&params(5000, 10.0, 1.5), "p1", now);
        }
        d1.flush().await;
        d2.flush().await;

        assert!(d2.risk_level("mainnet", now) > d1.risk_level("mainnet", now));
    }

    #[tokio::test]
    async fn test_risk_decays_over_time() {
        let detector = PatternDetector::new(DetectorConfig::default()).unwrap();
        let now = Utc::now();

        detector.report_signal(DetectionSignal {
            kind: SignalKind::ExchangeFlag,
            network: "mainnet".to_string(),
            timestamp: now,
            severity: 0.8,
        });

        let fresh = detector.risk_level("mainnet", now);
        let half_life = Duration::seconds(1800);
        let later = detector.risk_level("mainnet", now + half_life);
        let much_later = detector.risk_level("mainnet", now + half_life * 8);

        assert!((fresh - 0.8).abs() < 1e-9);
        assert!((later - 0.4).abs() < 1e-6);
        assert!(much_later < 0.01);
    }

    #[tokio::test]
    async fn test_risk_state_idempotent_reads() {
        let detector = PatternDetector::new(DetectorConfig::default()).unwrap();
        let now = Utc::now();

        detector.report_signal(DetectionSignal {
            kind: SignalKind::RejectedTransaction,
            network: "mainnet".to_string(),
            timestamp: now,
            severity: 0.3,
        });

        let a = detector.risk_state("mainnet", now);
        let b = detector.risk_state("mainnet", now);
        assert_eq!(a.current_level, b.current_level);
        assert_eq!(a.recent_signals.len(), b.recent_signals.len());
    }

    #[tokio::test]
    async fn test_signal_level_saturates_at_one() {
        let detector = PatternDetector::new(DetectorConfig::default()).unwrap();
        let now = Utc::now();

        for _ in 0..10 {
            detector.report_signal(DetectionSignal {
                kind: SignalKind::ExchangeFlag,
                network: "mainnet".to_string(),
                timestamp: now,
                severity: 0.5,
            });
        }
        assert!(detector.risk_level("mainnet", now) <= 1.0);
    }

    #[tokio::test]
    async fn test_recent_signals_bounded() {
        let config = DetectorConfig {
            max_recent_signals: 4,
            ..Default::default()
        };
        let detector = PatternDetector::new(config).unwrap();
        let now = Utc::now();

        for _ in 0..10 {
            detector.report_signal(DetectionSignal {
                kind: SignalKind::UnusualLatencyReported,
                network: "mainnet".to_string(),
                timestamp: now,
                severity: 0.01,
            });
        }
        assert_eq!(detector.risk_state("mainnet", now).recent_signals.len(), 4);
    }

    #[tokio::test]
    async fn test_window_is_bounded_by_length() {
        let config = DetectorConfig {
            window_len: 5,
            max_repeats_per_window: 3,
            ..Default::default()
        };
        let detector = PatternDetector::new(config).unwrap();
        let now = Utc::now();

        // 3 repeats, then 5 different tuples push them out of the window,
        // then 3 more repeats: never more than 3 in-window at once.
        for _ in 0..3 {
            detector.observe(&params(5000, 10.0, 1.5), "p1", now);
        }
        for i in 0..5u64 {
            detector.observe(&params(20_000 + i * 5000, 500.0, 3.0), "p1", now);
        }
        for _ in 0..3 {
            detector.observe(&params(5000, 10.0, 1.5), "p1", now);
        }
        detector.flush().await;

        assert_eq!(detector.risk_level("mainnet", now), 0.0);
    }

    #[test]
    fn test_config_validation() {
        let mut config = DetectorConfig::default();
        assert!(config.validate().is_ok());
        config.window_len = 0;
        assert!(config.validate().is_err());
    }
}
