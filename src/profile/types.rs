//! Core types for behavioral profiles
//!
//! A profile is an immutable trading archetype: how a simulated human
//! splits orders, times them, sets slippage and gas, and paces sessions.
//! Profiles are created at load time and never mutated at runtime;
//! replacing one means loading a new version.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tolerance for split fractions summing to 1
pub const SPLIT_SUM_TOLERANCE: f64 = 1e-6;

/// Gas urgency class of a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GasBehavior {
    Economic,
    Normal,
    Aggressive,
}

impl GasBehavior {
    /// Gas multiplier bucket for this behavior class
    pub fn multiplier_bucket(&self) -> (f64, f64) {
        match self {
            GasBehavior::Economic => (1.0, 1.1),
            GasBehavior::Normal => (1.1, 1.3),
            GasBehavior::Aggressive => (1.3, 1.8),
        }
    }
}

impl std::fmt::Display for GasBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GasBehavior::Economic => write!(f, "economic"),
            GasBehavior::Normal => write!(f, "normal"),
            GasBehavior::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Risk appetite of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskProfile {
    Conservative,
    Balanced,
    Aggressive,
}

/// Simulated experience level of a profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Beginner,
    Intermediate,
    Expert,
}

/// One concrete parameter template within a profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingPattern {
    /// Pattern name for logging: "scalper-small"
    pub name: String,

    /// How a buy is divided across sub-transactions; fractions sum to 1
    pub entry_split: Vec<f64>,

    /// How a sell is divided across sub-transactions; fractions sum to 1
    pub exit_split: Vec<f64>,

    /// Min/max delay between sub-transactions, in seconds
    pub time_window_secs: (u64, u64),

    /// Gas urgency class
    pub gas_behavior: GasBehavior,

    /// Base slippage tolerance in percent
    pub slippage_tolerance_pct: f64,

    /// Plausible inter-transaction delays to draw from, in milliseconds
    pub typical_delays_ms: Vec<u64>,

    /// Long-run transaction frequency this pattern aims for
    pub tx_frequency_per_hour: f64,

    /// Whether this archetype chases pumps
    pub buys_during_pumps: bool,

    /// Whether this archetype panic-sells dumps
    pub sells_during_dumps: bool,

    /// Whether produced parameters request limit orders
    pub uses_limit_orders: bool,

    /// Opt-in for correlation-breaking dust transactions
    #[serde(default)]
    pub allows_dust: bool,
}

impl TradingPattern {
    /// Split fractions for the given direction
    pub fn split_for(&self, is_entry: bool) -> &[f64] {
        if is_entry {
            &self.entry_split
        } else {
            &self.exit_split
        }
    }

    /// Validate pattern internals; returns `Error::Config` on violation
    pub fn validate(&self) -> Result<()> {
        for (label, split) in [("entry_split", &self.entry_split), ("exit_split", &self.exit_split)] {
            if split.is_empty() {
                return Err(Error::Config(format!(
                    "pattern '{}': {} must not be empty",
                    self.name, label
                )));
            }
            if split.iter().any(|f| *f <= 0.0) {
                return Err(Error::Config(format!(
                    "pattern '{}': {} fractions must be positive",
                    self.name, label
                )));
            }
            let sum: f64 = split.iter().sum();
            if (sum - 1.0).abs() > SPLIT_SUM_TOLERANCE {
                return Err(Error::Config(format!(
                    "pattern '{}': {} sums to {}, expected 1.0",
                    self.name, label, sum
                )));
            }
        }
        if self.typical_delays_ms.is_empty() {
            return Err(Error::Config(format!(
                "pattern '{}': typical_delays_ms must not be empty",
                self.name
            )));
        }
        if self.time_window_secs.0 > self.time_window_secs.1 {
            return Err(Error::Config(format!(
                "pattern '{}': time_window_secs min > max",
                self.name
            )));
        }
        if self.slippage_tolerance_pct <= 0.0 {
            return Err(Error::Config(format!(
                "pattern '{}': slippage_tolerance_pct must be positive",
                self.name
            )));
        }
        if self.tx_frequency_per_hour <= 0.0 {
            return Err(Error::Config(format!(
                "pattern '{}': tx_frequency_per_hour must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

/// Session pacing habits of a profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionHabits {
    /// Min/max session length in minutes
    pub length_minutes: (u64, u64),

    /// Min/max sessions per day
    pub sessions_per_day: (u32, u32),

    /// Hours-of-day (0..=23, UTC) in which sessions may start
    pub preferred_hours: Vec<u8>,
}

impl SessionHabits {
    /// Check whether the given hour-of-day is a preferred one
    pub fn is_preferred_hour(&self, hour: u8) -> bool {
        self.preferred_hours.contains(&hour)
    }

    pub fn validate(&self) -> Result<()> {
        if self.length_minutes.0 == 0 || self.length_minutes.0 > self.length_minutes.1 {
            return Err(Error::Config(
                "session_habits: length_minutes must satisfy 0 < min <= max".to_string(),
            ));
        }
        if self.sessions_per_day.0 == 0 || self.sessions_per_day.0 > self.sessions_per_day.1 {
            return Err(Error::Config(
                "session_habits: sessions_per_day must satisfy 0 < min <= max".to_string(),
            ));
        }
        if self.preferred_hours.is_empty() {
            return Err(Error::Config(
                "session_habits: preferred_hours must not be empty".to_string(),
            ));
        }
        if self.preferred_hours.iter().any(|h| *h > 23) {
            return Err(Error::Config(
                "session_habits: preferred_hours entries must be 0..=23".to_string(),
            ));
        }
        Ok(())
    }
}

/// Fractional jitter bounds, each in the open interval (0, 1)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RandomizationFactors {
    /// Amount jitter bound
    pub amount: f64,

    /// Timing jitter bound
    pub timing: f64,

    /// Gas/urgency jitter bound (also perturbs slippage)
    pub gas: f64,
}

impl RandomizationFactors {
    pub fn validate(&self) -> Result<()> {
        for (label, v) in [("amount", self.amount), ("timing", self.timing), ("gas", self.gas)] {
            if v <= 0.0 || v >= 1.0 {
                return Err(Error::Config(format!(
                    "randomization factor '{}' = {} is outside (0, 1)",
                    label, v
                )));
            }
        }
        Ok(())
    }
}

/// A named behavioral archetype; immutable once loaded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// Unique identifier: "cautious-daytrader"
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Version, bumped when the profile is reloaded
    #[serde(default = "default_version")]
    pub version: u32,

    /// Risk appetite
    pub risk_profile: RiskProfile,

    /// Simulated experience level
    pub experience_level: ExperienceLevel,

    /// Parameter templates; one is selected per operation
    pub patterns: Vec<TradingPattern>,

    /// Session pacing habits
    pub session_habits: SessionHabits,

    /// Jitter bounds applied by the parameterization engine
    pub randomization: RandomizationFactors,
}

fn default_version() -> u32 {
    1
}

impl Profile {
    /// Validate the whole profile; returns `Error::Config` on violation
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::Config("profile id must not be empty".to_string()));
        }
        if self.patterns.is_empty() {
            return Err(Error::Config(format!(
                "profile '{}' has no patterns",
                self.id
            )));
        }
        for pattern in &self.patterns {
            pattern.validate()?;
        }
        self.session_habits.validate()?;
        self.randomization.validate()?;
        Ok(())
    }

    /// Mean pattern frequency, used by rotation scoring as a throughput proxy
    pub fn mean_tx_frequency(&self) -> f64 {
        let sum: f64 = self.patterns.iter().map(|p| p.tx_frequency_per_hour).sum();
        sum / self.patterns.len() as f64
    }
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    /// A valid profile for use across module tests
    pub fn sample_profile(id: &str) -> Profile {
        Profile {
            id: id.to_string(),
            name: format!("{} archetype", id),
            version: 1,
            risk_profile: RiskProfile::Balanced,
            experience_level: ExperienceLevel::Intermediate,
            patterns: vec![
                TradingPattern {
                    name: "split-scalp".to_string(),
                    entry_split: vec![0.4, 0.6],
                    exit_split: vec![1.0],
                    time_window_secs: (1, 600),
                    gas_behavior: GasBehavior::Normal,
                    slippage_tolerance_pct: 1.5,
                    typical_delays_ms: vec![800, 2_500, 7_000, 15_000],
                    tx_frequency_per_hour: 6.0,
                    buys_during_pumps: true,
                    sells_during_dumps: false,
                    uses_limit_orders: false,
                    allows_dust: false,
                },
                TradingPattern {
                    name: "single-shot".to_string(),
                    entry_split: vec![1.0],
                    exit_split: vec![0.5, 0.5],
                    time_window_secs: (2, 900),
                    gas_behavior: GasBehavior::Economic,
                    slippage_tolerance_pct: 0.8,
                    typical_delays_ms: vec![5_000, 20_000, 60_000],
                    tx_frequency_per_hour: 2.0,
                    buys_during_pumps: false,
                    sells_during_dumps: true,
                    uses_limit_orders: true,
                    allows_dust: true,
                },
            ],
            session_habits: SessionHabits {
                length_minutes: (20, 90),
                sessions_per_day: (2, 4),
                preferred_hours: (9..=17).collect(),
            },
            randomization: RandomizationFactors {
                amount: 0.1,
                timing: 0.2,
                gas: 0.15,
            },
        }
    }
}
