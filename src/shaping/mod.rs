//! Parameterization engine
//!
//! Turns an operation intent plus a behavioral pattern into concrete,
//! individually jittered transaction parameters: one per split fraction,
//! or a single dust transaction when the pattern opts in and the dust
//! roll hits. Bounds violations are errors, never silent clamps — a
//! clamped value here would mean misconfiguration upstream.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::jitter::Jitter;
use crate::profile::{Profile, TradingPattern};

/// What the caller intends to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Buy,
    Sell,
}

/// An intended operation before shaping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationIntent {
    pub operation: OperationKind,

    /// Network the operation targets
    pub network: String,

    /// Token identifier, opaque to this core
    pub token: String,

    /// Total amount before splitting and jitter
    pub base_amount: f64,

    /// Entry uses the pattern's entry split, exit the exit split
    pub is_entry: bool,
}

/// Concrete parameters for one sub-transaction, consumed by the executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionParameters {
    /// Decide-call id shared by every part of a split series
    pub operation_id: String,

    /// Unique id of this sub-transaction; executor outcome reports
    /// reference it
    pub transaction_id: String,

    /// Selected wallet handle
    pub wallet_id: String,

    pub network: String,
    pub token: String,

    /// Jittered amount for this sub-transaction
    pub amount: f64,

    /// Delay before submission, in milliseconds
    pub delay_ms: u64,

    /// Jittered slippage tolerance in percent
    pub slippage_tolerance_pct: f64,

    /// Gas price multiplier sampled from the pattern's urgency bucket
    pub gas_multiplier: f64,

    pub uses_limit_order: bool,

    /// True for correlation-breaking dust transactions
    pub is_dust_transaction: bool,

    /// 1-based position within the split series
    pub split_index: usize,
    pub split_total: usize,
}

/// Shaping engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapingConfig {
    /// Hard ceiling on produced slippage, in percent
    #[serde(default = "default_max_slippage")]
    pub max_allowed_slippage_pct: f64,

    /// Probability of substituting a dust transaction, for opted-in patterns
    #[serde(default = "default_dust_probability")]
    pub dust_probability: f64,

    /// Amount used for dust transactions
    #[serde(default = "default_dust_amount")]
    pub dust_amount: f64,
}

fn default_max_slippage() -> f64 {
    5.0
}
fn default_dust_probability() -> f64 {
    0.03
}
fn default_dust_amount() -> f64 {
    1e-4
}

impl Default for ShapingConfig {
    fn default() -> Self {
        Self {
            max_allowed_slippage_pct: default_max_slippage(),
            dust_probability: default_dust_probability(),
            dust_amount: default_dust_amount(),
        }
    }
}

impl ShapingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_allowed_slippage_pct <= 0.0 {
            return Err(Error::Config(
                "max_allowed_slippage_pct must be positive".to_string(),
            ));
        }
        if !(0.0..=0.10).contains(&self.dust_probability) {
            return Err(Error::Config(
                "dust_probability must be within [0, 0.10]".to_string(),
            ));
        }
        if self.dust_amount <= 0.0 {
            return Err(Error::Config("dust_amount must be positive".to_string()));
        }
        Ok(())
    }
}

/// Produces jittered transaction parameters from intents
pub struct ShapingEngine {
    config: ShapingConfig,
    jitter: Jitter,
}

impl ShapingEngine {
    pub fn new(config: ShapingConfig, seed: Option<u64>) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_validated(config, seed))
    }

    /// Build from a config already validated at startup
    pub(crate) fn from_validated(config: ShapingConfig, seed: Option<u64>) -> Self {
        Self {
            config,
            jitter: Jitter::new(seed),
        }
    }

    /// Shape an intent into one parameter set per split fraction.
    ///
    /// Deterministic under a seeded engine; fresh randomness otherwise.
    /// Fails with `InvalidParameterBounds` when any produced amount would
    /// be non-positive or slippage leaves `(0, max_allowed_slippage_pct]`.
    pub fn shape(
        &mut self,
        operation_id: &str,
        intent: &OperationIntent,
        profile: &Profile,
        pattern: &TradingPattern,
        wallet_id: &str,
    ) -> Result<Vec<TransactionParameters>> {
        if intent.base_amount <= 0.0 {
            return Err(Error::InvalidParameterBounds(format!(
                "base_amount {} must be positive",
                intent.base_amount
            )));
        }

        // Dust substitution breaks amount-based correlation: a single
        // negligible transaction replaces the whole split series.
        if pattern.allows_dust && self.jitter.chance(self.config.dust_probability) {
            debug!(token = %intent.token, "Substituting dust transaction");
            let params = self.shape_one(
                operation_id,
                intent,
                profile,
                pattern,
                wallet_id,
                self.config.dust_amount,
                1,
                1,
                true,
            )?;
            return Ok(vec![params]);
        }

        let split = pattern.split_for(intent.is_entry);
        let mut out = Vec::with_capacity(split.len());
        for (i, fraction) in split.iter().enumerate() {
            // Amount jitter bound scales with the split's share
            let bound = profile.randomization.amount * fraction;
            let amount = intent.base_amount * fraction * self.jitter.factor(bound);
            out.push(self.shape_one(
                operation_id,
                intent,
                profile,
                pattern,
                wallet_id,
                amount,
                i + 1,
                split.len(),
                false,
            )?);
        }
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    fn shape_one(
        &mut self,
        operation_id: &str,
        intent: &OperationIntent,
        profile: &Profile,
        pattern: &TradingPattern,
        wallet_id: &str,
        amount: f64,
        split_index: usize,
        split_total: usize,
        is_dust: bool,
    ) -> Result<TransactionParameters> {
        if amount <= 0.0 {
            return Err(Error::InvalidParameterBounds(format!(
                "computed amount {} for split {}/{} is not positive",
                amount, split_index, split_total
            )));
        }

        let delay_ms = self.sample_delay(profile, pattern);
        let slippage = self.sample_slippage(profile, pattern)?;
        let (gas_min, gas_max) = pattern.gas_behavior.multiplier_bucket();
        let gas_multiplier = self.jitter.range_f64(gas_min, gas_max);

        Ok(TransactionParameters {
            operation_id: operation_id.to_string(),
            transaction_id: Uuid::new_v4().to_string(),
            wallet_id: wallet_id.to_string(),
            network: intent.network.clone(),
            token: intent.token.clone(),
            amount,
            delay_ms,
            slippage_tolerance_pct: slippage,
            gas_multiplier,
            uses_limit_order: pattern.uses_limit_orders,
            is_dust_transaction: is_dust,
            split_index,
            split_total,
        })
    }

    fn sample_delay(&mut self, profile: &Profile, pattern: &TradingPattern) -> u64 {
        let (min_s, max_s) = pattern.time_window_secs;
        // Validation keeps typical_delays_ms non-empty; fall back to the
        // window floor anyway rather than panic
        let base = self
            .jitter
            .choose(&pattern.typical_delays_ms)
            .copied()
            .unwrap_or(min_s * 1000);
        let jittered = base as f64 * self.jitter.factor(profile.randomization.timing);
        (jittered as u64).clamp(min_s * 1000, max_s * 1000)
    }

    fn sample_slippage(&mut self, profile: &Profile, pattern: &TradingPattern) -> Result<f64> {
        let slippage =
            pattern.slippage_tolerance_pct * self.jitter.factor(profile.randomization.gas);
        if slippage <= 0.0 {
            return Err(Error::InvalidParameterBounds(format!(
                "computed slippage {} is not positive",
                slippage
            )));
        }
        if slippage > self.config.max_allowed_slippage_pct {
            return Err(Error::InvalidParameterBounds(format!(
                "computed slippage {:.4}% exceeds ceiling {:.4}%",
                slippage, self.config.max_allowed_slippage_pct
            )));
        }
        Ok(slippage)
    }
}
