//! Profile advisor capability
//!
//! An optional, possibly slow, possibly unavailable external service that
//! may recommend the next behavioral profile. The orchestrator always
//! calls it under a hard timeout and treats any failure as a cue to fall
//! back to rule-based selection; advisor absence must never prevent a
//! decision.

use async_trait::async_trait;

use crate::error::{Error, Result};

/// Context handed to the advisor for a rotation decision
#[derive(Debug, Clone)]
pub struct AdvisorContext {
    pub network: String,
    pub current_profile_id: String,
    pub risk_level: f64,
    pub candidate_profile_ids: Vec<String>,
}

/// An advisor's recommendation
#[derive(Debug, Clone)]
pub struct ProfileSuggestion {
    pub profile_id: String,
    /// Confidence in [0, 1]; low-confidence suggestions are ignored
    pub confidence: f64,
}

/// External profile recommendation service
#[async_trait]
pub trait ProfileAdvisor: Send + Sync {
    async fn suggest_profile(&self, ctx: &AdvisorContext) -> Result<ProfileSuggestion>;
}

/// Always-unavailable stub; forces the rule-based fallback
pub struct NullAdvisor;

#[async_trait]
impl ProfileAdvisor for NullAdvisor {
    async fn suggest_profile(&self, _ctx: &AdvisorContext) -> Result<ProfileSuggestion> {
        Err(Error::AdvisorUnavailable("no advisor configured".to_string()))
    }
}
