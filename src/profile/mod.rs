//! Behavioral profile model
//!
//! Immutable archetype definitions, validated loading, and weighted
//! pattern selection.

pub mod loader;
pub mod selector;
pub mod types;

pub use loader::{load_profiles, load_profiles_file, ProfileSet};
pub use selector::PatternSelector;
pub use types::{
    ExperienceLevel, GasBehavior, Profile, RandomizationFactors, RiskProfile, SessionHabits,
    TradingPattern,
};
