//! Pattern selection with anti-favoritism weighting
//!
//! Always favoring one pattern is itself a detectable regularity, so
//! selection weights each pattern by the inverse of its recent-use count
//! within a bounded window of past picks.

use std::collections::{HashMap, VecDeque};

use crate::jitter::Jitter;
use crate::profile::types::{Profile, TradingPattern};

/// Default number of recent picks remembered per profile
const DEFAULT_RECENT_WINDOW: usize = 32;

/// Weighted-random pattern selector with recent-use memory
pub struct PatternSelector {
    /// Recent pattern indices per profile id, oldest first
    recent: HashMap<String, VecDeque<usize>>,
    window: usize,
}

impl PatternSelector {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_RECENT_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            recent: HashMap::new(),
            window: window.max(1),
        }
    }

    /// Select a pattern for the profile; deterministic under a seeded jitter.
    ///
    /// Weight per pattern = 1 / (1 + uses within the recent window).
    pub fn select<'a>(&mut self, profile: &'a Profile, jitter: &mut Jitter) -> &'a TradingPattern {
        let index = if profile.patterns.len() == 1 {
            0
        } else {
            let history = self.recent.entry(profile.id.clone()).or_default();
            let weights: Vec<f64> = (0..profile.patterns.len())
                .map(|i| {
                    let uses = history.iter().filter(|u| **u == i).count();
                    1.0 / (1.0 + uses as f64)
                })
                .collect();
            jitter.choose_weighted_index(&weights)
        };

        let history = self.recent.entry(profile.id.clone()).or_default();
        history.push_back(index);
        while history.len() > self.window {
            history.pop_front();
        }

        &profile.patterns[index]
    }

    /// Recent-use count of a pattern index for a profile
    #[cfg(test)]
    fn recent_uses(&self, profile_id: &str, index: usize) -> usize {
        self.recent
            .get(profile_id)
            .map(|h| h.iter().filter(|u| **u == index).count())
            .unwrap_or(0)
    }
}

impl Default for PatternSelector {
    fn default() -> Self {
        Self::new()
    }
}
