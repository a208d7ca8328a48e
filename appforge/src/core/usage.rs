//! Token/cost accounting and agent session continuity.

use serde::{Deserialize, Serialize};

/// Usage reported by one agent response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub cost_usd: f64,
}

/// Running sums for the lifetime of one pipeline run. Mutated only by
/// accumulation, never decremented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub cost_usd: f64,
    /// Number of agent responses recorded.
    pub passes: u32,
}

impl UsageTotals {
    fn add(&mut self, usage: &PassUsage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cache_read_tokens += usage.cache_read_tokens;
        self.cache_write_tokens += usage.cache_write_tokens;
        self.cost_usd += usage.cost_usd;
        self.passes += 1;
    }
}

/// Holds the current agent session token and cumulative usage.
///
/// The session token is replaced whenever a response carries a non-empty one
/// (monotonic replace, never merged). [`SessionTracker::reset_session`]
/// clears only the token; totals are cumulative for the whole run.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    session: Option<String>,
    totals: UsageTotals,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate one response's usage and adopt its session token if present.
    pub fn record(&mut self, usage: &PassUsage, session: Option<&str>) {
        self.totals.add(usage);
        if let Some(token) = session
            && !token.is_empty()
        {
            self.session = Some(token.to_string());
        }
    }

    /// Forget the session token. Used when policy dictates a fresh session
    /// (e.g. at a milestone boundary). Totals are untouched.
    pub fn reset_session(&mut self) {
        self.session = None;
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn totals(&self) -> &UsageTotals {
        &self.totals
    }
}
