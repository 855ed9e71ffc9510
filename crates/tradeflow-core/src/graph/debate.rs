//! Risk-debate continuation rule.

use serde::{Deserialize, Serialize};

/// Outcome of the check made after each conservative argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateDecision {
    /// Start another aggressive → neutral → conservative round.
    Continue,
    /// Hand off to the investment judge.
    End,
}

/// Pure continuation rule: continue while fewer than `max_rounds` rounds ran.
pub fn decide(round_count: u32, max_rounds: u32) -> DebateDecision {
    if round_count < max_rounds {
        DebateDecision::Continue
    } else {
        DebateDecision::End
    }
}

/// The rule bound to a configured round limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebateController {
    max_rounds: u32,
}

impl DebateController {
    pub fn new(max_rounds: u32) -> Self {
        Self { max_rounds }
    }

    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    pub fn decide(&self, round_count: u32) -> DebateDecision {
        decide(round_count, self.max_rounds)
    }
}
