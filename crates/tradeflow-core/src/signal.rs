//! Reduces a final decision to a BUY / SELL / HOLD signal.
//!
//! Rules, in order:
//!
//! 1. An explicit marker such as `FINAL TRANSACTION PROPOSAL: **BUY**` wins.
//!    When several are present the last one counts.
//! 2. Otherwise, if exactly one distinct signal word appears (English or
//!    Chinese), that signal is used.
//! 3. Otherwise the text is ambiguous or silent and yields HOLD.
//!
//! Error-tagged and cancelled decisions always yield HOLD.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::FinalDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        }
    }

    fn from_word(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "BUY" | "买入" => Some(Self::Buy),
            "SELL" | "卖出" => Some(Self::Sell),
            "HOLD" | "持有" => Some(Self::Hold),
            _ => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_word(s.trim()).ok_or_else(|| format!("not a trading signal: {s}"))
    }
}

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)FINAL\s+(?:TRANSACTION\s+)?(?:PROPOSAL|DECISION|SIGNAL)\s*[:：]\s*\**\s*(BUY\b|SELL\b|HOLD\b|买入|卖出|持有)",
        )
        .expect("Invalid marker pattern")
    })
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(BUY|SELL|HOLD)\b|(买入|卖出|持有)")
            .expect("Invalid signal pattern")
    })
}

/// Stateless signal extraction.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalExtractor;

impl SignalExtractor {
    /// Extract a signal from free text. Pure and deterministic.
    pub fn extract(text: &str) -> Signal {
        if let Some(signal) = marker_re()
            .captures_iter(text)
            .filter_map(|c| c.get(1).and_then(|m| Signal::from_word(m.as_str())))
            .last()
        {
            return signal;
        }

        let mut seen: Option<Signal> = None;
        for caps in word_re().captures_iter(text) {
            let Some(word) = caps.get(1).or_else(|| caps.get(2)) else {
                continue;
            };
            let Some(signal) = Signal::from_word(word.as_str()) else {
                continue;
            };
            match seen {
                None => seen = Some(signal),
                Some(prev) if prev == signal => {}
                Some(_) => return Signal::Hold,
            }
        }
        seen.unwrap_or(Signal::Hold)
    }

    /// Extract from a terminal decision. Non-decided outcomes yield HOLD.
    pub fn extract_decision(decision: &FinalDecision) -> Signal {
        match decision {
            FinalDecision::Decided { text } => Self::extract(text),
            FinalDecision::Failed { .. } | FinalDecision::Cancelled { .. } => Signal::Hold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_wins_over_words() {
        let text = "Selling pressure is real, but FINAL TRANSACTION PROPOSAL: **BUY**";
        assert_eq!(SignalExtractor::extract(text), Signal::Buy);
    }

    #[test]
    fn test_last_marker_counts() {
        let text = "FINAL DECISION: SELL\nRevised. final transaction proposal: hold";
        assert_eq!(SignalExtractor::extract(text), Signal::Hold);
    }

    #[test]
    fn test_marker_needs_a_whole_word() {
        let text = "FINAL DECISION: Holdings stay small. We SELL into strength.";
        assert_eq!(SignalExtractor::extract(text), Signal::Sell);
        let text = "FINAL TRANSACTION PROPOSAL: SELLERS exhausted, BUY";
        assert_eq!(SignalExtractor::extract(text), Signal::Buy);
        assert_eq!(
            SignalExtractor::extract("FINAL SIGNAL: **HOLD**."),
            Signal::Hold
        );
        assert_eq!(SignalExtractor::extract("FINAL DECISION: 卖出"), Signal::Sell);
    }

    #[test]
    fn test_single_word_signal() {
        assert_eq!(SignalExtractor::extract("We recommend to sell now."), Signal::Sell);
        assert_eq!(SignalExtractor::extract("建议买入"), Signal::Buy);
    }

    #[test]
    fn test_ambiguous_or_empty_is_hold() {
        assert_eq!(SignalExtractor::extract("buy or sell?"), Signal::Hold);
        assert_eq!(SignalExtractor::extract(""), Signal::Hold);
        assert_eq!(SignalExtractor::extract("buyer sentiment"), Signal::Hold);
    }

    #[test]
    fn test_error_decision_is_hold() {
        let decision = FinalDecision::Failed {
            node: Some("trader".into()),
            error: "BUY service down".into(),
        };
        assert_eq!(SignalExtractor::extract_decision(&decision), Signal::Hold);
    }

    #[test]
    fn test_extract_is_pure() {
        let text = "Position: SELL";
        assert_eq!(SignalExtractor::extract(text), SignalExtractor::extract(text));
    }
}
