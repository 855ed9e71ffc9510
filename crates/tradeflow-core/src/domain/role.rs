//! Role vocabulary: analyst roles, report slots, graph nodes and memory owners.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::GraphConfigurationError;

/// Analysts that may run in the parallel entry phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalystRole {
    Market,
    Social,
    News,
    Fundamentals,
    Metaphysics,
}

impl AnalystRole {
    pub const ALL: [AnalystRole; 5] = [
        AnalystRole::Market,
        AnalystRole::Social,
        AnalystRole::News,
        AnalystRole::Fundamentals,
        AnalystRole::Metaphysics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Social => "social",
            Self::News => "news",
            Self::Fundamentals => "fundamentals",
            Self::Metaphysics => "metaphysics",
        }
    }

    /// The report slot this analyst writes. Each slot has exactly one writer.
    pub fn slot(&self) -> ReportSlot {
        match self {
            Self::Market => ReportSlot::Market,
            Self::Social => ReportSlot::Sentiment,
            Self::News => ReportSlot::News,
            Self::Fundamentals => ReportSlot::Fundamentals,
            Self::Metaphysics => ReportSlot::Metaphysics,
        }
    }

    /// Parse a list of role names, rejecting unknown names and duplicates.
    pub fn parse_selection<S: AsRef<str>>(
        names: &[S],
    ) -> Result<Vec<AnalystRole>, GraphConfigurationError> {
        let mut selected = Vec::with_capacity(names.len());
        for name in names {
            let role: AnalystRole = name.as_ref().parse()?;
            if selected.contains(&role) {
                return Err(GraphConfigurationError::DuplicateRole(
                    name.as_ref().to_string(),
                ));
            }
            selected.push(role);
        }
        Ok(selected)
    }
}

impl fmt::Display for AnalystRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnalystRole {
    type Err = GraphConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "market" | "market_analyst" => Ok(Self::Market),
            "social" | "social_media" | "social_media_analyst" | "social_analyst" => {
                Ok(Self::Social)
            }
            "news" | "news_analyst" => Ok(Self::News),
            "fundamentals" | "fundamentals_analyst" => Ok(Self::Fundamentals),
            "metaphysics" | "metaphysics_analyst" => Ok(Self::Metaphysics),
            _ => Err(GraphConfigurationError::UnknownRole(s.to_string())),
        }
    }
}

/// Report slots in the analysis record, one per analyst role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportSlot {
    Market,
    Sentiment,
    News,
    Fundamentals,
    Metaphysics,
}

impl ReportSlot {
    pub const ALL: [ReportSlot; 5] = [
        ReportSlot::Market,
        ReportSlot::Sentiment,
        ReportSlot::News,
        ReportSlot::Fundamentals,
        ReportSlot::Metaphysics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Sentiment => "sentiment",
            Self::News => "news",
            Self::Fundamentals => "fundamentals",
            Self::Metaphysics => "metaphysics",
        }
    }
}

impl fmt::Display for ReportSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Speakers in the risk debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSpeaker {
    Conservative,
    Aggressive,
    Neutral,
}

impl fmt::Display for RiskSpeaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Conservative => "conservative",
            Self::Aggressive => "aggressive",
            Self::Neutral => "neutral",
        };
        write!(f, "{s}")
    }
}

/// Every node the execution plan can visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Analyst(AnalystRole),
    ResearchManager,
    BullResearcher,
    BearResearcher,
    Trader,
    Conservative,
    Aggressive,
    Neutral,
    InvestJudge,
    RiskManager,
}

impl NodeId {
    pub fn risk_speaker(&self) -> Option<RiskSpeaker> {
        match self {
            Self::Conservative => Some(RiskSpeaker::Conservative),
            Self::Aggressive => Some(RiskSpeaker::Aggressive),
            Self::Neutral => Some(RiskSpeaker::Neutral),
            _ => None,
        }
    }

    /// The memory owned by this node's role, if any.
    pub fn memory_role(&self) -> Option<MemoryRole> {
        match self {
            Self::BullResearcher => Some(MemoryRole::Bull),
            Self::BearResearcher => Some(MemoryRole::Bear),
            Self::ResearchManager => Some(MemoryRole::ResearchManager),
            Self::Trader => Some(MemoryRole::Trader),
            Self::InvestJudge => Some(MemoryRole::InvestJudge),
            Self::RiskManager => Some(MemoryRole::RiskManager),
            _ => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analyst(role) => write!(f, "{role}_analyst"),
            Self::ResearchManager => write!(f, "research_manager"),
            Self::BullResearcher => write!(f, "bull_researcher"),
            Self::BearResearcher => write!(f, "bear_researcher"),
            Self::Trader => write!(f, "trader"),
            Self::Conservative => write!(f, "conservative"),
            Self::Aggressive => write!(f, "aggressive"),
            Self::Neutral => write!(f, "neutral"),
            Self::InvestJudge => write!(f, "invest_judge"),
            Self::RiskManager => write!(f, "risk_manager"),
        }
    }
}

/// Roles that own a memory store and take part in reflection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryRole {
    Bull,
    Bear,
    ResearchManager,
    Trader,
    InvestJudge,
    RiskManager,
}

impl MemoryRole {
    pub const ALL: [MemoryRole; 6] = [
        MemoryRole::Bull,
        MemoryRole::Bear,
        MemoryRole::ResearchManager,
        MemoryRole::Trader,
        MemoryRole::InvestJudge,
        MemoryRole::RiskManager,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bull => "bull",
            Self::Bear => "bear",
            Self::ResearchManager => "research_manager",
            Self::Trader => "trader",
            Self::InvestJudge => "invest_judge",
            Self::RiskManager => "risk_manager",
        }
    }

    /// The graph node whose output this memory learns from.
    pub fn node(&self) -> NodeId {
        match self {
            Self::Bull => NodeId::BullResearcher,
            Self::Bear => NodeId::BearResearcher,
            Self::ResearchManager => NodeId::ResearchManager,
            Self::Trader => NodeId::Trader,
            Self::InvestJudge => NodeId::InvestJudge,
            Self::RiskManager => NodeId::RiskManager,
        }
    }
}

impl fmt::Display for MemoryRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MemoryRole {
    type Err = GraphConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemoryRole::ALL
            .into_iter()
            .find(|r| r.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| GraphConfigurationError::UnknownRole(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyst_names_accept_long_forms() {
        assert_eq!("market_analyst".parse::<AnalystRole>().unwrap(), AnalystRole::Market);
        assert_eq!(
            "social_media_analyst".parse::<AnalystRole>().unwrap(),
            AnalystRole::Social
        );
        assert_eq!(" News ".parse::<AnalystRole>().unwrap(), AnalystRole::News);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let err = "astrologer".parse::<AnalystRole>().unwrap_err();
        assert_eq!(err, GraphConfigurationError::UnknownRole("astrologer".into()));
    }

    #[test]
    fn test_duplicate_selection_rejected() {
        let err = AnalystRole::parse_selection(&["market", "market_analyst"]).unwrap_err();
        assert!(matches!(err, GraphConfigurationError::DuplicateRole(_)));
    }

    #[test]
    fn test_slots_are_partitioned_by_role() {
        let slots: std::collections::HashSet<ReportSlot> =
            AnalystRole::ALL.iter().map(|r| r.slot()).collect();
        assert_eq!(slots.len(), AnalystRole::ALL.len());
        assert_eq!(AnalystRole::Social.slot(), ReportSlot::Sentiment);
    }

    #[test]
    fn test_node_display_names() {
        assert_eq!(NodeId::Analyst(AnalystRole::Market).to_string(), "market_analyst");
        assert_eq!(NodeId::InvestJudge.to_string(), "invest_judge");
    }

    #[test]
    fn test_memory_role_roundtrip_names() {
        for role in MemoryRole::ALL {
            assert_eq!(role.as_str().parse::<MemoryRole>().unwrap(), role);
            assert_eq!(role.node().memory_role(), Some(role));
        }
    }
}
