//! The analysis record threaded through every node of a run.
//!
//! Steps never touch the record. They return a [`RecordUpdate`] and the driver
//! applies it with [`AnalysisRecord::apply`], which enforces the write-once and
//! append-only rules of every field.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::error::{FlowError, Result};
use super::role::{AnalystRole, NodeId, ReportSlot, RiskSpeaker};

/// Output of one analyst, stored in its report slot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Report {
    pub role: AnalystRole,
    /// Structured body returned by the reasoning service.
    pub body: serde_json::Value,
    /// Raw tool output, keyed by tool name.
    #[serde(default)]
    pub tool_outputs: BTreeMap<String, String>,
    /// Visible notes for tools that failed while the report was produced.
    #[serde(default)]
    pub tool_errors: Vec<String>,
}

impl Report {
    pub fn is_degraded(&self) -> bool {
        !self.tool_errors.is_empty()
    }

    /// Render the report as prompt-ready text.
    pub fn render(&self) -> String {
        let mut out = match &self.body {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Object(fields) => fields
                .iter()
                .map(|(k, v)| match v {
                    serde_json::Value::String(s) => format!("{k}: {s}"),
                    other => format!("{k}: {other}"),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            other => other.to_string(),
        };
        for note in &self.tool_errors {
            out.push_str("\n[data unavailable] ");
            out.push_str(note);
        }
        out
    }
}

/// Bull/bear exchange and the investment judge's verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InvestmentDebate {
    pub bull_history: Vec<String>,
    pub bear_history: Vec<String>,
    pub current_response: Option<String>,
    pub judge_decision: Option<String>,
}

/// A single argument in the risk debate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskTurn {
    pub speaker: RiskSpeaker,
    pub round: u32,
    pub argument: String,
}

/// Round-robin risk debate state.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RiskDebate {
    pub conservative_history: Vec<String>,
    pub aggressive_history: Vec<String>,
    pub neutral_history: Vec<String>,
    pub combined_history: Vec<RiskTurn>,
    pub round_count: u32,
    pub latest_speaker: Option<RiskSpeaker>,
    pub final_risk_decision: Option<String>,
}

impl RiskDebate {
    pub fn history_for(&self, speaker: RiskSpeaker) -> &[String] {
        match speaker {
            RiskSpeaker::Conservative => &self.conservative_history,
            RiskSpeaker::Aggressive => &self.aggressive_history,
            RiskSpeaker::Neutral => &self.neutral_history,
        }
    }

    fn history_for_mut(&mut self, speaker: RiskSpeaker) -> &mut Vec<String> {
        match speaker {
            RiskSpeaker::Conservative => &mut self.conservative_history,
            RiskSpeaker::Aggressive => &mut self.aggressive_history,
            RiskSpeaker::Neutral => &mut self.neutral_history,
        }
    }
}

/// One entry of the run's message log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageEntry {
    pub role: String,
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl MessageEntry {
    pub fn new(role: impl Into<String>, kind: MessageKind, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            kind,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    ToolResult,
    ToolError,
    Report,
    Argument,
    Decision,
    Error,
}

/// Terminal decision of a run. Failed and cancelled runs are tagged, never
/// mistaken for a decided one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FinalDecision {
    Decided { text: String },
    Failed { node: Option<String>, error: String },
    Cancelled { node: Option<String> },
}

impl FinalDecision {
    pub fn is_decided(&self) -> bool {
        matches!(self, Self::Decided { .. })
    }

    /// Text form used by the audit log and signal extraction.
    pub fn text(&self) -> String {
        match self {
            Self::Decided { text } => text.clone(),
            Self::Failed { node, error } => match node {
                Some(node) => format!("ERROR at {node}: {error}"),
                None => format!("ERROR: {error}"),
            },
            Self::Cancelled { node } => match node {
                Some(node) => format!("CANCELLED at {node}"),
                None => "CANCELLED".to_string(),
            },
        }
    }
}

/// Partial update returned by a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordUpdate {
    Report { slot: ReportSlot, report: Report },
    ResearchPlan { text: String },
    BullArgument { text: String },
    BearArgument { text: String },
    TraderPlan { text: String },
    RiskArgument { speaker: RiskSpeaker, text: String },
    JudgeDecision { text: String },
    RiskDecision { text: String },
}

impl RecordUpdate {
    /// Short name of the update kind, for logs and errors.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Report { .. } => "report",
            Self::ResearchPlan { .. } => "research_plan",
            Self::BullArgument { .. } => "bull_argument",
            Self::BearArgument { .. } => "bear_argument",
            Self::TraderPlan { .. } => "trader_plan",
            Self::RiskArgument { .. } => "risk_argument",
            Self::JudgeDecision { .. } => "judge_decision",
            Self::RiskDecision { .. } => "risk_decision",
        }
    }
}

/// The shared record for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisRecord {
    subject: String,
    as_of: NaiveDate,
    pub selected_analysts: Vec<AnalystRole>,
    pub reports: BTreeMap<ReportSlot, Report>,
    pub research_plan: Option<String>,
    pub investment_debate: InvestmentDebate,
    pub risk_debate: RiskDebate,
    pub trader_plan: Option<String>,
    pub final_decision: Option<FinalDecision>,
    pub message_log: Vec<MessageEntry>,
}

impl AnalysisRecord {
    /// Initial-state builder.
    pub fn new(subject: impl Into<String>, as_of: NaiveDate, selected: &[AnalystRole]) -> Self {
        Self {
            subject: subject.into(),
            as_of,
            selected_analysts: selected.to_vec(),
            reports: BTreeMap::new(),
            research_plan: None,
            investment_debate: InvestmentDebate::default(),
            risk_debate: RiskDebate::default(),
            trader_plan: None,
            final_decision: None,
            message_log: Vec::new(),
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    pub fn report(&self, slot: ReportSlot) -> Option<&Report> {
        self.reports.get(&slot)
    }

    /// Whether any report was produced with missing tool data.
    pub fn is_degraded(&self) -> bool {
        self.reports.values().any(Report::is_degraded)
    }

    /// All present analyst reports, rendered in slot order.
    pub fn situation_summary(&self) -> String {
        ReportSlot::ALL
            .iter()
            .filter_map(|slot| {
                self.reports
                    .get(slot)
                    .map(|r| format!("## {slot} report\n{}", r.render()))
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Apply a step's update, enforcing write-once and append-only fields.
    pub fn apply(&mut self, update: &RecordUpdate, messages: &[MessageEntry]) -> Result<()> {
        match update {
            RecordUpdate::Report { slot, report } => {
                if self.reports.contains_key(slot) {
                    return Err(write_once(format!("reports.{slot}")));
                }
                self.reports.insert(*slot, report.clone());
            }
            RecordUpdate::ResearchPlan { text } => {
                set_once(&mut self.research_plan, text, "research_plan")?;
            }
            RecordUpdate::BullArgument { text } => {
                self.investment_debate.bull_history.push(text.clone());
                self.investment_debate.current_response = Some(text.clone());
            }
            RecordUpdate::BearArgument { text } => {
                self.investment_debate.bear_history.push(text.clone());
                self.investment_debate.current_response = Some(text.clone());
            }
            RecordUpdate::TraderPlan { text } => {
                set_once(&mut self.trader_plan, text, "trader_plan")?;
            }
            RecordUpdate::RiskArgument { speaker, text } => {
                let debate = &mut self.risk_debate;
                debate.history_for_mut(*speaker).push(text.clone());
                debate.combined_history.push(RiskTurn {
                    speaker: *speaker,
                    round: debate.round_count,
                    argument: text.clone(),
                });
                debate.latest_speaker = Some(*speaker);
            }
            RecordUpdate::JudgeDecision { text } => {
                set_once(
                    &mut self.investment_debate.judge_decision,
                    text,
                    "investment_debate.judge_decision",
                )?;
            }
            RecordUpdate::RiskDecision { text } => {
                set_once(
                    &mut self.risk_debate.final_risk_decision,
                    text,
                    "risk_debate.final_risk_decision",
                )?;
                self.finalize(FinalDecision::Decided { text: text.clone() })?;
            }
        }
        self.message_log.extend_from_slice(messages);
        Ok(())
    }

    /// Advance the risk round counter. Only the driver calls this, on a
    /// CONTINUE decision.
    pub fn begin_risk_round(&mut self) {
        self.risk_debate.round_count += 1;
    }

    /// Write the terminal decision.
    pub fn finalize(&mut self, decision: FinalDecision) -> Result<()> {
        if self.final_decision.is_some() {
            return Err(write_once("final_decision".to_string()));
        }
        self.final_decision = Some(decision);
        Ok(())
    }

    pub(crate) fn push_message(&mut self, entry: MessageEntry) {
        self.message_log.push(entry);
    }
}

fn write_once(field: String) -> FlowError {
    FlowError::WriteOnceViolation { field }
}

fn set_once(slot: &mut Option<String>, value: &str, field: &str) -> Result<()> {
    if slot.is_some() {
        return Err(write_once(field.to_string()));
    }
    *slot = Some(value.to_string());
    Ok(())
}

/// Convenience for steps: build the report-slot update for an analyst.
pub fn report_update(report: Report) -> RecordUpdate {
    RecordUpdate::Report {
        slot: report.role.slot(),
        report,
    }
}

/// The node allowed to write a given update. `None` when no node owns it,
/// e.g. a report filed under another analyst's slot.
pub fn update_origin(update: &RecordUpdate) -> Option<NodeId> {
    match update {
        RecordUpdate::Report { slot, report } if *slot == report.role.slot() => {
            Some(NodeId::Analyst(report.role))
        }
        RecordUpdate::Report { .. } => None,
        RecordUpdate::ResearchPlan { .. } => Some(NodeId::ResearchManager),
        RecordUpdate::BullArgument { .. } => Some(NodeId::BullResearcher),
        RecordUpdate::BearArgument { .. } => Some(NodeId::BearResearcher),
        RecordUpdate::TraderPlan { .. } => Some(NodeId::Trader),
        RecordUpdate::RiskArgument { speaker, .. } => Some(match speaker {
            RiskSpeaker::Conservative => NodeId::Conservative,
            RiskSpeaker::Aggressive => NodeId::Aggressive,
            RiskSpeaker::Neutral => NodeId::Neutral,
        }),
        RecordUpdate::JudgeDecision { .. } => Some(NodeId::InvestJudge),
        RecordUpdate::RiskDecision { .. } => Some(NodeId::RiskManager),
    }
}
