//! Role steps: the units of work the driver schedules.
//!
//! A step receives a read-only [`StepInput`] gathered from the record and
//! returns a [`StepOutput`]: a single [`RecordUpdate`] touching only the
//! fields its node owns, plus the messages it produced. Steps hold their
//! collaborators and never see the record itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, warn};

use crate::collab::{Prompt, ReasoningClient};
use crate::domain::{
    AnalysisRecord, MessageEntry, MessageKind, NodeId, RecordUpdate, ReportSlot, Result, RiskTurn,
};
use crate::memory::MemoryStore;

pub mod analyst;
pub mod manager;
pub mod registry;
pub mod research;
pub mod risk;
pub mod templates;

pub use analyst::AnalystStep;
pub use manager::{InvestJudgeStep, RiskManagerStep};
pub use registry::{Collaborators, StepFactory, StepOptions, StepRegistry};
pub use research::{ResearchManagerStep, ResearcherStep, Side, TraderStep};
pub use risk::RiskDebaterStep;

/// A unit of work bound to one graph node.
#[async_trait]
pub trait Step: Send + Sync {
    fn node(&self) -> NodeId;
    async fn execute(&self, input: StepInput) -> Result<StepOutput>;
}

/// What a step returns to the driver.
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub update: RecordUpdate,
    pub messages: Vec<MessageEntry>,
}

impl StepOutput {
    /// Output carrying one message of `kind` with the update's text.
    pub fn with_message(node: NodeId, update: RecordUpdate, kind: MessageKind, text: &str) -> Self {
        Self {
            update,
            messages: vec![MessageEntry::new(node.to_string(), kind, text)],
        }
    }
}

// ---------------------------------------------------------------------------
// StepInput
// ---------------------------------------------------------------------------

/// Snapshot of the record fields a node is allowed to read.
///
/// Fields a node has no business reading are left empty.
#[derive(Debug, Clone, Default)]
pub struct StepInput {
    pub subject: String,
    pub as_of: Option<NaiveDate>,
    /// Rendered analyst reports.
    pub reports: BTreeMap<ReportSlot, String>,
    pub research_plan: Option<String>,
    pub bull_history: Vec<String>,
    pub bear_history: Vec<String>,
    pub trader_plan: Option<String>,
    pub risk_history: Vec<RiskTurn>,
    pub risk_round: u32,
    pub judge_decision: Option<String>,
}

impl StepInput {
    /// Gather the view `node` needs from `record`.
    pub fn gather(record: &AnalysisRecord, node: NodeId) -> Self {
        let mut input = Self {
            subject: record.subject().to_string(),
            as_of: Some(record.as_of()),
            ..Self::default()
        };
        if matches!(node, NodeId::Analyst(_)) {
            return input;
        }

        input.reports = record
            .reports
            .iter()
            .map(|(slot, report)| (*slot, report.render()))
            .collect();

        let debate = &record.investment_debate;
        match node {
            NodeId::Analyst(_) | NodeId::ResearchManager => {}
            NodeId::BullResearcher | NodeId::BearResearcher | NodeId::Trader => {
                input.research_plan = record.research_plan.clone();
                input.bull_history = debate.bull_history.clone();
                input.bear_history = debate.bear_history.clone();
            }
            NodeId::Conservative | NodeId::Aggressive | NodeId::Neutral | NodeId::InvestJudge => {
                input.trader_plan = record.trader_plan.clone();
                input.risk_history = record.risk_debate.combined_history.clone();
                input.risk_round = record.risk_debate.round_count;
            }
            NodeId::RiskManager => {
                input.research_plan = record.research_plan.clone();
                input.trader_plan = record.trader_plan.clone();
                input.risk_history = record.risk_debate.combined_history.clone();
                input.risk_round = record.risk_debate.round_count;
                input.judge_decision = debate.judge_decision.clone();
            }
        }
        input
    }

    /// Header line naming the subject and date.
    pub fn headline(&self) -> String {
        match self.as_of {
            Some(date) => format!("Subject: {} | Trade date: {date}", self.subject),
            None => format!("Subject: {}", self.subject),
        }
    }

    /// The analyst reports as one block, in slot order. Same text the
    /// reflector stores as the situation.
    pub fn situation(&self) -> String {
        self.reports
            .iter()
            .map(|(slot, text)| format!("## {slot} report\n{text}"))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn risk_transcript(&self) -> String {
        if self.risk_history.is_empty() {
            return "(no arguments yet)".to_string();
        }
        self.risk_history
            .iter()
            .map(|t| format!("[round {}] {}: {}", t.round, t.speaker, t.argument))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// The bull/bear exchange, interleaved turn by turn.
    pub fn debate_transcript(&self) -> String {
        let turns = self.bull_history.len().max(self.bear_history.len());
        if turns == 0 {
            return "(no arguments yet)".to_string();
        }
        let mut lines = Vec::with_capacity(turns * 2);
        for i in 0..turns {
            if let Some(arg) = self.bull_history.get(i) {
                lines.push(format!("Bull: {arg}"));
            }
            if let Some(arg) = self.bear_history.get(i) {
                lines.push(format!("Bear: {arg}"));
            }
        }
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Shared role plumbing
// ---------------------------------------------------------------------------

/// Reasoning plus optional few-shot memory for one role.
#[derive(Clone)]
pub struct RoleContext {
    pub reasoning: Arc<dyn ReasoningClient>,
    pub memory: Option<Arc<MemoryStore>>,
    pub recall_matches: usize,
}

impl RoleContext {
    pub fn new(reasoning: Arc<dyn ReasoningClient>) -> Self {
        Self {
            reasoning,
            memory: None,
            recall_matches: 0,
        }
    }

    pub fn with_memory(mut self, memory: Option<Arc<MemoryStore>>, recall_matches: usize) -> Self {
        self.memory = memory;
        self.recall_matches = recall_matches;
        self
    }

    /// Past lessons for situations like this one.
    ///
    /// Memory problems never fail the step: a warning is logged and the prompt
    /// goes out without recall.
    pub async fn recall(&self, situation: &str) -> String {
        let Some(store) = &self.memory else {
            return String::new();
        };
        if self.recall_matches == 0 || situation.is_empty() {
            return String::new();
        }
        match store.retrieve(situation, self.recall_matches).await {
            Ok(hits) if hits.is_empty() => String::new(),
            Ok(hits) => {
                debug!(store = %store.name(), hits = hits.len(), "recall attached");
                let lessons = hits
                    .iter()
                    .map(|h| format!("- {}", h.recommendation))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!("\n\nLessons from similar past situations:\n{lessons}")
            }
            Err(e) => {
                warn!(store = %store.name(), error = %e, "memory recall failed; continuing without");
                String::new()
            }
        }
    }

    /// Send a free-text prompt and return the answer text.
    pub async fn ask(&self, node: NodeId, system: &str, user: String) -> Result<String> {
        let prompt = Prompt::new(node, system, user);
        let completion = self.reasoning.complete(&prompt, None).await?;
        Ok(completion.into_text())
    }
}
