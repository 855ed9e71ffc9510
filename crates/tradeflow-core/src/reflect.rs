//! Post-run reflection: turn a realised outcome into stored lessons.
//!
//! For each memory-owning role with a non-empty slice of the record, the
//! reasoning service is asked to critique that role's contribution given the
//! outcome. The lesson is stored in the role's memory keyed by the run's
//! situation, where future runs recall it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::collab::ReasoningClient;
use crate::domain::{AnalysisRecord, FlowError, MemoryRole, Result};
use crate::memory::MemoryBank;
use crate::step::templates::REFLECTION_INSTRUCTIONS;
use crate::step::RoleContext;

/// Realised result of acting on a run's decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Percentage return, e.g. `-3.2` for a 3.2% loss.
    pub returns_pct: f64,
    #[serde(default)]
    pub note: Option<String>,
}

impl Outcome {
    pub fn new(returns_pct: f64) -> Self {
        Self {
            returns_pct,
            note: None,
        }
    }
}

/// A lesson written to one role's memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLesson {
    pub role: MemoryRole,
    pub id: u64,
    pub lesson: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReflectionReport {
    pub stored: Vec<StoredLesson>,
    /// Roles that contributed nothing to the record or have no store.
    pub skipped: Vec<MemoryRole>,
}

pub struct Reflector {
    reasoning: Arc<dyn ReasoningClient>,
    memories: MemoryBank,
}

impl Reflector {
    pub fn new(reasoning: Arc<dyn ReasoningClient>, memories: MemoryBank) -> Self {
        Self {
            reasoning,
            memories,
        }
    }

    /// Reflect on every role's contribution to `record`.
    ///
    /// Reasoning and memory failures propagate; lessons stored before the
    /// failure stay stored.
    #[instrument(skip_all, fields(subject = %record.subject(), returns_pct = outcome.returns_pct))]
    pub async fn reflect(&self, record: &AnalysisRecord, outcome: &Outcome) -> Result<ReflectionReport> {
        if !outcome.returns_pct.is_finite() {
            return Err(FlowError::InvalidConfig(format!(
                "returns must be a finite percentage, got {}",
                outcome.returns_pct
            )));
        }

        let situation = situation_of(record);
        let ctx = RoleContext::new(Arc::clone(&self.reasoning));
        let mut report = ReflectionReport::default();

        for role in MemoryRole::ALL {
            let (Some(store), Some(slice)) = (self.memories.get(role), role_slice(record, role))
            else {
                report.skipped.push(role);
                continue;
            };

            let user = format!(
                "Realised return: {:+.2}%{}\n\nSituation at the time:\n{situation}\n\n\
                 Your contribution as {role}:\n{slice}",
                outcome.returns_pct,
                outcome
                    .note
                    .as_deref()
                    .map(|n| format!("\nNote: {n}"))
                    .unwrap_or_default(),
            );
            let lesson = ctx.ask(role.node(), REFLECTION_INSTRUCTIONS, user).await?;
            let id = store.store(&situation, &lesson).await?;
            info!(event = "reflection.stored", role = %role, id = id);
            report.stored.push(StoredLesson { role, id, lesson });
        }
        Ok(report)
    }
}

/// The situation text lessons are keyed by. Same text steps recall with.
pub fn situation_of(record: &AnalysisRecord) -> String {
    let summary = record.situation_summary();
    if summary.is_empty() {
        format!(
            "{} on {}: no analyst reports",
            record.subject(),
            record.as_of()
        )
    } else {
        summary
    }
}

/// The part of the record a role produced, or `None` if it produced nothing.
pub fn role_slice(record: &AnalysisRecord, role: MemoryRole) -> Option<String> {
    let debate = &record.investment_debate;
    let text = match role {
        MemoryRole::Bull => debate.bull_history.join("\n\n"),
        MemoryRole::Bear => debate.bear_history.join("\n\n"),
        MemoryRole::ResearchManager => record.research_plan.clone().unwrap_or_default(),
        MemoryRole::Trader => record.trader_plan.clone().unwrap_or_default(),
        MemoryRole::InvestJudge => debate.judge_decision.clone().unwrap_or_default(),
        MemoryRole::RiskManager => record
            .risk_debate
            .final_risk_decision
            .clone()
            .unwrap_or_default(),
    };
    (!text.trim().is_empty()).then_some(text)
}
