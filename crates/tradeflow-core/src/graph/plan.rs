//! Build-time compilation of the workflow into an execution plan.
//!
//! The plan has three parts:
//!
//! - an entry phase: the selected analysts, run concurrently and joined
//! - a fixed research sequence: research manager, `(bull → bear) × D`, trader
//! - a risk state machine: conservative, then either another
//!   aggressive → neutral → conservative round or the judge and risk manager
//!
//! Every node is resolved against the [`StepRegistry`] here, so a bad
//! selection or a missing step fails before any node runs.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;

use crate::domain::{AnalysisRecord, AnalystRole, FlowError, NodeId, Result, RiskSpeaker};
use crate::step::{Step, StepRegistry};

use super::debate::{DebateController, DebateDecision};

/// Builder entry point for execution plans.
pub struct WorkflowGraph;

impl WorkflowGraph {
    /// Validate the selection and compile the plan.
    ///
    /// `selection` holds analyst role names; unknown or repeated names are
    /// rejected. `max_debate_rounds` must be at least 1.
    pub fn build<S: AsRef<str>>(
        selection: &[S],
        max_debate_rounds: u32,
        max_risk_rounds: u32,
        registry: &StepRegistry,
    ) -> Result<ExecutionPlan> {
        let analysts = AnalystRole::parse_selection(selection)?;
        Self::build_for(&analysts, max_debate_rounds, max_risk_rounds, registry)
    }

    /// Same as [`WorkflowGraph::build`] for an already-parsed selection.
    pub fn build_for(
        analysts: &[AnalystRole],
        max_debate_rounds: u32,
        max_risk_rounds: u32,
        registry: &StepRegistry,
    ) -> Result<ExecutionPlan> {
        if max_debate_rounds == 0 {
            return Err(FlowError::InvalidConfig(
                "max_debate_rounds must be at least 1".into(),
            ));
        }
        for (i, role) in analysts.iter().enumerate() {
            if analysts[..i].contains(role) {
                return Err(crate::domain::GraphConfigurationError::DuplicateRole(
                    role.to_string(),
                )
                .into());
            }
        }

        let entry = analysts
            .iter()
            .map(|role| registry.build(NodeId::Analyst(*role)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut research = vec![registry.build(NodeId::ResearchManager)?];
        let bull = registry.build(NodeId::BullResearcher)?;
        let bear = registry.build(NodeId::BearResearcher)?;
        for _ in 0..max_debate_rounds {
            research.push(Arc::clone(&bull));
            research.push(Arc::clone(&bear));
        }
        research.push(registry.build(NodeId::Trader)?);

        let plan = ExecutionPlan {
            analysts: analysts.to_vec(),
            entry,
            research,
            conservative: registry.build(NodeId::Conservative)?,
            aggressive: registry.build(NodeId::Aggressive)?,
            neutral: registry.build(NodeId::Neutral)?,
            invest_judge: registry.build(NodeId::InvestJudge)?,
            risk_manager: registry.build(NodeId::RiskManager)?,
            controller: DebateController::new(max_risk_rounds),
        };
        debug!(plan = ?plan, "execution plan compiled");
        Ok(plan)
    }
}

/// Position in the sequential part of the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    Research(usize),
    Risk(RiskSpeaker),
    InvestJudge,
    RiskManager,
    End,
}

/// Where to go after a node, and whether a new risk round begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: Cursor,
    pub begin_round: bool,
}

impl Transition {
    fn to(next: Cursor) -> Self {
        Self {
            next,
            begin_round: false,
        }
    }
}

/// A compiled, immutable workflow.
pub struct ExecutionPlan {
    analysts: Vec<AnalystRole>,
    entry: Vec<Arc<dyn Step>>,
    research: Vec<Arc<dyn Step>>,
    conservative: Arc<dyn Step>,
    aggressive: Arc<dyn Step>,
    neutral: Arc<dyn Step>,
    invest_judge: Arc<dyn Step>,
    risk_manager: Arc<dyn Step>,
    controller: DebateController,
}

impl ExecutionPlan {
    pub fn analysts(&self) -> &[AnalystRole] {
        &self.analysts
    }

    /// Steps of the concurrent entry phase, in selection order.
    pub fn entry_steps(&self) -> &[Arc<dyn Step>] {
        &self.entry
    }

    pub fn max_risk_rounds(&self) -> u32 {
        self.controller.max_rounds()
    }

    /// A fresh record for this plan's analyst selection.
    pub fn initial_record(&self, subject: impl Into<String>, as_of: NaiveDate) -> AnalysisRecord {
        AnalysisRecord::new(subject, as_of, &self.analysts)
    }

    /// First sequential position, reached once the entry phase has joined.
    pub fn start(&self) -> Cursor {
        Cursor::Research(0)
    }

    pub fn step_at(&self, cursor: Cursor) -> Option<&Arc<dyn Step>> {
        match cursor {
            Cursor::Research(i) => self.research.get(i),
            Cursor::Risk(RiskSpeaker::Conservative) => Some(&self.conservative),
            Cursor::Risk(RiskSpeaker::Aggressive) => Some(&self.aggressive),
            Cursor::Risk(RiskSpeaker::Neutral) => Some(&self.neutral),
            Cursor::InvestJudge => Some(&self.invest_judge),
            Cursor::RiskManager => Some(&self.risk_manager),
            Cursor::End => None,
        }
    }

    /// Transition out of `cursor`. `round_count` is the record's risk round
    /// counter after the node at `cursor` ran.
    pub fn advance(&self, cursor: Cursor, round_count: u32) -> Transition {
        match cursor {
            Cursor::Research(i) if i + 1 < self.research.len() => {
                Transition::to(Cursor::Research(i + 1))
            }
            Cursor::Research(_) => Transition::to(Cursor::Risk(RiskSpeaker::Conservative)),
            Cursor::Risk(RiskSpeaker::Conservative) => match self.controller.decide(round_count) {
                DebateDecision::Continue => Transition {
                    next: Cursor::Risk(RiskSpeaker::Aggressive),
                    begin_round: true,
                },
                DebateDecision::End => Transition::to(Cursor::InvestJudge),
            },
            Cursor::Risk(RiskSpeaker::Aggressive) => {
                Transition::to(Cursor::Risk(RiskSpeaker::Neutral))
            }
            Cursor::Risk(RiskSpeaker::Neutral) => {
                Transition::to(Cursor::Risk(RiskSpeaker::Conservative))
            }
            Cursor::InvestJudge => Transition::to(Cursor::RiskManager),
            Cursor::RiskManager | Cursor::End => Transition::to(Cursor::End),
        }
    }

    /// The node visits a fully successful run makes, in order. Entry-phase
    /// analysts are listed in selection order; at run time they may complete
    /// in any order.
    pub fn expected_visits(&self) -> Vec<NodeId> {
        let mut visits: Vec<NodeId> = self.entry.iter().map(|s| s.node()).collect();
        let mut cursor = self.start();
        let mut rounds = 0;
        while let Some(step) = self.step_at(cursor) {
            visits.push(step.node());
            let transition = self.advance(cursor, rounds);
            if transition.begin_round {
                rounds += 1;
            }
            cursor = transition.next;
        }
        visits
    }
}

impl fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |steps: &[Arc<dyn Step>]| -> Vec<String> {
            steps.iter().map(|s| s.node().to_string()).collect()
        };
        f.debug_struct("ExecutionPlan")
            .field("entry", &names(&self.entry))
            .field("research", &names(&self.research))
            .field("max_risk_rounds", &self.controller.max_rounds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::ReasoningClient;
    use crate::domain::GraphConfigurationError;
    use crate::fakes::{ScriptedReasoning, StaticTools};
    use crate::memory::MemoryBank;
    use crate::step::{Collaborators, StepOptions};

    fn registry() -> StepRegistry {
        let reasoning: Arc<dyn ReasoningClient> = Arc::new(ScriptedReasoning::new());
        StepRegistry::standard(
            Collaborators {
                quick: Arc::clone(&reasoning),
                deep: reasoning,
                tools: Arc::new(StaticTools::new()),
                memories: MemoryBank::empty(),
            },
            StepOptions::default(),
        )
    }

    #[test]
    fn test_single_analyst_single_round_visits() {
        let plan = WorkflowGraph::build(&["market"], 1, 1, &registry()).unwrap();
        let names: Vec<String> = plan
            .expected_visits()
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "market_analyst",
                "research_manager",
                "bull_researcher",
                "bear_researcher",
                "trader",
                "conservative",
                "aggressive",
                "neutral",
                "conservative",
                "invest_judge",
                "risk_manager",
            ]
        );
    }

    #[test]
    fn test_risk_cycle_counts_follow_round_limit() {
        for rounds in [0u32, 1, 3] {
            let plan = WorkflowGraph::build::<&str>(&[], 1, rounds, &registry()).unwrap();
            let visits = plan.expected_visits();
            let count = |n: NodeId| visits.iter().filter(|v| **v == n).count() as u32;
            assert_eq!(count(NodeId::Conservative), rounds + 1);
            assert_eq!(count(NodeId::Aggressive), rounds);
            assert_eq!(count(NodeId::Neutral), rounds);
            assert_eq!(count(NodeId::InvestJudge), 1);
        }
    }

    #[test]
    fn test_debate_rounds_unroll_research_phase() {
        let plan = WorkflowGraph::build::<&str>(&[], 2, 0, &registry()).unwrap();
        let visits = plan.expected_visits();
        assert_eq!(
            &visits[..6],
            &[
                NodeId::ResearchManager,
                NodeId::BullResearcher,
                NodeId::BearResearcher,
                NodeId::BullResearcher,
                NodeId::BearResearcher,
                NodeId::Trader,
            ]
        );
    }

    #[test]
    fn test_empty_selection_starts_at_research_manager() {
        let plan = WorkflowGraph::build::<&str>(&[], 1, 1, &registry()).unwrap();
        assert!(plan.entry_steps().is_empty());
        assert_eq!(plan.expected_visits()[0], NodeId::ResearchManager);
    }

    #[test]
    fn test_unknown_and_duplicate_roles_fail_fast() {
        let err = WorkflowGraph::build(&["market", "astrology"], 1, 1, &registry()).unwrap_err();
        assert!(matches!(
            err,
            FlowError::GraphConfiguration(GraphConfigurationError::UnknownRole(_))
        ));
        let err = WorkflowGraph::build(&["news", "news"], 1, 1, &registry()).unwrap_err();
        assert!(matches!(
            err,
            FlowError::GraphConfiguration(GraphConfigurationError::DuplicateRole(_))
        ));
    }

    #[test]
    fn test_zero_debate_rounds_rejected() {
        let err = WorkflowGraph::build(&["market"], 0, 1, &registry()).unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfig(_)));
    }
}
