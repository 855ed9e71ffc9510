//! Research phase: research manager, bull/bear researchers and the trader.

use async_trait::async_trait;
use tracing::instrument;

use crate::domain::{MessageKind, NodeId, RecordUpdate, Result};

use super::templates::instructions;
use super::{RoleContext, Step, StepInput, StepOutput};

/// Consolidates the analyst reports into the research plan.
pub struct ResearchManagerStep {
    ctx: RoleContext,
}

impl ResearchManagerStep {
    pub fn new(ctx: RoleContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Step for ResearchManagerStep {
    fn node(&self) -> NodeId {
        NodeId::ResearchManager
    }

    #[instrument(skip_all, fields(node = "research_manager"))]
    async fn execute(&self, input: StepInput) -> Result<StepOutput> {
        let situation = input.situation();
        let recall = self.ctx.recall(&situation).await;
        let reports = if situation.is_empty() {
            "No analyst reports were requested for this run.".to_string()
        } else {
            situation
        };
        let user = format!("{}\n\n{reports}{recall}", input.headline());
        let text = self
            .ctx
            .ask(self.node(), instructions(self.node()), user)
            .await?;
        Ok(StepOutput::with_message(
            self.node(),
            RecordUpdate::ResearchPlan { text: text.clone() },
            MessageKind::Report,
            &text,
        ))
    }
}

/// Which side of the investment debate a researcher argues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bull,
    Bear,
}

/// Bull or bear researcher. Each visit appends one argument.
pub struct ResearcherStep {
    side: Side,
    ctx: RoleContext,
}

impl ResearcherStep {
    pub fn new(side: Side, ctx: RoleContext) -> Self {
        Self { side, ctx }
    }

    fn opponent_last<'a>(&self, input: &'a StepInput) -> Option<&'a str> {
        match self.side {
            Side::Bull => input.bear_history.last(),
            Side::Bear => input.bull_history.last(),
        }
        .map(String::as_str)
    }
}

#[async_trait]
impl Step for ResearcherStep {
    fn node(&self) -> NodeId {
        match self.side {
            Side::Bull => NodeId::BullResearcher,
            Side::Bear => NodeId::BearResearcher,
        }
    }

    #[instrument(skip_all, fields(node = %self.node()))]
    async fn execute(&self, input: StepInput) -> Result<StepOutput> {
        let situation = input.situation();
        let recall = self.ctx.recall(&situation).await;
        let plan = input.research_plan.as_deref().unwrap_or("(none)");
        let rebuttal = match self.opponent_last(&input) {
            Some(arg) => format!("\n\nRespond to the latest opposing argument:\n{arg}"),
            None => String::new(),
        };
        let user = format!(
            "{}\n\nResearch plan:\n{plan}\n\n{situation}\n\nDebate so far:\n{}{rebuttal}{recall}",
            input.headline(),
            input.debate_transcript(),
        );
        let text = self
            .ctx
            .ask(self.node(), instructions(self.node()), user)
            .await?;
        let update = match self.side {
            Side::Bull => RecordUpdate::BullArgument { text: text.clone() },
            Side::Bear => RecordUpdate::BearArgument { text: text.clone() },
        };
        Ok(StepOutput::with_message(
            self.node(),
            update,
            MessageKind::Argument,
            &text,
        ))
    }
}

/// Turns research and debate into the trading plan.
pub struct TraderStep {
    ctx: RoleContext,
}

impl TraderStep {
    pub fn new(ctx: RoleContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Step for TraderStep {
    fn node(&self) -> NodeId {
        NodeId::Trader
    }

    #[instrument(skip_all, fields(node = "trader"))]
    async fn execute(&self, input: StepInput) -> Result<StepOutput> {
        let situation = input.situation();
        let recall = self.ctx.recall(&situation).await;
        let plan = input.research_plan.as_deref().unwrap_or("(none)");
        let user = format!(
            "{}\n\nResearch plan:\n{plan}\n\nInvestment debate:\n{}\n\n{situation}{recall}",
            input.headline(),
            input.debate_transcript(),
        );
        let text = self
            .ctx
            .ask(self.node(), instructions(self.node()), user)
            .await?;
        Ok(StepOutput::with_message(
            self.node(),
            RecordUpdate::TraderPlan { text: text.clone() },
            MessageKind::Decision,
            &text,
        ))
    }
}
