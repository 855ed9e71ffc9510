//! Terminal deciders: the investment judge and the risk manager.

use async_trait::async_trait;
use tracing::instrument;

use crate::domain::{MessageKind, NodeId, RecordUpdate, Result};

use super::templates::instructions;
use super::{RoleContext, Step, StepInput, StepOutput};

/// Writes the investment verdict once the risk debate has ended.
pub struct InvestJudgeStep {
    ctx: RoleContext,
}

impl InvestJudgeStep {
    pub fn new(ctx: RoleContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Step for InvestJudgeStep {
    fn node(&self) -> NodeId {
        NodeId::InvestJudge
    }

    #[instrument(skip_all, fields(node = "invest_judge"))]
    async fn execute(&self, input: StepInput) -> Result<StepOutput> {
        let situation = input.situation();
        let recall = self.ctx.recall(&situation).await;
        let plan = input.trader_plan.as_deref().unwrap_or("(no trading plan)");
        let user = format!(
            "{}\n\nTrader's plan:\n{plan}\n\n{situation}\n\nRisk debate:\n{}{recall}",
            input.headline(),
            input.risk_transcript(),
        );
        let text = self
            .ctx
            .ask(self.node(), instructions(self.node()), user)
            .await?;
        Ok(StepOutput::with_message(
            self.node(),
            RecordUpdate::JudgeDecision { text: text.clone() },
            MessageKind::Decision,
            &text,
        ))
    }
}

/// Makes the final call. Its update also sets the record's final decision.
pub struct RiskManagerStep {
    ctx: RoleContext,
}

impl RiskManagerStep {
    pub fn new(ctx: RoleContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Step for RiskManagerStep {
    fn node(&self) -> NodeId {
        NodeId::RiskManager
    }

    #[instrument(skip_all, fields(node = "risk_manager"))]
    async fn execute(&self, input: StepInput) -> Result<StepOutput> {
        let situation = input.situation();
        let recall = self.ctx.recall(&situation).await;
        let user = format!(
            "{}\n\nResearch plan:\n{}\n\nTrader's plan:\n{}\n\nJudge's verdict:\n{}\n\n\
             Risk debate:\n{}{recall}",
            input.headline(),
            input.research_plan.as_deref().unwrap_or("(none)"),
            input.trader_plan.as_deref().unwrap_or("(none)"),
            input.judge_decision.as_deref().unwrap_or("(none)"),
            input.risk_transcript(),
        );
        let text = self
            .ctx
            .ask(self.node(), instructions(self.node()), user)
            .await?;
        Ok(StepOutput::with_message(
            self.node(),
            RecordUpdate::RiskDecision { text: text.clone() },
            MessageKind::Decision,
            &text,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedReasoning;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_risk_manager_emits_decision() {
        let step = RiskManagerStep::new(RoleContext::new(Arc::new(ScriptedReasoning::new())));
        let out = step
            .execute(StepInput {
                judge_decision: Some("buy on dips".into()),
                ..StepInput::default()
            })
            .await
            .unwrap();
        let RecordUpdate::RiskDecision { text } = out.update else {
            panic!("expected risk decision");
        };
        assert!(text.contains("FINAL TRANSACTION PROPOSAL"));
    }

    #[tokio::test]
    async fn test_judge_failure_propagates() {
        let step = InvestJudgeStep::new(RoleContext::new(Arc::new(
            ScriptedReasoning::new().fail_on(NodeId::InvestJudge),
        )));
        assert!(step.execute(StepInput::default()).await.is_err());
    }
}
