//! Risk debaters. Each visit appends one argument for its speaker.

use async_trait::async_trait;
use tracing::instrument;

use crate::domain::{MessageKind, NodeId, RecordUpdate, Result, RiskSpeaker};

use super::templates::risk_instructions;
use super::{RoleContext, Step, StepInput, StepOutput};

pub struct RiskDebaterStep {
    speaker: RiskSpeaker,
    ctx: RoleContext,
}

impl RiskDebaterStep {
    pub fn new(speaker: RiskSpeaker, ctx: RoleContext) -> Self {
        Self { speaker, ctx }
    }
}

#[async_trait]
impl Step for RiskDebaterStep {
    fn node(&self) -> NodeId {
        match self.speaker {
            RiskSpeaker::Conservative => NodeId::Conservative,
            RiskSpeaker::Aggressive => NodeId::Aggressive,
            RiskSpeaker::Neutral => NodeId::Neutral,
        }
    }

    #[instrument(skip_all, fields(node = %self.node(), round = input.risk_round))]
    async fn execute(&self, input: StepInput) -> Result<StepOutput> {
        let plan = input.trader_plan.as_deref().unwrap_or("(no trading plan)");
        let user = format!(
            "{}\nRisk round {}.\n\nTrader's plan:\n{plan}\n\n{}\n\nDebate so far:\n{}",
            input.headline(),
            input.risk_round,
            input.situation(),
            input.risk_transcript(),
        );
        let text = self
            .ctx
            .ask(self.node(), risk_instructions(self.speaker), user)
            .await?;
        Ok(StepOutput::with_message(
            self.node(),
            RecordUpdate::RiskArgument {
                speaker: self.speaker,
                text: text.clone(),
            },
            MessageKind::Argument,
            &text,
        ))
    }
}
