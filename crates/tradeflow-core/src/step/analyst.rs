//! Analyst steps: optional tool sub-step, then a structured report.
//!
//! Tool failures are folded into the report as visible notes instead of
//! failing the run. Reasoning failures propagate.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::collab::{Completion, Prompt, ReasoningClient, ToolClient, ToolRequest};
use crate::domain::{
    report_update, AnalystRole, MessageEntry, MessageKind, NodeId, ReasoningFailure, Report,
    Result,
};
use crate::obs;

use super::templates::{analyst_shape, analyst_tools, instructions};
use super::{Step, StepInput, StepOutput};

pub struct AnalystStep {
    role: AnalystRole,
    reasoning: Arc<dyn ReasoningClient>,
    tools: Option<Arc<dyn ToolClient>>,
}

impl AnalystStep {
    /// Analyst that fetches its role's data before reasoning.
    pub fn new(
        role: AnalystRole,
        reasoning: Arc<dyn ReasoningClient>,
        tools: Arc<dyn ToolClient>,
    ) -> Self {
        Self {
            role,
            reasoning,
            tools: Some(tools),
        }
    }

    /// Analyst that reasons from the subject alone.
    pub fn offline(role: AnalystRole, reasoning: Arc<dyn ReasoningClient>) -> Self {
        Self {
            role,
            reasoning,
            tools: None,
        }
    }

    async fn gather_data(&self, input: &StepInput) -> ToolData {
        let mut data = ToolData::default();
        let (Some(tools), Some(as_of)) = (&self.tools, input.as_of) else {
            return data;
        };
        let node = NodeId::Analyst(self.role).to_string();

        for binding in analyst_tools(self.role) {
            let request = ToolRequest {
                kind: binding.kind,
                ticker: input.subject.clone(),
                as_of,
                lookback_days: binding.lookback_days,
            };
            match tools.call(&request).await {
                Ok(text) => {
                    data.messages
                        .push(MessageEntry::new(&node, MessageKind::ToolResult, &text));
                    data.outputs.insert(binding.kind.as_str().to_string(), text);
                }
                Err(failure) => {
                    obs::emit_tool_failed(&node, &failure.tool, &failure.reason);
                    let note = failure.to_string();
                    data.messages
                        .push(MessageEntry::new(&node, MessageKind::ToolError, &note));
                    data.errors.push(note);
                }
            }
        }
        data
    }
}

#[derive(Default)]
struct ToolData {
    outputs: BTreeMap<String, String>,
    errors: Vec<String>,
    messages: Vec<MessageEntry>,
}

impl ToolData {
    fn render(&self) -> String {
        let mut out = String::new();
        for (tool, text) in &self.outputs {
            out.push_str(&format!("\n\n### {tool}\n{text}"));
        }
        for note in &self.errors {
            out.push_str(&format!("\n\n[data unavailable] {note}"));
        }
        out
    }
}

#[async_trait]
impl Step for AnalystStep {
    fn node(&self) -> NodeId {
        NodeId::Analyst(self.role)
    }

    #[instrument(skip_all, fields(node = %self.node()))]
    async fn execute(&self, input: StepInput) -> Result<StepOutput> {
        let node = self.node();
        let data = self.gather_data(&input).await;

        let shape = analyst_shape(self.role);
        let user = format!(
            "{}\nProduce the {} report.{}",
            input.headline(),
            self.role,
            data.render()
        );
        let prompt = Prompt::new(node, instructions(node), user);

        let body = match self.reasoning.complete(&prompt, Some(&shape)).await? {
            Completion::Structured(value) if value.is_object() => value,
            Completion::Structured(other) => {
                return Err(ReasoningFailure::MalformedOutput(format!(
                    "{node}: expected an object, got {other}"
                ))
                .into());
            }
            Completion::Text(text) => {
                return Err(ReasoningFailure::MalformedOutput(format!(
                    "{node}: expected structured output, got text ({} chars)",
                    text.len()
                ))
                .into());
            }
        };
        let missing = shape.missing_fields(&body);
        if !missing.is_empty() {
            return Err(ReasoningFailure::MalformedOutput(format!(
                "{node}: missing fields {}",
                missing.join(", ")
            ))
            .into());
        }

        let report = Report {
            role: self.role,
            body,
            tool_outputs: data.outputs,
            tool_errors: data.errors,
        };
        let mut messages = data.messages;
        messages.push(MessageEntry::new(
            node.to_string(),
            MessageKind::Report,
            report.render(),
        ));

        Ok(StepOutput {
            update: report_update(report),
            messages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::ToolKind;
    use crate::domain::{FlowError, RecordUpdate, ReportSlot};
    use crate::fakes::{ScriptedReasoning, StaticTools};
    use chrono::NaiveDate;

    fn input() -> StepInput {
        StepInput {
            subject: "600519".into(),
            as_of: NaiveDate::from_ymd_opt(2025, 6, 21),
            ..StepInput::default()
        }
    }

    #[tokio::test]
    async fn test_analyst_writes_own_slot_with_tool_data() {
        let tools = Arc::new(StaticTools::new());
        let step = AnalystStep::new(
            AnalystRole::Social,
            Arc::new(ScriptedReasoning::new()),
            tools.clone(),
        );
        let out = step.execute(input()).await.unwrap();
        match out.update {
            RecordUpdate::Report { slot, report } => {
                assert_eq!(slot, ReportSlot::Sentiment);
                assert_eq!(report.tool_outputs.len(), 2);
                assert!(!report.is_degraded());
            }
            other => panic!("unexpected update {other:?}"),
        }
        assert_eq!(tools.calls(), vec![ToolKind::StockNews, ToolKind::Sentiment]);
    }

    #[tokio::test]
    async fn test_tool_failure_degrades_report() {
        let step = AnalystStep::new(
            AnalystRole::Market,
            Arc::new(ScriptedReasoning::new()),
            Arc::new(StaticTools::new().failing(ToolKind::TechnicalIndicators)),
        );
        let out = step.execute(input()).await.unwrap();
        let RecordUpdate::Report { report, .. } = out.update else {
            panic!("expected report");
        };
        assert_eq!(report.tool_errors.len(), 1);
        assert!(report.render().contains("[data unavailable]"));
        assert!(out
            .messages
            .iter()
            .any(|m| m.kind == MessageKind::ToolError));
    }

    #[tokio::test]
    async fn test_reasoning_failure_propagates() {
        let node = NodeId::Analyst(AnalystRole::News);
        let step = AnalystStep::offline(
            AnalystRole::News,
            Arc::new(ScriptedReasoning::new().fail_on(node)),
        );
        let err = step.execute(input()).await.unwrap_err();
        assert!(matches!(err, FlowError::Reasoning(_)));
    }

    #[tokio::test]
    async fn test_offline_analyst_skips_tools() {
        let step = AnalystStep::offline(AnalystRole::Fundamentals, Arc::new(ScriptedReasoning::new()));
        let out = step.execute(input()).await.unwrap();
        assert_eq!(out.messages.len(), 1);
        assert_eq!(out.messages[0].kind, MessageKind::Report);
    }
}
