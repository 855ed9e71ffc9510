//! Node → step factory registry.
//!
//! The workflow graph asks the registry for a step per node while it compiles
//! the execution plan. A node with no factory is a configuration error.

use std::collections::HashMap;
use std::sync::Arc;

use crate::collab::{ReasoningClient, ToolClient};
use crate::domain::{AnalystRole, GraphConfigurationError, NodeId, RiskSpeaker};
use crate::memory::MemoryBank;

use super::{
    AnalystStep, InvestJudgeStep, ResearchManagerStep, ResearcherStep, RiskDebaterStep,
    RiskManagerStep, RoleContext, Side, Step, TraderStep,
};

/// Services shared by every step of a pipeline.
#[derive(Clone)]
pub struct Collaborators {
    /// Used by analysts.
    pub quick: Arc<dyn ReasoningClient>,
    /// Used by every other role.
    pub deep: Arc<dyn ReasoningClient>,
    pub tools: Arc<dyn ToolClient>,
    pub memories: MemoryBank,
}

/// Knobs that shape how steps are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOptions {
    pub recall_matches: usize,
    /// Run the analyst tool sub-step.
    pub online_tools: bool,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            recall_matches: 2,
            online_tools: true,
        }
    }
}

pub type StepFactory = Arc<dyn Fn(&Collaborators, &StepOptions) -> Arc<dyn Step> + Send + Sync>;

pub struct StepRegistry {
    collaborators: Collaborators,
    options: StepOptions,
    factories: HashMap<NodeId, StepFactory>,
}

impl StepRegistry {
    /// A registry with no factories.
    pub fn empty(collaborators: Collaborators, options: StepOptions) -> Self {
        Self {
            collaborators,
            options,
            factories: HashMap::new(),
        }
    }

    /// A registry with the built-in step for every node.
    pub fn standard(collaborators: Collaborators, options: StepOptions) -> Self {
        let mut registry = Self::empty(collaborators, options);

        for role in AnalystRole::ALL {
            registry.register(
                NodeId::Analyst(role),
                Arc::new(move |c: &Collaborators, o: &StepOptions| -> Arc<dyn Step> {
                    if o.online_tools {
                        Arc::new(AnalystStep::new(role, Arc::clone(&c.quick), Arc::clone(&c.tools)))
                    } else {
                        Arc::new(AnalystStep::offline(role, Arc::clone(&c.quick)))
                    }
                }),
            );
        }

        registry.register(
            NodeId::ResearchManager,
            Arc::new(|c: &Collaborators, o: &StepOptions| -> Arc<dyn Step> {
                Arc::new(ResearchManagerStep::new(deep_context(c, o, NodeId::ResearchManager)))
            }),
        );
        for (node, side) in [
            (NodeId::BullResearcher, Side::Bull),
            (NodeId::BearResearcher, Side::Bear),
        ] {
            registry.register(
                node,
                Arc::new(move |c: &Collaborators, o: &StepOptions| -> Arc<dyn Step> {
                    Arc::new(ResearcherStep::new(side, deep_context(c, o, node)))
                }),
            );
        }
        registry.register(
            NodeId::Trader,
            Arc::new(|c: &Collaborators, o: &StepOptions| -> Arc<dyn Step> {
                Arc::new(TraderStep::new(deep_context(c, o, NodeId::Trader)))
            }),
        );
        for (node, speaker) in [
            (NodeId::Conservative, RiskSpeaker::Conservative),
            (NodeId::Aggressive, RiskSpeaker::Aggressive),
            (NodeId::Neutral, RiskSpeaker::Neutral),
        ] {
            registry.register(
                node,
                Arc::new(move |c: &Collaborators, o: &StepOptions| -> Arc<dyn Step> {
                    Arc::new(RiskDebaterStep::new(speaker, deep_context(c, o, node)))
                }),
            );
        }
        registry.register(
            NodeId::InvestJudge,
            Arc::new(|c: &Collaborators, o: &StepOptions| -> Arc<dyn Step> {
                Arc::new(InvestJudgeStep::new(deep_context(c, o, NodeId::InvestJudge)))
            }),
        );
        registry.register(
            NodeId::RiskManager,
            Arc::new(|c: &Collaborators, o: &StepOptions| -> Arc<dyn Step> {
                Arc::new(RiskManagerStep::new(deep_context(c, o, NodeId::RiskManager)))
            }),
        );
        registry
    }

    /// Register or replace the factory for `node`.
    pub fn register(&mut self, node: NodeId, factory: StepFactory) {
        self.factories.insert(node, factory);
    }

    /// Replace `node`'s step with a fixed instance.
    pub fn register_step(&mut self, node: NodeId, step: Arc<dyn Step>) {
        self.register(
            node,
            Arc::new(move |_: &Collaborators, _: &StepOptions| Arc::clone(&step)),
        );
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.factories.contains_key(&node)
    }

    /// Instantiate the step for `node`.
    pub fn build(&self, node: NodeId) -> Result<Arc<dyn Step>, GraphConfigurationError> {
        let factory = self
            .factories
            .get(&node)
            .ok_or_else(|| GraphConfigurationError::MissingStep(node.to_string()))?;
        Ok(factory(&self.collaborators, &self.options))
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }
}

fn deep_context(c: &Collaborators, o: &StepOptions, node: NodeId) -> RoleContext {
    let memory = node.memory_role().and_then(|role| c.memories.get(role));
    RoleContext::new(Arc::clone(&c.deep)).with_memory(memory, o.recall_matches)
}
