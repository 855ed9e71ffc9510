//! Assembles a runnable pipeline from configuration and collaborators.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use crate::audit::AuditWriter;
use crate::collab::{EmbeddingClient, ReasoningClient, ToolClient};
use crate::config::PipelineConfig;
use crate::domain::Result;
use crate::driver::{RunOutcome, StreamingDriver};
use crate::graph::{ExecutionPlan, WorkflowGraph};
use crate::memory::MemoryBank;
use crate::reflect::Reflector;
use crate::retry::{RetryingEmbedder, RetryingReasoning};
use crate::step::{Collaborators, StepRegistry};

/// Raw services handed to [`TradingPipeline::connect`].
pub struct Services {
    pub quick: Arc<dyn ReasoningClient>,
    pub deep: Arc<dyn ReasoningClient>,
    pub tools: Arc<dyn ToolClient>,
    pub embedder: Arc<dyn EmbeddingClient>,
}

pub struct TradingPipeline {
    config: PipelineConfig,
    collaborators: Collaborators,
}

impl TradingPipeline {
    /// Use `collaborators` as given.
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            collaborators,
        })
    }

    /// Wrap services in the configured retry policy and open the memory bank,
    /// persisted under `memory_dir` when set.
    pub fn connect(config: PipelineConfig, services: Services) -> Result<Self> {
        let policy = config.retry.clone();
        let quick: Arc<dyn ReasoningClient> =
            Arc::new(RetryingReasoning::new(services.quick, policy.clone()));
        let deep: Arc<dyn ReasoningClient> =
            Arc::new(RetryingReasoning::new(services.deep, policy.clone()));
        let embedder: Arc<dyn EmbeddingClient> =
            Arc::new(RetryingEmbedder::new(services.embedder, policy));

        let memories = match &config.memory_dir {
            Some(dir) => {
                info!(dir = %dir.display(), "opening persisted memories");
                MemoryBank::open(dir, embedder)?
            }
            None => MemoryBank::in_memory(embedder),
        };

        Self::new(
            config,
            Collaborators {
                quick,
                deep,
                tools: services.tools,
                memories,
            },
        )
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn memories(&self) -> &MemoryBank {
        &self.collaborators.memories
    }

    pub fn registry(&self) -> StepRegistry {
        StepRegistry::standard(self.collaborators.clone(), self.config.step_options())
    }

    pub fn compile(&self) -> Result<ExecutionPlan> {
        WorkflowGraph::build(
            &self.config.analysts,
            self.config.max_debate_rounds,
            self.config.max_risk_rounds,
            &self.registry(),
        )
    }

    /// A driver for the configured plan, with timeout and audit applied.
    /// Observers and cancellation are added by the caller.
    pub fn driver(&self) -> Result<StreamingDriver> {
        let mut driver = StreamingDriver::new(self.compile()?);
        if let Some(limit) = self.config.node_timeout() {
            driver = driver.with_node_timeout(limit);
        }
        if let Some(dir) = &self.config.audit_dir {
            driver = driver.with_audit(AuditWriter::new(dir));
        }
        Ok(driver)
    }

    /// Compile, run over a fresh record and return the outcome.
    pub async fn propagate(&self, subject: &str, as_of: NaiveDate) -> Result<RunOutcome> {
        let driver = self.driver()?;
        let record = driver.plan().initial_record(subject, as_of);
        Ok(driver.run(record).await)
    }

    pub fn reflector(&self) -> Reflector {
        Reflector::new(
            Arc::clone(&self.collaborators.deep),
            self.collaborators.memories.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{HashEmbedder, ScriptedReasoning, StaticTools};

    fn services() -> Services {
        let reasoning: Arc<dyn ReasoningClient> = Arc::new(ScriptedReasoning::new());
        Services {
            quick: Arc::clone(&reasoning),
            deep: reasoning,
            tools: Arc::new(StaticTools::new()),
            embedder: Arc::new(HashEmbedder::default()),
        }
    }

    #[tokio::test]
    async fn test_propagate_with_defaults() {
        let pipeline = TradingPipeline::connect(PipelineConfig::default(), services()).unwrap();
        let outcome = pipeline
            .propagate("000001", NaiveDate::from_ymd_opt(2025, 6, 21).unwrap())
            .await
            .unwrap();
        assert!(outcome.status.is_success());
        assert_eq!(outcome.record.reports.len(), 4);
    }

    #[test]
    fn test_connect_opens_persisted_memories() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            memory_dir: Some(dir.path().to_path_buf()),
            ..PipelineConfig::default()
        };
        let pipeline = TradingPipeline::connect(config, services()).unwrap();
        assert_eq!(pipeline.memories().roles().count(), 6);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            max_debate_rounds: 0,
            ..PipelineConfig::default()
        };
        assert!(TradingPipeline::connect(config, services()).is_err());
    }
}
