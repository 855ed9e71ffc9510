//! Lessons stored by reflection are recalled by later runs.

use std::sync::Arc;

use chrono::NaiveDate;

use tradeflow_core::collab::{EmbeddingClient, ReasoningClient};
use tradeflow_core::fakes::{HashEmbedder, ScriptedReasoning, StaticTools};
use tradeflow_core::{
    MemoryRole, NodeId, Outcome, PipelineConfig, RetryPolicy, Services, TradingPipeline,
};

const LESSON: &str = "Trim exposure when momentum fades";

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 21).unwrap()
}

fn config(memory_dir: &std::path::Path) -> PipelineConfig {
    PipelineConfig {
        analysts: vec!["market".into()],
        memory_dir: Some(memory_dir.to_path_buf()),
        retry: RetryPolicy::none(),
        ..PipelineConfig::default()
    }
}

fn services(reasoning: Arc<ScriptedReasoning>, embedder: Arc<dyn EmbeddingClient>) -> Services {
    let reasoning: Arc<dyn ReasoningClient> = reasoning;
    Services {
        quick: Arc::clone(&reasoning),
        deep: reasoning,
        tools: Arc::new(StaticTools::new()),
        embedder,
    }
}

#[tokio::test]
async fn test_reflection_lessons_reach_the_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let reasoning = Arc::new(ScriptedReasoning::new().with_answer(NodeId::Trader, LESSON));

    let first = TradingPipeline::connect(
        config(dir.path()),
        services(reasoning.clone(), Arc::new(HashEmbedder::default())),
    )
    .unwrap();
    let outcome = first.propagate("000001", as_of()).await.unwrap();
    assert!(outcome.status.is_success());

    let report = first
        .reflector()
        .reflect(&outcome.record, &Outcome::new(-3.5))
        .await
        .unwrap();
    assert_eq!(report.stored.len(), MemoryRole::ALL.len());
    assert!(report.skipped.is_empty());
    assert!(dir.path().join("trader.json").exists());

    // A fresh pipeline over the same directory sees the stored lessons.
    let second = TradingPipeline::connect(
        config(dir.path()),
        services(reasoning.clone(), Arc::new(HashEmbedder::default())),
    )
    .unwrap();
    assert_eq!(second.memories().get(MemoryRole::Trader).unwrap().len(), 1);
    second.propagate("000001", as_of()).await.unwrap();

    let trader_prompts = reasoning.prompts_for(NodeId::Trader);
    let before = trader_prompts.first().unwrap();
    let after = trader_prompts.last().unwrap();
    assert!(!before.contains("Lessons from similar past situations"));
    assert!(after.contains("Lessons from similar past situations"));
    assert!(after.contains(&format!("- {LESSON}")));
}

#[tokio::test]
async fn test_reflection_prompt_carries_the_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let reasoning = Arc::new(ScriptedReasoning::new());
    let pipeline = TradingPipeline::connect(
        config(dir.path()),
        services(reasoning.clone(), Arc::new(HashEmbedder::default())),
    )
    .unwrap();
    let outcome = pipeline.propagate("000001", as_of()).await.unwrap();

    pipeline
        .reflector()
        .reflect(&outcome.record, &Outcome::new(2.0))
        .await
        .unwrap();

    let last = reasoning.prompts_for(NodeId::RiskManager).pop().unwrap();
    assert!(last.starts_with("Realised return: +2.00%"));
    assert!(last.contains("FINAL TRANSACTION PROPOSAL"));
}

#[tokio::test]
async fn test_unreadable_memories_do_not_fail_a_run() {
    let dir = tempfile::tempdir().unwrap();
    let reasoning = Arc::new(ScriptedReasoning::new());

    let narrow = TradingPipeline::connect(
        config(dir.path()),
        services(reasoning.clone(), Arc::new(HashEmbedder::with_dim(8))),
    )
    .unwrap();
    let outcome = narrow.propagate("000001", as_of()).await.unwrap();
    narrow
        .reflector()
        .reflect(&outcome.record, &Outcome::new(1.0))
        .await
        .unwrap();

    // Stored vectors no longer match the embedder: recall fails and is skipped.
    let wide = TradingPipeline::connect(
        config(dir.path()),
        services(reasoning.clone(), Arc::new(HashEmbedder::with_dim(64))),
    )
    .unwrap();
    let outcome = wide.propagate("000001", as_of()).await.unwrap();
    assert!(outcome.status.is_success());
    let after = reasoning.prompts_for(NodeId::Trader).pop().unwrap();
    assert!(!after.contains("Lessons from similar past situations"));
}

#[tokio::test]
async fn test_failed_embedding_fails_reflection() {
    let dir = tempfile::tempdir().unwrap();
    let reasoning = Arc::new(ScriptedReasoning::new());
    let pipeline = TradingPipeline::connect(
        config(dir.path()),
        services(reasoning, Arc::new(HashEmbedder::failing())),
    )
    .unwrap();

    // Recall against empty stores never embeds, so the run itself succeeds.
    let outcome = pipeline.propagate("000001", as_of()).await.unwrap();
    assert!(outcome.status.is_success());

    let err = pipeline
        .reflector()
        .reflect(&outcome.record, &Outcome::new(-1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, tradeflow_core::FlowError::MemoryBackend(_)));
}
