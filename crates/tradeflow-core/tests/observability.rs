//! Observability tests for the run lifecycle.
//!
//! These runs execute under `#[traced_test]` and check that the structured
//! lifecycle events reach the subscriber, including from analyst tasks
//! spawned during the entry phase.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing_test::traced_test;

use tradeflow_core::collab::{ReasoningClient, ToolKind};
use tradeflow_core::fakes::{ScriptedReasoning, StaticTools};
use tradeflow_core::obs::{emit_audit_failed, emit_run_started, run_span};
use tradeflow_core::{
    AuditWriter, Collaborators, ExecutionPlan, MemoryBank, NodeId, RunStatus, StepOptions,
    StepRegistry, StreamingDriver, WorkflowGraph,
};

fn plan(reasoning: ScriptedReasoning, tools: StaticTools) -> ExecutionPlan {
    let reasoning: Arc<dyn ReasoningClient> = Arc::new(reasoning);
    let registry = StepRegistry::standard(
        Collaborators {
            quick: Arc::clone(&reasoning),
            deep: reasoning,
            tools: Arc::new(tools),
            memories: MemoryBank::empty(),
        },
        StepOptions::default(),
    );
    WorkflowGraph::build(&["market", "news"], 1, 1, &registry).unwrap()
}

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 21).unwrap()
}

#[traced_test]
#[test]
fn test_emit_run_started_logs_selection() {
    emit_run_started("run-123", "000001", "2025-06-21", &["market", "news"]);
    assert!(logs_contain("run.started"));
    assert!(logs_contain("market,news"));
}

#[traced_test]
#[test]
fn test_emit_audit_failed_logs_warning() {
    emit_audit_failed("run-err-001", &"disk full");
    assert!(logs_contain("WARN"));
    assert!(logs_contain("disk full"));
}

#[traced_test]
#[test]
fn test_run_span_carries_run_id() {
    let span = run_span("run-span-7", "600519");
    let _guard = span.enter();
    tracing::info!("inside run");
    assert!(logs_contain("run-span-7"));
}

#[traced_test]
#[tokio::test]
async fn test_successful_run_logs_lifecycle() {
    let driver = StreamingDriver::new(plan(ScriptedReasoning::new(), StaticTools::new()));
    let outcome = driver.run(driver.plan().initial_record("000001", as_of())).await;
    assert!(outcome.status.is_success());

    assert!(logs_contain("run.started"));
    assert!(logs_contain("node.completed"));
    assert!(logs_contain("node=market_analyst"));
    assert!(logs_contain("node=risk_manager"));
    assert!(logs_contain("run.finished"));
    assert!(logs_contain(&outcome.run_id));
}

#[traced_test]
#[tokio::test]
async fn test_tool_failure_logged_as_warning() {
    let driver = StreamingDriver::new(plan(
        ScriptedReasoning::new(),
        StaticTools::new().failing(ToolKind::GlobalNews),
    ));
    let outcome = driver.run(driver.plan().initial_record("000001", as_of())).await;

    assert_eq!(outcome.status, RunStatus::Completed { degraded: true });
    assert!(logs_contain("tool.failed"));
}

#[traced_test]
#[tokio::test]
async fn test_failed_run_still_logs_finish() {
    let driver = StreamingDriver::new(plan(
        ScriptedReasoning::new().fail_on(NodeId::InvestJudge),
        StaticTools::new(),
    ));
    let outcome = driver.run(driver.plan().initial_record("000001", as_of())).await;

    assert!(!outcome.status.is_success());
    assert!(logs_contain("run failed"));
    assert!(logs_contain("run.finished"));
}

#[traced_test]
#[tokio::test]
async fn test_unwritable_audit_dir_is_logged_not_fatal() {
    let blocker = tempfile::NamedTempFile::new().unwrap();
    let driver = StreamingDriver::new(plan(ScriptedReasoning::new(), StaticTools::new()))
        .with_audit(AuditWriter::new(blocker.path()));
    let outcome = driver.run(driver.plan().initial_record("000001", as_of())).await;

    assert!(outcome.status.is_success());
    assert!(outcome.audit_path.is_none());
    assert!(logs_contain("audit.failed"));
}
