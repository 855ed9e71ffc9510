//! Cancellation, per-node deadlines and slow observers.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;

use tradeflow_core::collab::ReasoningClient;
use tradeflow_core::fakes::{RecordingObserver, ScriptedReasoning, StaticTools};
use tradeflow_core::{
    cancellation, Collaborators, ExecutionPlan, FinalDecision, MemoryBank, NodeId, RunStatus,
    Signal, StepOptions, StepRegistry, StreamEvent, StreamingDriver, WorkflowGraph,
};

fn plan(analysts: &[&str], reasoning: ScriptedReasoning) -> ExecutionPlan {
    let reasoning: Arc<dyn ReasoningClient> = Arc::new(reasoning);
    let registry = StepRegistry::standard(
        Collaborators {
            quick: Arc::clone(&reasoning),
            deep: reasoning,
            tools: Arc::new(StaticTools::new()),
            memories: MemoryBank::empty(),
        },
        StepOptions::default(),
    );
    WorkflowGraph::build(analysts, 1, 1, &registry).unwrap()
}

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 21).unwrap()
}

#[tokio::test]
async fn test_cancel_before_start_runs_nothing() {
    let (handle, token) = cancellation();
    handle.cancel();
    let observer = Arc::new(RecordingObserver::new());
    let driver = StreamingDriver::new(plan(&["market"], ScriptedReasoning::new()))
        .with_cancellation(token)
        .with_observer(observer.clone());
    let outcome = driver.run(driver.plan().initial_record("000001", as_of())).await;

    assert!(matches!(outcome.status, RunStatus::Cancelled { .. }));
    assert!(outcome.visits.is_empty());
    assert!(outcome.record.reports.is_empty());
    assert_eq!(observer.events().len(), 1);
    assert!(matches!(
        outcome.record.final_decision,
        Some(FinalDecision::Cancelled { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_running_step() {
    let reasoning = ScriptedReasoning::new().with_delay(NodeId::Trader, Duration::from_secs(600));
    let (handle, token) = cancellation();
    let observer = Arc::new(RecordingObserver::new());
    let driver = StreamingDriver::new(plan(&["market"], reasoning))
        .with_cancellation(token)
        .with_observer(observer.clone());
    let record = driver.plan().initial_record("000001", as_of());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });
    let outcome = driver.run(record).await;
    canceller.await.unwrap();

    assert_eq!(
        outcome.status,
        RunStatus::Cancelled {
            node: Some(NodeId::Trader)
        }
    );
    assert!(!outcome.visits.contains(&NodeId::Trader));
    assert!(outcome.visits.contains(&NodeId::BearResearcher));
    assert!(outcome.record.trader_plan.is_none());
    assert_eq!(
        outcome.record.final_decision.as_ref().map(FinalDecision::text),
        Some("CANCELLED at trader".to_string())
    );
    assert_eq!(outcome.signal(), Signal::Hold);
    assert!(matches!(
        observer.events().last(),
        Some(StreamEvent::Finished { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_entry_phase_aborts_analysts() {
    let reasoning = ScriptedReasoning::new()
        .with_delay(
            NodeId::Analyst(tradeflow_core::AnalystRole::News),
            Duration::from_secs(600),
        );
    let (handle, token) = cancellation();
    let driver = StreamingDriver::new(plan(&["market", "news"], reasoning)).with_cancellation(token);
    let record = driver.plan().initial_record("000001", as_of());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.cancel();
    });
    let outcome = driver.run(record).await;

    assert!(matches!(outcome.status, RunStatus::Cancelled { .. }));
    assert_eq!(
        outcome.visits,
        vec![NodeId::Analyst(tradeflow_core::AnalystRole::Market)]
    );
    assert!(!outcome.visits.contains(&NodeId::ResearchManager));
}

#[tokio::test(start_paused = true)]
async fn test_node_deadline_fails_run() {
    let reasoning =
        ScriptedReasoning::new().with_delay(NodeId::BullResearcher, Duration::from_secs(30));
    let driver = StreamingDriver::new(plan(&[], reasoning)).with_node_timeout(Duration::from_secs(5));
    let outcome = driver.run(driver.plan().initial_record("000001", as_of())).await;

    match &outcome.status {
        RunStatus::Failed { node, error } => {
            assert_eq!(*node, Some(NodeId::BullResearcher));
            assert!(error.contains("deadline"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(outcome.visits, vec![NodeId::ResearchManager]);
    assert!(outcome.record.investment_debate.bull_history.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_slow_observer_holds_back_next_node() {
    let observer = Arc::new(RecordingObserver::with_ack_delay(Duration::from_secs(10)));
    let driver = StreamingDriver::new(plan(&[], ScriptedReasoning::new())).with_observer(observer.clone());

    let started = tokio::time::Instant::now();
    let outcome = driver.run(driver.plan().initial_record("000001", as_of())).await;

    // Ten sequential nodes plus the finished event, each acknowledged in turn.
    assert_eq!(outcome.visits.len(), 10);
    assert!(started.elapsed() >= Duration::from_secs(110));
    assert_eq!(observer.node_sequence(), outcome.visits);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_for_acknowledgment() {
    let observer = Arc::new(RecordingObserver::with_ack_delay(Duration::from_secs(10)));
    let (handle, token) = cancellation();
    let driver = StreamingDriver::new(plan(&[], ScriptedReasoning::new()))
        .with_observer(observer.clone())
        .with_cancellation(token);
    let record = driver.plan().initial_record("000001", as_of());

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.cancel();
    });
    let outcome = driver.run(record).await;

    assert_eq!(
        outcome.status,
        RunStatus::Cancelled {
            node: Some(NodeId::ResearchManager)
        }
    );
    assert_eq!(outcome.visits, vec![NodeId::ResearchManager]);
    assert!(outcome.record.research_plan.is_some());
    // The interrupted acknowledgment is dropped; the finished event still lands.
    let events = observer.events();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], StreamEvent::Finished { .. }));
}
