//! Streaming execution of a compiled plan.
//!
//! The driver owns the record for the duration of a run. It executes the
//! entry phase concurrently, joins it, then walks the sequential part of the
//! plan one node at a time. After every node it applies the step's update,
//! emits a [`StreamEvent::Node`] and waits for each observer to acknowledge
//! before moving on.
//!
//! Any fatal error stops the run: no later node executes, the record's final
//! decision is error-tagged and observers still receive the terminal
//! [`StreamEvent::Finished`] event.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, warn, Instrument};
use uuid::Uuid;

use crate::audit::AuditWriter;
use crate::domain::{
    update_origin, AnalysisRecord, FinalDecision, FlowError, MessageEntry, MessageKind, NodeId,
    Result,
};
use crate::graph::ExecutionPlan;
use crate::obs;
use crate::signal::{Signal, SignalExtractor};
use crate::step::{Step, StepInput, StepOutput};
use crate::stream::{self as events, NodeDelta, Observer, RunStatus, StreamEvent};

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Caller side of a cancellation signal.
#[derive(Debug)]
pub struct CancellationHandle {
    tx: watch::Sender<bool>,
}

impl CancellationHandle {
    /// Request cancellation. The run stops before its next node, or
    /// immediately if a node or acknowledgment is in flight.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Driver side of a cancellation signal.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    rx: watch::Receiver<bool>,
}

impl CancellationToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pending forever if the handle
    /// is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a linked cancellation handle and token.
pub fn cancellation() -> (CancellationHandle, CancellationToken) {
    let (tx, rx) = watch::channel(false);
    (CancellationHandle { tx }, CancellationToken { rx })
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub record: AnalysisRecord,
    pub status: RunStatus,
    /// Nodes whose updates were applied, in application order.
    pub visits: Vec<NodeId>,
    /// Every emitted event, ending with `Finished`.
    pub events: Vec<StreamEvent>,
    pub audit_path: Option<PathBuf>,
}

impl RunOutcome {
    /// Trading signal for the run. HOLD unless the run decided.
    pub fn signal(&self) -> Signal {
        match &self.record.final_decision {
            Some(decision) if self.status.is_success() => {
                SignalExtractor::extract_decision(decision)
            }
            _ => Signal::Hold,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

enum Halt {
    Failed {
        node: Option<NodeId>,
        error: FlowError,
    },
    Cancelled {
        node: Option<NodeId>,
    },
}

impl Halt {
    fn failed(node: NodeId, error: FlowError) -> Self {
        Self::Failed {
            node: Some(node),
            error,
        }
    }
}

/// A finished step awaiting commit.
struct Visit {
    node: NodeId,
    elapsed: Duration,
    /// The node closed a risk turn and the controller opened another round.
    begin_round: bool,
}

struct RunState {
    run_id: String,
    record: AnalysisRecord,
    visits: Vec<NodeId>,
    events: Vec<StreamEvent>,
    seq: u64,
}

/// Executes an [`ExecutionPlan`] and streams per-node updates.
pub struct StreamingDriver {
    plan: ExecutionPlan,
    observers: Vec<Arc<dyn Observer>>,
    node_timeout: Option<Duration>,
    cancel: CancellationToken,
    audit: Option<AuditWriter>,
}

impl StreamingDriver {
    pub fn new(plan: ExecutionPlan) -> Self {
        Self {
            plan,
            observers: Vec::new(),
            node_timeout: None,
            cancel: CancellationToken::never(),
            audit: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Fail a node with [`FlowError::NodeTimeout`] when it runs longer than
    /// `limit`.
    pub fn with_node_timeout(mut self, limit: Duration) -> Self {
        self.node_timeout = Some(limit);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Write an audit artifact when the run ends.
    pub fn with_audit(mut self, writer: AuditWriter) -> Self {
        self.audit = Some(writer);
        self
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Run the plan over `record` to completion.
    pub async fn run(&self, record: AnalysisRecord) -> RunOutcome {
        self.run_with(record, &self.observers).await
    }

    /// Run on a background task and expose the events as a stream.
    ///
    /// The stream yields every event in order and ends after `Finished`.
    /// Configured observers still receive events. The stream holds the driver
    /// back when it is not polled.
    pub fn stream(
        self: Arc<Self>,
        record: AnalysisRecord,
    ) -> (BoxStream<'static, StreamEvent>, JoinHandle<RunOutcome>) {
        let (observer, rx) = events::channel(1);
        let handle = tokio::spawn(async move {
            let mut observers = self.observers.clone();
            observers.push(Arc::new(observer));
            self.run_with(record, &observers).await
        });
        let event_stream = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed();
        (event_stream, handle)
    }

    async fn run_with(&self, record: AnalysisRecord, observers: &[Arc<dyn Observer>]) -> RunOutcome {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id, record.subject());
        self.execute(run_id, record, observers).instrument(span).await
    }

    async fn execute(
        &self,
        run_id: String,
        record: AnalysisRecord,
        observers: &[Arc<dyn Observer>],
    ) -> RunOutcome {
        let started = Instant::now();
        let analysts: Vec<&str> = self.plan.analysts().iter().map(|r| r.as_str()).collect();
        obs::emit_run_started(&run_id, record.subject(), &record.as_of().to_string(), &analysts);

        let mut state = RunState {
            run_id,
            record,
            visits: Vec::new(),
            events: Vec::new(),
            seq: 0,
        };
        let mut cancel = self.cancel.clone();

        let result = if state.record.selected_analysts != self.plan.analysts() {
            Err(Halt::Failed {
                node: None,
                error: FlowError::InvalidConfig(
                    "record was created for a different analyst selection".into(),
                ),
            })
        } else {
            match self.entry_phase(&mut state, observers, &mut cancel).await {
                Ok(()) => {
                    self.sequential_phase(&mut state, observers, &mut cancel)
                        .await
                }
                Err(halt) => Err(halt),
            }
        };
        let status = settle(&mut state.record, result);

        let audit_path = match self.audit.clone() {
            Some(writer) => {
                let snapshot = state.record.clone();
                match tokio::task::spawn_blocking(move || writer.write(&snapshot)).await {
                    Ok(Ok(path)) => Some(path),
                    Ok(Err(e)) => {
                        obs::emit_audit_failed(&state.run_id, &format!("{e:#}"));
                        None
                    }
                    Err(join_error) => {
                        obs::emit_audit_failed(&state.run_id, &join_error.to_string());
                        None
                    }
                }
            }
            None => None,
        };

        state.seq += 1;
        let finished = StreamEvent::Finished {
            seq: state.seq,
            status: status.clone(),
            record: Box::new(state.record.clone()),
        };
        for observer in observers {
            observer.on_event(&finished).await;
        }
        state.events.push(finished);

        obs::emit_run_finished(
            &state.run_id,
            status_label(&status),
            started.elapsed().as_millis() as u64,
            state.visits.len(),
        );

        RunOutcome {
            run_id: state.run_id,
            record: state.record,
            status,
            visits: state.visits,
            events: state.events,
            audit_path,
        }
    }

    /// Run the selected analysts concurrently and apply their updates in
    /// completion order. Returns once every analyst has been applied.
    async fn entry_phase(
        &self,
        state: &mut RunState,
        observers: &[Arc<dyn Observer>],
        cancel: &mut CancellationToken,
    ) -> std::result::Result<(), Halt> {
        let steps = self.plan.entry_steps();
        if steps.is_empty() {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(Halt::Cancelled {
                node: steps.first().map(|s| s.node()),
            });
        }

        let mut join_set = JoinSet::new();
        for step in steps {
            let step = Arc::clone(step);
            let input = StepInput::gather(&state.record, step.node());
            let limit = self.node_timeout;
            join_set.spawn(
                async move {
                    let started = Instant::now();
                    let result = run_step(step.as_ref(), input, limit).await;
                    (step.node(), result, started.elapsed())
                }
                .in_current_span(),
            );
        }

        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    join_set.abort_all();
                    return Err(Halt::Cancelled { node: None });
                }
                joined = join_set.join_next() => joined,
            };
            let Some(joined) = joined else {
                return Ok(());
            };
            let outcome = match joined {
                Ok((node, Ok(output), elapsed)) => {
                    let visit = Visit {
                        node,
                        elapsed,
                        begin_round: false,
                    };
                    self.commit(state, visit, output, observers, cancel).await
                }
                Ok((node, Err(error), _)) => Err(Halt::failed(node, error)),
                Err(join_error) => Err(Halt::Failed {
                    node: None,
                    error: FlowError::TaskJoin(join_error.to_string()),
                }),
            };
            if let Err(halt) = outcome {
                join_set.abort_all();
                return Err(halt);
            }
        }
    }

    /// Walk research, risk debate and the terminal deciders.
    async fn sequential_phase(
        &self,
        state: &mut RunState,
        observers: &[Arc<dyn Observer>],
        cancel: &mut CancellationToken,
    ) -> std::result::Result<(), Halt> {
        let mut cursor = self.plan.start();
        while let Some(step) = self.plan.step_at(cursor) {
            let node = step.node();
            if cancel.is_cancelled() {
                return Err(Halt::Cancelled { node: Some(node) });
            }

            let input = StepInput::gather(&state.record, node);
            let started = Instant::now();
            let output = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Halt::Cancelled { node: Some(node) }),
                result = run_step(step.as_ref(), input, self.node_timeout) => {
                    result.map_err(|error| Halt::failed(node, error))?
                }
            };
            let transition = self
                .plan
                .advance(cursor, state.record.risk_debate.round_count);
            let visit = Visit {
                node,
                elapsed: started.elapsed(),
                begin_round: transition.begin_round,
            };
            self.commit(state, visit, output, observers, cancel).await?;
            cursor = transition.next;
        }
        Ok(())
    }

    /// Apply a node's output, stream it and wait for acknowledgment.
    async fn commit(
        &self,
        state: &mut RunState,
        visit: Visit,
        output: StepOutput,
        observers: &[Arc<dyn Observer>],
        cancel: &mut CancellationToken,
    ) -> std::result::Result<(), Halt> {
        let Visit {
            node,
            elapsed,
            begin_round,
        } = visit;
        if update_origin(&output.update) != Some(node) {
            return Err(Halt::failed(
                node,
                FlowError::PartitionViolation {
                    node: node.to_string(),
                    update: output.update.label().to_string(),
                },
            ));
        }
        state
            .record
            .apply(&output.update, &output.messages)
            .map_err(|error| Halt::failed(node, error))?;
        state.visits.push(node);
        let round_started = begin_round.then(|| {
            state.record.begin_risk_round();
            state.record.risk_debate.round_count
        });

        state.seq += 1;
        obs::emit_node_completed(&state.run_id, state.seq, node, elapsed.as_millis() as u64);
        let event = StreamEvent::Node {
            seq: state.seq,
            node,
            delta: NodeDelta {
                update: output.update,
                messages: output.messages,
                round_started,
            },
        };
        for observer in observers {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    state.events.push(event);
                    return Err(Halt::Cancelled { node: Some(node) });
                }
                _ = observer.on_event(&event) => {}
            }
        }
        state.events.push(event);
        Ok(())
    }
}

async fn run_step(step: &dyn Step, input: StepInput, limit: Option<Duration>) -> Result<StepOutput> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, step.execute(input))
            .await
            .map_err(|_| FlowError::NodeTimeout {
                node: step.node().to_string(),
                limit,
            })?,
        None => step.execute(input).await,
    }
}

/// Turn the phase result into a status, tagging the record on failure.
fn settle(record: &mut AnalysisRecord, result: std::result::Result<(), Halt>) -> RunStatus {
    match result {
        Ok(()) if record.final_decision.as_ref().is_some_and(FinalDecision::is_decided) => {
            RunStatus::Completed {
                degraded: record.is_degraded(),
            }
        }
        Ok(()) => {
            let error = "run ended without a final decision".to_string();
            error!(%error, "run incomplete");
            tag_failure(record, None, &error);
            RunStatus::Failed { node: None, error }
        }
        Err(Halt::Failed { node, error }) => {
            let error = error.to_string();
            error!(node = ?node.map(|n| n.to_string()), %error, "run failed");
            tag_failure(record, node, &error);
            RunStatus::Failed { node, error }
        }
        Err(Halt::Cancelled { node }) => {
            warn!(node = ?node.map(|n| n.to_string()), "run cancelled");
            let label = node.map(|n| n.to_string());
            record.push_message(MessageEntry::new(
                label.clone().unwrap_or_else(|| "driver".into()),
                MessageKind::Error,
                FlowError::Cancelled.to_string(),
            ));
            if record.final_decision.is_none() {
                record
                    .finalize(FinalDecision::Cancelled { node: label })
                    .ok();
            }
            RunStatus::Cancelled { node }
        }
    }
}

fn tag_failure(record: &mut AnalysisRecord, node: Option<NodeId>, error: &str) {
    let label = node.map(|n| n.to_string());
    record.push_message(MessageEntry::new(
        label.clone().unwrap_or_else(|| "driver".into()),
        MessageKind::Error,
        error,
    ));
    if record.final_decision.is_none() {
        record
            .finalize(FinalDecision::Failed {
                node: label,
                error: error.to_string(),
            })
            .ok();
    }
}

fn status_label(status: &RunStatus) -> &'static str {
    match status {
        RunStatus::Completed { degraded: false } => "completed",
        RunStatus::Completed { degraded: true } => "completed_degraded",
        RunStatus::Failed { .. } => "failed",
        RunStatus::Cancelled { .. } => "cancelled",
    }
}
