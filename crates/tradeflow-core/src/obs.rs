//! Structured lifecycle events for pipeline runs.
//!
//! Every emitter logs at `info!` (warnings at `warn!`) with a stable `event`
//! field so log pipelines can filter on it. Run-scoped fields are attached
//! through [`run_span`].

use tracing::{info, warn};

use crate::domain::NodeId;

/// Span carrying the run id and subject for everything a run logs.
///
/// Attach it with `tracing::Instrument` rather than entering it, since the
/// run future crosses await points.
pub fn run_span(run_id: &str, subject: &str) -> tracing::Span {
    tracing::info_span!("tradeflow.run", run_id = %run_id, subject = %subject)
}

/// Emit event: run started.
///
/// ```ignore
/// emit_run_started("3f2c…", "000001", "2025-06-21", &["market"]);
/// // logs: event=run.started run_id=3f2c… subject=000001 as_of=2025-06-21 analysts=market
/// ```
pub fn emit_run_started(run_id: &str, subject: &str, as_of: &str, analysts: &[&str]) {
    info!(
        event = "run.started",
        run_id = %run_id,
        subject = %subject,
        as_of = %as_of,
        analysts = %analysts.join(","),
    );
}

/// Emit event: a node's update was applied and streamed.
pub fn emit_node_completed(run_id: &str, seq: u64, node: NodeId, duration_ms: u64) {
    info!(
        event = "node.completed",
        run_id = %run_id,
        seq = seq,
        node = %node,
        duration_ms = duration_ms,
    );
}

/// Emit event: a data tool failed and the report was degraded.
pub fn emit_tool_failed(node: &str, tool: &str, reason: &str) {
    warn!(event = "tool.failed", node = %node, tool = %tool, reason = %reason);
}

/// Emit event: a memory entry was appended.
pub fn emit_memory_stored(store: &str, id: u64) {
    info!(event = "memory.stored", store = %store, id = id);
}

/// Emit event: run finished, whatever the outcome.
pub fn emit_run_finished(run_id: &str, status: &str, duration_ms: u64, visits: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        status = %status,
        duration_ms = duration_ms,
        visits = visits,
    );
}

/// Emit event: the audit artifact could not be written. The run outcome is
/// unaffected.
pub fn emit_audit_failed(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "audit.failed", run_id = %run_id, error = %error);
}
