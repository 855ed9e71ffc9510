//! Workflow topology: the debate rule and the compiled execution plan.

pub mod debate;
pub mod plan;

pub use debate::{decide, DebateController, DebateDecision};
pub use plan::{Cursor, ExecutionPlan, Transition, WorkflowGraph};
