//! Tradeflow Core Library
//!
//! Multi-role trading-analysis workflow: a concurrent analyst phase, a
//! bull/bear research debate, a trader, a bounded risk debate and the final
//! deciders, scheduled over a shared [`AnalysisRecord`] and streamed node by
//! node. Per-role memories carry lessons from one run to the next.

pub mod audit;
pub mod collab;
pub mod config;
pub mod domain;
pub mod driver;
pub mod fakes;
pub mod graph;
pub mod memory;
pub mod obs;
pub mod pipeline;
pub mod reflect;
pub mod retry;
pub mod signal;
pub mod step;
pub mod stream;
pub mod telemetry;

pub use audit::{render_summary_md, AuditArtifact, AuditWriter};
pub use collab::{
    Completion, EmbeddingClient, OutputShape, Prompt, ReasoningClient, ToolClient, ToolKind,
    ToolRequest,
};
pub use config::PipelineConfig;
pub use domain::{
    AnalysisRecord, AnalystRole, FinalDecision, FlowError, GraphConfigurationError,
    MemoryBackendFailure, MemoryRole, MessageEntry, MessageKind, NodeId, ReasoningFailure,
    RecordUpdate, Report, ReportSlot, Result, RiskSpeaker, ToolFailure,
};
pub use driver::{cancellation, CancellationHandle, CancellationToken, RunOutcome, StreamingDriver};
pub use graph::{decide, DebateController, DebateDecision, ExecutionPlan, WorkflowGraph};
pub use memory::{MemoryBank, MemoryMatch, MemoryStore};
pub use pipeline::{Services, TradingPipeline};
pub use reflect::{Outcome, ReflectionReport, Reflector};
pub use retry::{RetryPolicy, RetryingEmbedder, RetryingReasoning};
pub use signal::{Signal, SignalExtractor};
pub use step::{Collaborators, Step, StepInput, StepOptions, StepOutput, StepRegistry};
pub use stream::{ChannelObserver, NodeDelta, Observer, RunStatus, StreamEvent};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
