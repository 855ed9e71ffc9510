//! Domain model: the analysis record, role vocabulary and error taxonomy.

pub mod error;
pub mod record;
pub mod role;

pub use error::{
    FlowError, GraphConfigurationError, MemoryBackendFailure, ReasoningFailure, Result,
    ToolFailure,
};
pub use record::{
    report_update, update_origin, AnalysisRecord, FinalDecision, InvestmentDebate, MessageEntry,
    MessageKind, RecordUpdate, Report, RiskDebate, RiskTurn,
};
pub use role::{AnalystRole, MemoryRole, NodeId, ReportSlot, RiskSpeaker};
