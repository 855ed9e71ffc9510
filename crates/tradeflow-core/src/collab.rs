//! Collaborator contracts: reasoning, data tools and embeddings.
//!
//! All traits are async and backend-agnostic. Deterministic implementations for
//! tests live in [`crate::fakes`].

use std::fmt;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{MemoryBackendFailure, NodeId, ReasoningFailure, ToolFailure};

// ---------------------------------------------------------------------------
// Reasoning
// ---------------------------------------------------------------------------

/// A prompt sent to the reasoning service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    /// Node issuing the prompt. Used for tracing and by test fakes.
    pub node: NodeId,
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(node: NodeId, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            node,
            system: system.into(),
            user: user.into(),
        }
    }
}

/// A named field requested from structured output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
}

/// Shape of a structured answer: a flat object with the listed fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputShape {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

impl OutputShape {
    pub fn new(name: impl Into<String>, fields: &[(&str, &str)]) -> Self {
        Self {
            name: name.into(),
            fields: fields
                .iter()
                .map(|(n, d)| FieldSpec {
                    name: (*n).to_string(),
                    description: (*d).to_string(),
                })
                .collect(),
        }
    }

    /// Field names that are absent from `value`.
    pub fn missing_fields(&self, value: &serde_json::Value) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| value.get(&f.name).is_none())
            .map(|f| f.name.clone())
            .collect()
    }
}

/// Answer from the reasoning service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Completion {
    Text(String),
    Structured(serde_json::Value),
}

impl Completion {
    /// Text content; structured answers are rendered as compact JSON.
    pub fn into_text(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Structured(v) => v.to_string(),
        }
    }
}

/// External text / structured-output generator.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    /// Answer `prompt`. When `shape` is given the answer must be
    /// [`Completion::Structured`] carrying the requested fields.
    async fn complete(
        &self,
        prompt: &Prompt,
        shape: Option<&OutputShape>,
    ) -> Result<Completion, ReasoningFailure>;
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// Role-specific data tool variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    PriceHistory,
    TechnicalIndicators,
    CompanyInfo,
    StockNews,
    GlobalNews,
    Sentiment,
    Fundamentals,
    FinancialStatements,
    Calendar,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PriceHistory => "price_history",
            Self::TechnicalIndicators => "technical_indicators",
            Self::CompanyInfo => "company_info",
            Self::StockNews => "stock_news",
            Self::GlobalNews => "global_news",
            Self::Sentiment => "sentiment",
            Self::Fundamentals => "fundamentals",
            Self::FinancialStatements => "financial_statements",
            Self::Calendar => "calendar",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Parameters for a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolRequest {
    pub kind: ToolKind,
    pub ticker: String,
    pub as_of: NaiveDate,
    pub lookback_days: Option<u32>,
}

/// External data-retrieval service.
#[async_trait]
pub trait ToolClient: Send + Sync {
    async fn call(&self, request: &ToolRequest) -> Result<String, ToolFailure>;
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// External embedding service, used only by memory stores.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryBackendFailure>;
}
