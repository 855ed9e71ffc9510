//! Deterministic collaborators for tests and offline runs.
//!
//! Provides `ScriptedReasoning`, `StaticTools`, `HashEmbedder` and
//! `RecordingObserver`, which satisfy the collaborator contracts without any
//! network access.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::collab::{
    Completion, EmbeddingClient, OutputShape, Prompt, ReasoningClient, ToolClient, ToolKind,
    ToolRequest,
};
use crate::domain::{MemoryBackendFailure, NodeId, ReasoningFailure, ToolFailure};
use crate::stream::{Observer, StreamEvent};

// ---------------------------------------------------------------------------
// ScriptedReasoning
// ---------------------------------------------------------------------------

/// Reasoning fake with canned per-node answers and optional forced failures.
///
/// Unscripted text prompts get `"<node>: position statement"`;
/// unscripted structured prompts get every requested field filled in. The
/// risk manager defaults to a BUY proposal.
#[derive(Debug, Default)]
pub struct ScriptedReasoning {
    answers: HashMap<NodeId, String>,
    /// Node -> 1-based call number from which its prompts fail.
    failing: HashMap<NodeId, usize>,
    delays: HashMap<NodeId, Duration>,
    calls: Mutex<Vec<Prompt>>,
}

impl ScriptedReasoning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answer(mut self, node: NodeId, text: impl Into<String>) -> Self {
        self.answers.insert(node, text.into());
        self
    }

    pub fn fail_on(self, node: NodeId) -> Self {
        self.fail_from_call(node, 1)
    }

    /// Answer the first `nth - 1` prompts for `node`, then fail every later one.
    pub fn fail_from_call(mut self, node: NodeId, nth: usize) -> Self {
        self.failing.insert(node, nth);
        self
    }

    pub fn with_delay(mut self, node: NodeId, delay: Duration) -> Self {
        self.delays.insert(node, delay);
        self
    }

    /// Nodes in the order their prompts arrived.
    pub fn calls(&self) -> Vec<NodeId> {
        self.calls
            .lock()
            .map(|c| c.iter().map(|p| p.node).collect())
            .unwrap_or_default()
    }

    /// User text of every prompt `node` sent.
    pub fn prompts_for(&self, node: NodeId) -> Vec<String> {
        self.calls
            .lock()
            .map(|c| {
                c.iter()
                    .filter(|p| p.node == node)
                    .map(|p| p.user.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn default_text(node: NodeId) -> String {
        match node {
            NodeId::RiskManager => {
                "Risk-adjusted plan approved. FINAL TRANSACTION PROPOSAL: **BUY**".to_string()
            }
            other => format!("{other}: position statement"),
        }
    }
}

#[async_trait]
impl ReasoningClient for ScriptedReasoning {
    async fn complete(
        &self,
        prompt: &Prompt,
        shape: Option<&OutputShape>,
    ) -> Result<Completion, ReasoningFailure> {
        let call_number = match self.calls.lock() {
            Ok(mut calls) => {
                calls.push(prompt.clone());
                calls.iter().filter(|p| p.node == prompt.node).count()
            }
            Err(_) => 0,
        };
        if let Some(delay) = self.delays.get(&prompt.node) {
            tokio::time::sleep(*delay).await;
        }
        if self
            .failing
            .get(&prompt.node)
            .is_some_and(|nth| call_number >= *nth)
        {
            return Err(ReasoningFailure::Unavailable(format!(
                "scripted failure at {}",
                prompt.node
            )));
        }

        let text = self
            .answers
            .get(&prompt.node)
            .cloned()
            .unwrap_or_else(|| Self::default_text(prompt.node));

        Ok(match shape {
            Some(shape) => {
                let fields = shape
                    .fields
                    .iter()
                    .map(|f| (f.name.clone(), serde_json::Value::String(format!("{text} ({})", f.name))))
                    .collect::<serde_json::Map<_, _>>();
                Completion::Structured(serde_json::Value::Object(fields))
            }
            None => Completion::Text(text),
        })
    }
}

// ---------------------------------------------------------------------------
// StaticTools
// ---------------------------------------------------------------------------

/// Tool fake returning canned text, with selectable failing tool kinds.
#[derive(Debug, Default)]
pub struct StaticTools {
    failing: HashSet<ToolKind>,
    calls: Mutex<Vec<ToolKind>>,
}

impl StaticTools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, kind: ToolKind) -> Self {
        self.failing.insert(kind);
        self
    }

    pub fn calls(&self) -> Vec<ToolKind> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ToolClient for StaticTools {
    async fn call(&self, request: &ToolRequest) -> Result<String, ToolFailure> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(request.kind);
        }
        if self.failing.contains(&request.kind) {
            return Err(ToolFailure::new(request.kind.as_str(), "data source offline"));
        }
        Ok(format!(
            "{} data for {} as of {}",
            request.kind, request.ticker, request.as_of
        ))
    }
}

// ---------------------------------------------------------------------------
// HashEmbedder
// ---------------------------------------------------------------------------

/// Deterministic bag-of-words embedding: each lowercase word is hashed into
/// one of `dim` buckets.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    fail: bool,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self { dim: 64, fail: false }
    }
}

impl HashEmbedder {
    pub fn with_dim(dim: usize) -> Self {
        Self { dim: dim.max(1), fail: false }
    }

    /// An embedder whose every call fails.
    pub fn failing() -> Self {
        Self { dim: 64, fail: true }
    }

    fn bucket(&self, word: &str) -> usize {
        let digest = Sha256::digest(word.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(head) % self.dim as u64) as usize
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryBackendFailure> {
        if self.fail {
            return Err(MemoryBackendFailure::Embedding("embedder offline".into()));
        }
        let mut v = vec![0f32; self.dim];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            v[self.bucket(&word.to_lowercase())] += 1.0;
        }
        Ok(v)
    }
}

// ---------------------------------------------------------------------------
// RecordingObserver
// ---------------------------------------------------------------------------

/// Observer that keeps every event it acknowledges.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<StreamEvent>>,
    ack_delay: Option<Duration>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every acknowledgment, simulating a slow consumer.
    pub fn with_ack_delay(delay: Duration) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            ack_delay: Some(delay),
        }
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Nodes of the per-visit events, in delivery order.
    pub fn node_sequence(&self) -> Vec<NodeId> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Node { node, .. } => Some(*node),
                StreamEvent::Finished { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl Observer for RecordingObserver {
    async fn on_event(&self, event: &StreamEvent) {
        if let Some(delay) = self.ack_delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_hash_embedder_is_deterministic() {
        let e = HashEmbedder::default();
        let a = e.embed("Rates are Rising").await.unwrap();
        let b = e.embed("rates are rising").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn test_scripted_reasoning_fills_structured_fields() {
        let r = ScriptedReasoning::new();
        let shape = OutputShape::new("s", &[("summary", "d"), ("conclusion", "d")]);
        let prompt = Prompt::new(NodeId::Trader, "sys", "user");
        let out = r.complete(&prompt, Some(&shape)).await.unwrap();
        match out {
            Completion::Structured(v) => assert!(shape.missing_fields(&v).is_empty()),
            Completion::Text(_) => panic!("expected structured output"),
        }
        assert_eq!(r.calls(), vec![NodeId::Trader]);
    }

    #[tokio::test]
    async fn test_scripted_reasoning_fails_from_nth_call() {
        let r = ScriptedReasoning::new().fail_from_call(NodeId::Conservative, 2);
        let prompt = Prompt::new(NodeId::Conservative, "sys", "user");
        assert!(r.complete(&prompt, None).await.is_ok());
        assert!(r.complete(&prompt, None).await.is_err());
        assert!(r.complete(&prompt, None).await.is_err());
        let other = Prompt::new(NodeId::Neutral, "sys", "user");
        assert!(r.complete(&other, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_static_tools_failure() {
        let tools = StaticTools::new().failing(ToolKind::Sentiment);
        let req = ToolRequest {
            kind: ToolKind::Sentiment,
            ticker: "000001".into(),
            as_of: NaiveDate::from_ymd_opt(2025, 6, 21).unwrap(),
            lookback_days: None,
        };
        assert!(tools.call(&req).await.is_err());
    }
}
