//! Per-node stream events and the observer contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::{AnalysisRecord, MessageEntry, NodeId, RecordUpdate};

/// What a single node visit changed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeDelta {
    pub update: RecordUpdate,
    pub messages: Vec<MessageEntry>,
    /// Set on the conservative visit that opens a new risk round; carries the
    /// record's `risk_debate.round_count` after the increment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_started: Option<u32>,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// All nodes ran. `degraded` is set when any report carries tool errors.
    Completed { degraded: bool },
    Failed { node: Option<NodeId>, error: String },
    Cancelled { node: Option<NodeId> },
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Event emitted by the streaming driver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Node {
        seq: u64,
        node: NodeId,
        delta: NodeDelta,
    },
    /// Always the last event of a run, on success and on failure.
    Finished {
        seq: u64,
        status: RunStatus,
        record: Box<AnalysisRecord>,
    },
}

impl StreamEvent {
    pub fn seq(&self) -> u64 {
        match self {
            Self::Node { seq, .. } | Self::Finished { seq, .. } => *seq,
        }
    }
}

/// Live consumer of stream events.
///
/// The driver awaits `on_event` before advancing; returning acknowledges the
/// event.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn on_event(&self, event: &StreamEvent);
}

/// Observer that forwards events into a bounded channel.
///
/// Acknowledgment happens once the channel accepts the event, so a full
/// channel holds the driver back until the consumer catches up.
pub struct ChannelObserver {
    tx: mpsc::Sender<StreamEvent>,
}

/// Create a channel observer and its receiving end.
pub fn channel(capacity: usize) -> (ChannelObserver, mpsc::Receiver<StreamEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ChannelObserver { tx }, rx)
}

#[async_trait]
impl Observer for ChannelObserver {
    async fn on_event(&self, event: &StreamEvent) {
        if self.tx.send(event.clone()).await.is_err() {
            debug!(seq = event.seq(), "stream receiver dropped; event discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RiskSpeaker;

    fn node_event(seq: u64) -> StreamEvent {
        StreamEvent::Node {
            seq,
            node: NodeId::Conservative,
            delta: NodeDelta {
                update: RecordUpdate::RiskArgument {
                    speaker: RiskSpeaker::Conservative,
                    text: "hedge".into(),
                },
                messages: vec![],
                round_started: None,
            },
        }
    }

    #[tokio::test]
    async fn test_channel_observer_forwards_in_order() {
        let (observer, mut rx) = channel(4);
        observer.on_event(&node_event(1)).await;
        observer.on_event(&node_event(2)).await;
        assert_eq!(rx.recv().await.map(|e| e.seq()), Some(1));
        assert_eq!(rx.recv().await.map(|e| e.seq()), Some(2));
    }

    #[tokio::test]
    async fn test_channel_observer_tolerates_dropped_receiver() {
        let (observer, rx) = channel(1);
        drop(rx);
        observer.on_event(&node_event(1)).await;
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(node_event(3)).unwrap();
        assert_eq!(json["event"], "node");
        assert_eq!(json["seq"], 3);
    }
}
