//! Inbound event source consumed by the sequencer node

use async_trait::async_trait;
use l1_integration::L1Event;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Anything the node reacts to: L1 chain events from the observer and
/// payloads relayed by the P2P layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundEvent {
    L1 { event: L1Event },
    /// base64 of a borsh-encoded mint confirmation
    Confirmation { payload: String },
    /// base64 of a borsh-encoded fraud proof
    FraudProof { payload: String },
}

/// Source of inbound events
#[async_trait]
pub trait L1ChainSource: Send {
    /// Next event, or `None` once the source is exhausted
    async fn next_event(&mut self) -> anyhow::Result<Option<InboundEvent>>;
}

/// Pre-loaded event queue
#[derive(Debug, Default)]
pub struct MemorySource {
    events: VecDeque<InboundEvent>,
}

impl MemorySource {
    pub fn new(events: impl IntoIterator<Item = InboundEvent>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    pub fn push(&mut self, event: InboundEvent) {
        self.events.push_back(event);
    }
}

#[async_trait]
impl L1ChainSource for MemorySource {
    async fn next_event(&mut self) -> anyhow::Result<Option<InboundEvent>> {
        Ok(self.events.pop_front())
    }
}
