//! Composite store keys.
//!
//! A unit of work is persisted under `{flow}@{cluster_id}:{event_id}`. The flow and
//! cluster segments keep workers of different flows, or of different cluster nodes,
//! from picking up each other's pending events when they share one physical store.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::{ClusterId, EventId, FlowName};

/// Anything that carries the identity parts of a store key.
///
/// Implemented by the message event type so the key builder does not need to know
/// about payloads.
pub trait KeySource {
    fn event_id(&self) -> &EventId;
    fn flow(&self) -> &FlowName;
}

/// Key of a persisted unit of work.
///
/// Equality and hashing cover the whole `{flow, cluster_id, event_id}` triplet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventStoreKey {
    flow: FlowName,
    cluster_id: ClusterId,
    event_id: EventId,
}

impl EventStoreKey {
    pub fn new(flow: FlowName, cluster_id: ClusterId, event_id: EventId) -> Self {
        Self {
            flow,
            cluster_id,
            event_id,
        }
    }

    pub fn flow(&self) -> &FlowName {
        &self.flow
    }

    pub fn cluster_id(&self) -> &ClusterId {
        &self.cluster_id
    }

    pub fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Whether this key was filed by `flow` running on `cluster_id`.
    pub fn belongs_to(&self, flow: &FlowName, cluster_id: &ClusterId) -> bool {
        &self.flow == flow && &self.cluster_id == cluster_id
    }
}

impl core::fmt::Display for EventStoreKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}:{}", self.flow, self.cluster_id, self.event_id)
    }
}

impl FromStr for EventStoreKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (flow, rest) = s
            .split_once('@')
            .ok_or_else(|| CoreError::invalid_key(format!("'{s}' has no '@' separator")))?;
        let (cluster_id, event_id) = rest
            .split_once(':')
            .ok_or_else(|| CoreError::invalid_key(format!("'{s}' has no ':' separator")))?;

        Ok(Self {
            flow: FlowName::parse(flow)?,
            cluster_id: ClusterId::parse(cluster_id)?,
            event_id: EventId::parse(event_id)?,
        })
    }
}

/// Builds store keys for one cluster node.
///
/// The cluster id is handed in at construction instead of being looked up from
/// process-wide state, so two builders in one process can model two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    cluster_id: ClusterId,
}

impl KeyBuilder {
    pub fn new(cluster_id: ClusterId) -> Self {
        Self { cluster_id }
    }

    pub fn cluster_id(&self) -> &ClusterId {
        &self.cluster_id
    }

    /// Deterministic: the same event always maps to the same key.
    pub fn build_for<S: KeySource + ?Sized>(&self, source: &S) -> EventStoreKey {
        EventStoreKey::new(
            source.flow().clone(),
            self.cluster_id.clone(),
            source.event_id().clone(),
        )
    }
}
