//! Engine events
//!
//! Lifecycle transitions are published on a broadcast channel for an
//! external notification collaborator (webhooks, dashboards). Delivery and
//! retry are the subscriber's concern; publishing never fails the operation
//! that triggered it.

use crate::spending::DenialReason;
use crate::types::{Amount, ChainId, OwnerId, ProviderId, amount_string};
use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Which policy a spend was checked against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SpendScope {
    /// An owner's session policy
    Session { owner: OwnerId },
    /// A project-wide policy
    Project { project: String },
}

/// Event kinds, one per observable transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum EngineEvent {
    /// First derivation of an owner's account by this engine
    #[serde(rename = "account.created", rename_all = "camelCase")]
    AccountCreated {
        owner: OwnerId,
        address: Address,
        chain_id: ChainId,
        provider_id: ProviderId,
    },

    /// New session persisted and registered
    #[serde(rename = "session.created", rename_all = "camelCase")]
    SessionCreated {
        owner: OwnerId,
        public_address: Address,
        expiration: i64,
    },

    /// Expired session evicted on lookup
    #[serde(rename = "session.expired", rename_all = "camelCase")]
    SessionExpired {
        owner: OwnerId,
        public_address: Address,
        expiration: i64,
    },

    /// Session explicitly revoked
    #[serde(rename = "session.revoked", rename_all = "camelCase")]
    SessionRevoked {
        owner: OwnerId,
        public_address: Address,
    },

    /// A spend was denied by a cap
    #[serde(rename = "spending.limit.reached", rename_all = "camelCase")]
    SpendingLimitReached {
        scope: SpendScope,
        reason: DenialReason,
        #[serde(with = "amount_string")]
        attempted: Amount,
    },
}

impl EngineEvent {
    /// Dotted event name
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::AccountCreated { .. } => "account.created",
            EngineEvent::SessionCreated { .. } => "session.created",
            EngineEvent::SessionExpired { .. } => "session.expired",
            EngineEvent::SessionRevoked { .. } => "session.revoked",
            EngineEvent::SpendingLimitReached { .. } => "spending.limit.reached",
        }
    }
}

/// Event with its publication time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

/// Broadcast channel of engine events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per lagging subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Publish an event stamped with `timestamp`
    pub fn publish(&self, timestamp: DateTime<Utc>, event: EngineEvent) {
        let name = event.name();
        // No subscribers is fine
        if self.sender.send(EventEnvelope { timestamp, event }).is_err() {
            trace!(event = name, "No event subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
