//! Outward event fan-out.
//!
//! Two event kinds (`update`, `delete`) with a discriminated payload per
//! entity type. Delivery is best effort: late subscribers get no replay and
//! slow subscribers may miss events.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::draft::DraftSnapshot;
use crate::identity::UserSnapshot;
use crate::servers::ServerSnapshot;
use crate::stats::LogSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum EventPayload {
    User(UserSnapshot),
    Server(ServerSnapshot),
    Draft(DraftSnapshot),
    Log(LogSummary),
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: EventKind,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Fan-out bus for identity/server/draft/log change events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, kind: EventKind, payload: EventPayload) {
        let event = Event { kind, payload };
        // send only fails when nobody is subscribed
        if self.sender.send(event).is_err() {
            debug!("event dropped, no subscribers");
        }
    }

    pub fn update(&self, payload: EventPayload) {
        self.publish(EventKind::Update, payload);
    }

    pub fn delete(&self, payload: EventPayload) {
        self.publish(EventKind::Delete, payload);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
