//! Live game server registry.
//!
//! Tracks the display state of every connected game server (map, score,
//! round clock) and routes the change-level command. Adapters own the
//! connections; the registry only holds state and a control handle.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{MixError, Result};
use crate::events::{EventBus, EventPayload};
use crate::types::ChannelId;

/// Closed set of actions that may be invoked on a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "arg", rename_all = "snake_case")]
pub enum ServerAction {
    ChangeLevel(String),
}

/// Wire-level control a game adapter provides for its server.
pub trait ServerControl: Send + Sync {
    fn change_level(&self, map: &str);
}

/// Voice channels the draft moves teams into. Servers without these
/// cannot host a draft.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TeamChannels {
    pub red: ChannelId,
    pub blue: ChannelId,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Scoreline {
    pub blu: i64,
    pub red: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerSnapshot {
    pub name: String,
    pub address: String,
    pub map: Option<String>,
    pub score: Scoreline,
    pub time: String,
    pub live: bool,
    pub paused: bool,
    pub team_channels: Option<TeamChannels>,
}

impl ServerSnapshot {
    pub fn new(name: &str, address: &str, team_channels: Option<TeamChannels>) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            map: None,
            score: Scoreline::default(),
            time: "--:--".to_string(),
            live: false,
            paused: false,
            team_channels,
        }
    }
}

struct ServerEntry {
    state: ServerSnapshot,
    control: Arc<dyn ServerControl>,
}

pub struct ServerRegistry {
    inner: RwLock<HashMap<String, ServerEntry>>,
    bus: EventBus,
    maps: Vec<String>,
}

impl ServerRegistry {
    pub fn new(bus: EventBus, maps: Vec<String>) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            bus,
            maps,
        }
    }

    pub async fn register(&self, state: ServerSnapshot, control: Arc<dyn ServerControl>) {
        info!(address = %state.address, name = %state.name, "game server registered");
        let snapshot = state.clone();
        self.inner
            .write()
            .await
            .insert(state.address.clone(), ServerEntry { state, control });
        self.bus.update(EventPayload::Server(snapshot));
    }

    /// Apply a display-state mutation reported by the adapter.
    pub async fn update_state(
        &self,
        address: &str,
        apply: impl FnOnce(&mut ServerSnapshot),
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner
            .get_mut(address)
            .ok_or_else(|| MixError::invalid(format!("no server {address}")))?;
        apply(&mut entry.state);
        let snapshot = entry.state.clone();
        drop(inner);
        self.bus.update(EventPayload::Server(snapshot));
        Ok(())
    }

    pub async fn remove(&self, address: &str) {
        if let Some(entry) = self.inner.write().await.remove(address) {
            debug!(%address, "game server removed");
            self.bus.delete(EventPayload::Server(entry.state));
        }
    }

    pub async fn snapshot(&self, address: &str) -> Option<ServerSnapshot> {
        self.inner
            .read()
            .await
            .get(address)
            .map(|entry| entry.state.clone())
    }

    pub async fn snapshot_all(&self) -> Vec<ServerSnapshot> {
        let mut snapshots: Vec<ServerSnapshot> = self
            .inner
            .read()
            .await
            .values()
            .map(|entry| entry.state.clone())
            .collect();
        snapshots.sort_by(|a, b| a.address.cmp(&b.address));
        snapshots
    }

    pub async fn team_channels(&self, address: &str) -> Result<TeamChannels> {
        let inner = self.inner.read().await;
        let entry = inner
            .get(address)
            .ok_or_else(|| MixError::invalid(format!("no server {address}")))?;
        entry
            .state
            .team_channels
            .ok_or_else(|| MixError::invalid(format!("server {address} has no team channels configured")))
    }

    pub async fn dispatch(&self, address: &str, action: ServerAction) -> Result<()> {
        match action {
            ServerAction::ChangeLevel(map) => {
                if !self.maps.is_empty() && !self.maps.contains(&map) {
                    return Err(MixError::invalid(format!("map {map} is not in the rotation")));
                }
                let inner = self.inner.read().await;
                let entry = inner
                    .get(address)
                    .ok_or_else(|| MixError::invalid(format!("no server {address}")))?;
                info!(%address, %map, "changing level");
                entry.control.change_level(&map);
                Ok(())
            }
        }
    }
}
