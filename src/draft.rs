//! Coached-mix draft.
//!
//! Two six-slot teams drafted onto one server. Assigning a user moves
//! their voice session into the team channel and remembers where they
//! came from; cancelling restores everyone.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::{MixError, Result};
use crate::events::{EventBus, EventPayload};
use crate::identity::{IdentityReconciler, UserAction};
use crate::servers::ServerRegistry;
use crate::types::{ChannelId, PlayerClass, Team, UserId};

/// Closed set of draft operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum DraftAction {
    Start { server: String },
    Assign { team: Team, slot: usize, user: Option<UserId> },
    End,
    Cancel,
}

struct DraftSlot {
    class: PlayerClass,
    label: &'static str,
    user: Option<UserId>,
    previous_channel: Option<ChannelId>,
}

fn team_slots() -> Vec<DraftSlot> {
    [
        (PlayerClass::Demoman, "Demoman"),
        (PlayerClass::Medic, "Medic"),
        (PlayerClass::Scout, "Scout"),
        (PlayerClass::Scout, "Scout"),
        (PlayerClass::Soldier, "Pocket"),
        (PlayerClass::Soldier, "Roamer"),
    ]
    .into_iter()
    .map(|(class, label)| DraftSlot {
        class,
        label,
        user: None,
        previous_channel: None,
    })
    .collect()
}

struct DraftTeam {
    channel: ChannelId,
    slots: Vec<DraftSlot>,
}

struct ActiveDraft {
    server: String,
    red: DraftTeam,
    blue: DraftTeam,
}

impl ActiveDraft {
    fn team_mut(&mut self, team: Team) -> Result<&mut DraftTeam> {
        match team {
            Team::Red => Ok(&mut self.red),
            Team::Blue => Ok(&mut self.blue),
            other => Err(MixError::invalid(format!("cannot draft onto team {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SlotSnapshot {
    pub class: PlayerClass,
    pub label: String,
    pub user: Option<UserId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DraftSnapshot {
    pub active: bool,
    pub server: Option<String>,
    pub red: Vec<SlotSnapshot>,
    pub blue: Vec<SlotSnapshot>,
}

fn slot_snapshots(team: &DraftTeam) -> Vec<SlotSnapshot> {
    team.slots
        .iter()
        .map(|slot| SlotSnapshot {
            class: slot.class,
            label: slot.label.to_string(),
            user: slot.user,
        })
        .collect()
}

pub struct DraftCoordinator {
    state: Mutex<Option<ActiveDraft>>,
    reconciler: IdentityReconciler,
    registry: Arc<ServerRegistry>,
    bus: EventBus,
}

impl DraftCoordinator {
    pub fn new(
        reconciler: IdentityReconciler,
        registry: Arc<ServerRegistry>,
        bus: EventBus,
    ) -> Self {
        Self {
            state: Mutex::new(None),
            reconciler,
            registry,
            bus,
        }
    }

    pub async fn dispatch(&self, action: DraftAction) -> Result<()> {
        match action {
            DraftAction::Start { server } => self.start(&server).await,
            DraftAction::Assign { team, slot, user } => self.assign(team, slot, user).await,
            DraftAction::End => self.end().await,
            DraftAction::Cancel => self.cancel().await,
        }
    }

    pub async fn start(&self, server: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return Err(MixError::invalid("a draft is already in progress"));
        }
        let channels = self.registry.team_channels(server).await?;
        *state = Some(ActiveDraft {
            server: server.to_string(),
            red: DraftTeam {
                channel: channels.red,
                slots: team_slots(),
            },
            blue: DraftTeam {
                channel: channels.blue,
                slots: team_slots(),
            },
        });
        info!(%server, "draft started");
        self.publish(&state);
        Ok(())
    }

    /// Fill or clear a slot. The outgoing occupant returns to their
    /// previous channel; the incoming user moves to the team channel.
    pub async fn assign(&self, team: Team, slot: usize, user: Option<UserId>) -> Result<()> {
        let mut state = self.state.lock().await;
        let draft = state
            .as_mut()
            .ok_or_else(|| MixError::invalid("no draft in progress"))?;
        let team_state = draft.team_mut(team)?;
        let channel = team_state.channel;
        let slot = team_state
            .slots
            .get_mut(slot)
            .ok_or_else(|| MixError::invalid(format!("no draft slot {slot}")))?;

        // Return the previous occupant first.
        if let (Some(occupant), Some(previous)) = (slot.user.take(), slot.previous_channel.take()) {
            // Best effort: the occupant may have disconnected mid-draft.
            let _ = self
                .reconciler
                .dispatch_user(occupant, UserAction::Move(previous))
                .await;
        }

        if let Some(user_id) = user {
            let snapshot = self
                .reconciler
                .user_snapshot(user_id)
                .await
                .ok_or_else(|| MixError::invalid(format!("cannot draft unknown user {user_id}")))?;
            slot.user = Some(user_id);
            if let Some(voice) = snapshot.voice_session {
                slot.previous_channel = voice.channel_id;
                self.reconciler
                    .dispatch_user(user_id, UserAction::Move(channel))
                    .await?;
            }
        }

        self.publish(&state);
        Ok(())
    }

    pub async fn end(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.take().is_none() {
            return Err(MixError::invalid("no draft in progress"));
        }
        info!("draft ended");
        self.publish(&state);
        Ok(())
    }

    /// Abort the draft, returning every drafted user to their previous
    /// channel.
    pub async fn cancel(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let draft = state
            .take()
            .ok_or_else(|| MixError::invalid("no draft in progress"))?;
        for team in [&draft.red, &draft.blue] {
            for slot in &team.slots {
                if let (Some(user), Some(previous)) = (slot.user, slot.previous_channel) {
                    let _ = self
                        .reconciler
                        .dispatch_user(user, UserAction::Move(previous))
                        .await;
                }
            }
        }
        info!("draft cancelled");
        self.publish(&state);
        Ok(())
    }

    pub async fn snapshot(&self) -> DraftSnapshot {
        let state = self.state.lock().await;
        Self::snapshot_of(&state)
    }

    fn snapshot_of(state: &Option<ActiveDraft>) -> DraftSnapshot {
        match state {
            Some(draft) => DraftSnapshot {
                active: true,
                server: Some(draft.server.clone()),
                red: slot_snapshots(&draft.red),
                blue: slot_snapshots(&draft.blue),
            },
            None => DraftSnapshot {
                active: false,
                server: None,
                red: Vec::new(),
                blue: Vec::new(),
            },
        }
    }

    fn publish(&self, state: &Option<ActiveDraft>) {
        self.bus.update(EventPayload::Draft(Self::snapshot_of(state)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::identity::MemoryIdentityStore;
    use crate::reputation::{ReputationChecker, StaticLookup};
    use crate::servers::{ServerSnapshot, TeamChannels};
    use crate::session::fakes::{FakeVoiceSession, IssuedCommand};
    use crate::session::VoiceFact;
    use crate::types::{OriginVerdict, VoiceKind};
    use std::collections::HashMap;

    struct NullControl;
    impl crate::servers::ServerControl for NullControl {
        fn change_level(&self, _map: &str) {}
    }

    struct Fixture {
        reconciler: IdentityReconciler,
        registry: Arc<ServerRegistry>,
        draft: DraftCoordinator,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryIdentityStore::new());
        let bus = EventBus::new(64);
        let checker = Arc::new(ReputationChecker::for_tests(
            store.clone(),
            Arc::new(StaticLookup::new(OriginVerdict::Trusted)),
        ));
        let reconciler = IdentityReconciler::new(
            store,
            checker,
            bus.clone(),
            &IdentityConfig::default(),
            HashMap::new(),
        );
        let registry = Arc::new(ServerRegistry::new(bus.clone(), Vec::new()));
        registry
            .register(
                ServerSnapshot::new(
                    "mix1",
                    "mix1.example.org",
                    Some(TeamChannels { red: 113, blue: 114 }),
                ),
                Arc::new(NullControl),
            )
            .await;
        registry
            .register(
                ServerSnapshot::new("bare", "bare.example.org", None),
                Arc::new(NullControl),
            )
            .await;
        let draft = DraftCoordinator::new(reconciler.clone(), registry.clone(), bus);
        Fixture {
            reconciler,
            registry,
            draft,
        }
    }

    fn fact(hash: &str, channel: ChannelId) -> VoiceFact {
        VoiceFact {
            hash: hash.to_string(),
            name: "player".to_string(),
            kind: VoiceKind::Mumble,
            channel_id: Some(channel),
            mute: false,
            deaf: false,
        }
    }

    #[tokio::test]
    async fn test_start_requires_team_channels() {
        let fx = fixture().await;
        let result = fx.draft.start("bare.example.org").await;
        assert!(matches!(result, Err(MixError::InvalidOperation(_))));
        assert!(fx.draft.start("mix1.example.org").await.is_ok());
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let fx = fixture().await;
        fx.draft.start("mix1.example.org").await.unwrap();
        let again = fx.draft.start("mix1.example.org").await;
        assert!(matches!(again, Err(MixError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_assign_moves_user_and_cancel_restores() {
        let fx = fixture().await;
        let voice = FakeVoiceSession::new();
        let user_id = fx
            .reconciler
            .resolve("10.0.0.1", Some((fact("hash-a", 7), voice.clone())), None)
            .await
            .unwrap();

        fx.draft.start("mix1.example.org").await.unwrap();
        fx.draft.assign(Team::Red, 0, Some(user_id)).await.unwrap();
        assert!(voice.commands().contains(&IssuedCommand::Move(113)));

        fx.draft.cancel().await.unwrap();
        assert_eq!(
            voice.commands().last(),
            Some(&IssuedCommand::Move(7)),
            "cancel returns the user to their original channel"
        );
    }

    #[tokio::test]
    async fn test_assign_unknown_user_rejected() {
        let fx = fixture().await;
        fx.draft.start("mix1.example.org").await.unwrap();
        let result = fx.draft.assign(Team::Red, 0, Some(999)).await;
        assert!(matches!(result, Err(MixError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_assign_without_draft_rejected() {
        let fx = fixture().await;
        let result = fx.draft.assign(Team::Red, 0, None).await;
        assert!(matches!(result, Err(MixError::InvalidOperation(_))));
        let _ = fx.registry;
    }
}
