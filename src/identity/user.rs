//! Live user state.
//!
//! A live user exists while at least one session (voice or game) is
//! attached to its origin. The arena in the reconciler owns these records;
//! adapters and subscribers only ever see ids and snapshots.

use serde::Serialize;

use crate::identity::store::UserRecord;
use crate::session::{GameFact, GameHandle, VoiceFact, VoiceHandle};
use crate::types::{ChannelId, OriginVerdict, PlayerId, UserId, VoiceAccountId};

pub struct VoiceSessionState {
    pub fact: VoiceFact,
    pub control: VoiceHandle,
}

pub struct GameSessionState {
    pub fact: GameFact,
    pub control: GameHandle,
}

pub struct LiveUser {
    pub record: UserRecord,
    pub origin: String,
    pub verdict: OriginVerdict,
    pub voice: Option<VoiceSessionState>,
    pub game: Option<GameSessionState>,
    /// Debounce generation; bumped on every mutation, checked at flush.
    pub(crate) notify_gen: u64,
}

impl LiveUser {
    pub fn new(record: UserRecord, origin: &str) -> Self {
        Self {
            record,
            origin: origin.to_string(),
            verdict: OriginVerdict::Unknown,
            voice: None,
            game: None,
            notify_gen: 0,
        }
    }

    pub fn id(&self) -> UserId {
        self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    pub fn has_sessions(&self) -> bool {
        self.voice.is_some() || self.game.is_some()
    }

    /// Forced mute plus spectator lock where the game server supports it.
    /// Applied on attach and on a verdict transition to suppressed.
    pub fn suppress(&self) {
        self.set_mute(true);
        if let Some(game) = &self.game {
            if game.control.supports_spec_lock() {
                game.control.set_spec_lock(true);
            }
        }
    }

    pub fn set_mute(&self, mute: bool) {
        if let Some(voice) = &self.voice {
            voice.control.set_mute(mute);
        }
        if let Some(game) = &self.game {
            game.control.set_mute(mute);
        }
    }

    pub fn set_deaf(&self, deaf: bool) {
        if let Some(voice) = &self.voice {
            voice.control.set_deaf(deaf);
        }
    }

    pub fn kick(&self, reason: &str) {
        if let Some(voice) = &self.voice {
            voice.control.kick(reason);
        }
        if let Some(game) = &self.game {
            game.control.kick(reason);
        }
    }

    pub fn ban(&self, reason: &str) {
        if let Some(voice) = &self.voice {
            voice.control.ban(reason);
        }
        if let Some(game) = &self.game {
            game.control.ban(reason);
        }
    }

    pub fn move_channel(&self, channel: ChannelId) {
        if let Some(voice) = &self.voice {
            voice.control.move_channel(channel);
        }
    }

    pub fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: self.id(),
            name: self.record.name.clone(),
            validated: self.verdict.as_validated(),
            player: self.record.player.as_ref().map(|player| PlayerRef {
                id: player.id,
                account_id: player.account_id.clone(),
            }),
            voice: self
                .record
                .voice
                .as_ref()
                .map(|voice| VoiceRef { id: voice.id }),
            voice_session: self.voice.as_ref().map(|session| session.fact.clone()),
            game_session: self.game.as_ref().map(|session| session.fact.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerRef {
    pub id: PlayerId,
    pub account_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceRef {
    pub id: VoiceAccountId,
}

/// Serializable projection of a live user, carried on the event feed.
#[derive(Debug, Clone, Serialize)]
pub struct UserSnapshot {
    pub id: UserId,
    pub name: String,
    pub validated: Option<bool>,
    pub player: Option<PlayerRef>,
    pub voice: Option<VoiceRef>,
    pub voice_session: Option<VoiceFact>,
    pub game_session: Option<GameFact>,
}
