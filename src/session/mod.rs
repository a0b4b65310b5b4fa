//! Session adapter surface.
//!
//! Voice and game adapters translate their wire protocols into a uniform
//! capability set plus two lifecycle events: `changed` (a displayable
//! attribute changed) and `ended` (session terminated). The core never sees
//! transport-level details; adapters call into
//! [`IdentityReconciler`](crate::identity::IdentityReconciler) with the
//! facts below and receive control handles back.

pub mod fakes;

use serde::Serialize;
use std::sync::Arc;

use crate::types::{ChannelId, PlayerClass, Team, VoiceKind};

/// Which of a user's two possible sessions an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Voice,
    Game,
}

/// Displayable state of a voice connection, reported by the adapter on
/// join and on every `changed` event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceFact {
    /// Stable fingerprint hash of the voice client certificate
    pub hash: String,
    pub name: String,
    pub kind: VoiceKind,
    pub channel_id: Option<ChannelId>,
    pub mute: bool,
    pub deaf: bool,
}

/// Displayable state of a game connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameFact {
    /// Stable external game account id
    pub account_id: String,
    pub name: String,
    pub team: Team,
    pub class: PlayerClass,
    /// Address of the game server the player is on
    pub server_address: String,
    pub mute: bool,
}

/// Capabilities every voice adapter must provide. Calls are fire and
/// forget; adapters queue the wire command and report the outcome through
/// a later `changed` event.
pub trait VoiceControl: Send + Sync {
    fn set_mute(&self, mute: bool);
    fn set_deaf(&self, deaf: bool);
    fn kick(&self, reason: &str);
    fn ban(&self, reason: &str);
    fn move_channel(&self, channel: ChannelId);
}

/// Capabilities every game adapter must provide. Spectator locking is only
/// available on stat-reporting servers, so it is advertised explicitly.
pub trait GameControl: Send + Sync {
    fn set_mute(&self, mute: bool);
    fn kick(&self, reason: &str);
    fn ban(&self, reason: &str);
    fn supports_spec_lock(&self) -> bool;
    fn set_spec_lock(&self, locked: bool);
}

pub type VoiceHandle = Arc<dyn VoiceControl>;
pub type GameHandle = Arc<dyn GameControl>;
