//! Shared domain enums and identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Durable user record id.
pub type UserId = i64;
/// Durable player account id.
pub type PlayerId = i64;
/// Durable voice account id.
pub type VoiceAccountId = i64;
/// Voice channel id as reported by the voice server.
pub type ChannelId = i64;
/// External match log id (assigned by the log source, not by us).
pub type LogId = i64;

/// Match team as reported by game servers and match logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    Red,
    Blue,
    Spectator,
    Unassigned,
}

impl Team {
    pub fn as_str(&self) -> &'static str {
        match self {
            Team::Red => "Red",
            Team::Blue => "Blue",
            Team::Spectator => "Spectator",
            Team::Unassigned => "Unassigned",
        }
    }

    pub fn parse(value: &str) -> Option<Team> {
        match value {
            "Red" | "RED" => Some(Team::Red),
            "Blue" | "BLU" => Some(Team::Blue),
            "Spectator" => Some(Team::Spectator),
            "Unassigned" => Some(Team::Unassigned),
            _ => None,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Player class. The log source spells heavy as `heavyweapons`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerClass {
    Scout,
    Soldier,
    Pyro,
    Demoman,
    #[serde(rename = "heavyweapons")]
    Heavy,
    Engineer,
    Medic,
    Sniper,
    Spy,
    Spectator,
    Unassigned,
}

impl PlayerClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlayerClass::Scout => "scout",
            PlayerClass::Soldier => "soldier",
            PlayerClass::Pyro => "pyro",
            PlayerClass::Demoman => "demoman",
            PlayerClass::Heavy => "heavyweapons",
            PlayerClass::Engineer => "engineer",
            PlayerClass::Medic => "medic",
            PlayerClass::Sniper => "sniper",
            PlayerClass::Spy => "spy",
            PlayerClass::Spectator => "spectator",
            PlayerClass::Unassigned => "unassigned",
        }
    }

    pub fn parse(value: &str) -> Option<PlayerClass> {
        match value {
            "scout" | "Scout" => Some(PlayerClass::Scout),
            "soldier" | "Soldier" => Some(PlayerClass::Soldier),
            "pyro" | "Pyro" => Some(PlayerClass::Pyro),
            "demoman" | "Demoman" => Some(PlayerClass::Demoman),
            "heavyweapons" | "Heavy" => Some(PlayerClass::Heavy),
            "engineer" | "Engineer" => Some(PlayerClass::Engineer),
            "medic" | "Medic" => Some(PlayerClass::Medic),
            "sniper" | "Sniper" => Some(PlayerClass::Sniper),
            "spy" | "Spy" => Some(PlayerClass::Spy),
            "spectator" | "Spectator" => Some(PlayerClass::Spectator),
            "unassigned" | "Unassigned" => Some(PlayerClass::Unassigned),
            _ => None,
        }
    }
}

impl fmt::Display for PlayerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backing voice platform of a voice account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceKind {
    Mumble,
    Discord,
}

impl VoiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceKind::Mumble => "mumble",
            VoiceKind::Discord => "discord",
        }
    }
}

/// Reputation verdict for a network origin.
///
/// `Unknown` is never cached as terminal: it means the lookup has not
/// resolved yet (or failed transiently) and will be retried on access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginVerdict {
    Unknown,
    Trusted,
    Suppressed,
}

impl OriginVerdict {
    /// Database projection: `NULL` = unknown, `true` = trusted,
    /// `false` = suppressed.
    pub fn from_validated(validated: Option<bool>) -> OriginVerdict {
        match validated {
            None => OriginVerdict::Unknown,
            Some(true) => OriginVerdict::Trusted,
            Some(false) => OriginVerdict::Suppressed,
        }
    }

    pub fn as_validated(&self) -> Option<bool> {
        match self {
            OriginVerdict::Unknown => None,
            OriginVerdict::Trusted => Some(true),
            OriginVerdict::Suppressed => Some(false),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, OriginVerdict::Unknown)
    }
}
