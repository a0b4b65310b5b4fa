//! Fake session adapters.
//!
//! Stand-ins for real voice/game connections, used by the test suite and
//! by operators to exercise the draft flow without live servers. Every
//! control call is recorded so tests can assert on issued commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::session::{GameControl, VoiceControl};
use crate::types::ChannelId;

/// A control command observed by a fake session.
#[derive(Debug, Clone, PartialEq)]
pub enum IssuedCommand {
    Mute(bool),
    Deaf(bool),
    Kick(String),
    Ban(String),
    Move(ChannelId),
    SpecLock(bool),
}

#[derive(Default)]
pub struct FakeVoiceSession {
    commands: Mutex<Vec<IssuedCommand>>,
}

impl FakeVoiceSession {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn commands(&self) -> Vec<IssuedCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn muted(&self) -> bool {
        self.commands()
            .iter()
            .rev()
            .find_map(|command| match command {
                IssuedCommand::Mute(mute) => Some(*mute),
                _ => None,
            })
            .unwrap_or(false)
    }

    fn record(&self, command: IssuedCommand) {
        self.commands.lock().unwrap().push(command);
    }
}

impl VoiceControl for FakeVoiceSession {
    fn set_mute(&self, mute: bool) {
        self.record(IssuedCommand::Mute(mute));
    }

    fn set_deaf(&self, deaf: bool) {
        self.record(IssuedCommand::Deaf(deaf));
    }

    fn kick(&self, reason: &str) {
        self.record(IssuedCommand::Kick(reason.to_string()));
    }

    fn ban(&self, reason: &str) {
        self.record(IssuedCommand::Ban(reason.to_string()));
    }

    fn move_channel(&self, channel: ChannelId) {
        self.record(IssuedCommand::Move(channel));
    }
}

pub struct FakeGameSession {
    commands: Mutex<Vec<IssuedCommand>>,
    spec_lock_capable: AtomicBool,
}

impl FakeGameSession {
    pub fn new(spec_lock_capable: bool) -> Arc<Self> {
        Arc::new(Self {
            commands: Mutex::new(Vec::new()),
            spec_lock_capable: AtomicBool::new(spec_lock_capable),
        })
    }

    pub fn commands(&self) -> Vec<IssuedCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn spec_locked(&self) -> bool {
        self.commands()
            .iter()
            .rev()
            .find_map(|command| match command {
                IssuedCommand::SpecLock(locked) => Some(*locked),
                _ => None,
            })
            .unwrap_or(false)
    }

    fn record(&self, command: IssuedCommand) {
        self.commands.lock().unwrap().push(command);
    }
}

impl GameControl for FakeGameSession {
    fn set_mute(&self, mute: bool) {
        self.record(IssuedCommand::Mute(mute));
    }

    fn kick(&self, reason: &str) {
        self.record(IssuedCommand::Kick(reason.to_string()));
    }

    fn ban(&self, reason: &str) {
        self.record(IssuedCommand::Ban(reason.to_string()));
    }

    fn supports_spec_lock(&self) -> bool {
        self.spec_lock_capable.load(Ordering::Relaxed)
    }

    fn set_spec_lock(&self, locked: bool) {
        if self.supports_spec_lock() {
            self.record(IssuedCommand::SpecLock(locked));
        }
    }
}
