//! Identity reconciliation.
//!
//! Owns the live `origin -> User` mapping, binds session facts to durable
//! identity records, resolves merge/split conflicts, applies the
//! suppression policy and debounces outward notifications.
//!
//! All live-state mutation paths (session events, reputation verdicts,
//! admin commands, debounce expiry) serialize through one mutex; adapters
//! never touch shared state directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::IdentityConfig;
use crate::error::{MixError, Result};
use crate::events::{EventBus, EventPayload};
use crate::identity::store::{IdentityStore, UserRecord};
use crate::identity::user::{GameSessionState, LiveUser, UserSnapshot, VoiceSessionState};
use crate::reputation::ReputationChecker;
use crate::session::{GameFact, GameHandle, SessionKind, VoiceFact, VoiceHandle};
use crate::types::{ChannelId, OriginVerdict, PlayerClass, UserId};

/// Closed set of actions that may be invoked on a live user. Anything not
/// representable here is not a permitted mutation path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "arg", rename_all = "snake_case")]
pub enum UserAction {
    Mute(bool),
    Deaf(bool),
    Kick(String),
    Ban(String),
    Move(ChannelId),
    SpecLock(bool),
}

/// A displayable attribute change reported by an adapter.
pub enum SessionChange {
    Voice(VoiceFact),
    Game(GameFact),
}

#[derive(Default)]
struct Inner {
    users: HashMap<UserId, LiveUser>,
    by_origin: HashMap<String, UserId>,
}

#[derive(Clone)]
pub struct IdentityReconciler {
    inner: Arc<Mutex<Inner>>,
    store: Arc<dyn IdentityStore>,
    checker: Arc<ReputationChecker>,
    bus: EventBus,
    debounce: Duration,
    admins: Arc<Vec<String>>,
    channel_tags: Arc<HashMap<ChannelId, HashMap<PlayerClass, String>>>,
}

impl IdentityReconciler {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        checker: Arc<ReputationChecker>,
        bus: EventBus,
        config: &IdentityConfig,
        channel_tags: HashMap<ChannelId, HashMap<PlayerClass, String>>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            store,
            checker,
            bus,
            debounce: Duration::from_millis(config.debounce_ms),
            admins: Arc::new(config.admins.clone()),
            channel_tags: Arc::new(channel_tags),
        }
    }

    /// Resolve the live user for `origin`, creating and binding as needed.
    ///
    /// At least one fact is required for a previously unseen origin. The
    /// returned id is the durable user record id after any rebinding.
    pub async fn resolve(
        &self,
        origin: &str,
        voice: Option<(VoiceFact, VoiceHandle)>,
        game: Option<(GameFact, GameHandle)>,
    ) -> Result<UserId> {
        let mut inner = self.inner.lock().await;

        let mut user_id = match inner.by_origin.get(origin) {
            Some(&id) => id,
            None => {
                let record = self
                    .locate_or_create_record(voice.as_ref().map(|v| &v.0), game.as_ref().map(|g| &g.0))
                    .await?;
                let id = record.id;
                info!(user_id = id, %origin, "live user created");
                let user = LiveUser::new(record, origin);
                self.occupy(&mut inner, user);
                id
            }
        };

        if let Some((fact, handle)) = voice {
            user_id = self.bind_voice(&mut inner, user_id, fact, handle).await?;
        }
        if let Some((fact, handle)) = game {
            user_id = self.bind_game(&mut inner, user_id, fact, handle).await?;
        }

        let verdict = self.checker.cached(origin).await?;
        {
            let user = inner
                .users
                .get_mut(&user_id)
                .ok_or_else(|| MixError::invalid("live user vanished during resolve"))?;
            user.verdict = verdict;
            if verdict == OriginVerdict::Suppressed {
                user.suppress();
            }
        }
        if !verdict.is_resolved() {
            self.spawn_origin_check(origin);
        }

        self.schedule_notify(&mut inner, user_id);
        Ok(user_id)
    }

    /// Apply a displayable attribute change from an adapter. An account key
    /// change (new fingerprint hash / game account) re-enters the merge
    /// rules; anything else just refreshes display state.
    pub async fn session_changed(&self, origin: &str, change: SessionChange) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let Some(&user_id) = inner.by_origin.get(origin) else {
            warn!(%origin, "change event for unknown origin ignored");
            return Ok(());
        };

        let user_id = match change {
            SessionChange::Voice(fact) => {
                let rebind_handle = {
                    let Some(session) =
                        inner.users.get_mut(&user_id).and_then(|u| u.voice.as_mut())
                    else {
                        warn!(%origin, "voice change without a voice session ignored");
                        return Ok(());
                    };
                    if session.fact == fact {
                        return Ok(());
                    }
                    if session.fact.hash != fact.hash {
                        Some(session.control.clone())
                    } else {
                        session.fact = fact.clone();
                        None
                    }
                };
                match rebind_handle {
                    Some(handle) => self.bind_voice(&mut inner, user_id, fact, handle).await?,
                    None => user_id,
                }
            }
            SessionChange::Game(fact) => {
                let rebind_handle = {
                    let Some(session) =
                        inner.users.get_mut(&user_id).and_then(|u| u.game.as_mut())
                    else {
                        warn!(%origin, "game change without a game session ignored");
                        return Ok(());
                    };
                    if session.fact == fact {
                        return Ok(());
                    }
                    if session.fact.account_id != fact.account_id {
                        Some(session.control.clone())
                    } else {
                        session.fact = fact.clone();
                        None
                    }
                };
                match rebind_handle {
                    Some(handle) => self.bind_game(&mut inner, user_id, fact, handle).await?,
                    None => user_id,
                }
            }
        };

        self.schedule_notify(&mut inner, user_id);
        Ok(())
    }

    /// Detach one session. When the debounce window closes with no session
    /// of either kind attached, the user is torn down and a delete fires.
    pub async fn session_ended(&self, origin: &str, kind: SessionKind) {
        let mut inner = self.inner.lock().await;
        let Some(&user_id) = inner.by_origin.get(origin) else {
            return;
        };
        if let Some(user) = inner.users.get_mut(&user_id) {
            match kind {
                SessionKind::Voice => user.voice = None,
                SessionKind::Game => user.game = None,
            }
            debug!(user_id, %origin, ?kind, "session detached");
            self.schedule_notify(&mut inner, user_id);
        }
    }

    /// Apply an asynchronously delivered reputation verdict. Late results
    /// for users that already disconnected are dropped.
    pub async fn apply_verdict(&self, origin: &str, verdict: OriginVerdict) {
        let mut inner = self.inner.lock().await;
        let Some(&user_id) = inner.by_origin.get(origin) else {
            debug!(%origin, "late reputation verdict dropped");
            return;
        };
        let Some(user) = inner.users.get_mut(&user_id) else {
            return;
        };
        if user.verdict == verdict {
            return;
        }
        user.verdict = verdict;
        if verdict == OriginVerdict::Suppressed {
            info!(user_id, %origin, "origin suppressed, muting sessions");
            user.suppress();
        }
        self.schedule_notify(&mut inner, user_id);
    }

    /// Invoke one of the permitted user actions.
    pub async fn dispatch_user(&self, user_id: UserId, action: UserAction) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let user = inner
            .users
            .get(&user_id)
            .ok_or_else(|| MixError::invalid(format!("no live user {user_id}")))?;
        match &action {
            UserAction::Mute(mute) => user.set_mute(*mute),
            UserAction::Deaf(deaf) => user.set_deaf(*deaf),
            UserAction::Kick(reason) => user.kick(reason),
            UserAction::Ban(reason) => user.ban(reason),
            UserAction::Move(channel) => {
                if user.voice.is_none() {
                    return Err(MixError::invalid(format!(
                        "user {user_id} has no voice session to move"
                    )));
                }
                user.move_channel(*channel);
            }
            UserAction::SpecLock(locked) => {
                let Some(game) = &user.game else {
                    return Err(MixError::invalid(format!(
                        "user {user_id} has no game session to lock"
                    )));
                };
                if !game.control.supports_spec_lock() {
                    return Err(MixError::invalid(
                        "game server does not support spectator locking",
                    ));
                }
                game.control.set_spec_lock(*locked);
            }
        }
        debug!(user_id, ?action, "user action dispatched");
        self.schedule_notify(&mut inner, user_id);
        Ok(())
    }

    pub async fn user_snapshot(&self, user_id: UserId) -> Option<UserSnapshot> {
        let inner = self.inner.lock().await;
        inner.users.get(&user_id).map(LiveUser::snapshot)
    }

    pub async fn snapshot_all(&self) -> Vec<UserSnapshot> {
        let inner = self.inner.lock().await;
        let mut snapshots: Vec<UserSnapshot> = inner.users.values().map(LiveUser::snapshot).collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }

    pub async fn user_id_for_origin(&self, origin: &str) -> Option<UserId> {
        let inner = self.inner.lock().await;
        inner.by_origin.get(origin).copied()
    }

    pub async fn live_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.users.len()
    }

    /// Consume asynchronously resolved verdicts from the checker's backlog
    /// drain and funnel them into the serialized mutation path.
    pub fn spawn_resolution_pump(&self, mut resolutions: mpsc::Receiver<(String, OriginVerdict)>) {
        let reconciler = self.clone();
        tokio::spawn(async move {
            while let Some((origin, verdict)) = resolutions.recv().await {
                reconciler.apply_verdict(&origin, verdict).await;
            }
        });
    }

    // Binding and merge/split.

    async fn locate_or_create_record(
        &self,
        voice: Option<&VoiceFact>,
        game: Option<&GameFact>,
    ) -> Result<UserRecord> {
        if voice.is_none() && game.is_none() {
            return Err(MixError::invalid(
                "cannot create a user without a voice or game fact",
            ));
        }

        let mut voice_id = None;
        if let Some(fact) = voice {
            let account = self
                .store
                .upsert_voice_account(&fact.hash, &fact.name, fact.kind, &self.voice_tags(fact.channel_id))
                .await?;
            if let Some(record) = self.store.find_user_by_voice(account.id).await? {
                return Ok(record);
            }
            voice_id = Some(account.id);
        }
        let mut player_id = None;
        if let Some(fact) = game {
            let account = self
                .store
                .upsert_player(&fact.account_id, &fact.name, self.is_admin(&fact.account_id))
                .await?;
            if let Some(record) = self.store.find_user_by_player(account.id).await? {
                return Ok(record);
            }
            player_id = Some(account.id);
        }

        // No durable identity claims either fact yet.
        let name = game
            .map(|fact| fact.name.clone())
            .or_else(|| voice.map(|fact| fact.name.clone()))
            .unwrap_or_default();
        self.store.create_user(&name, player_id, voice_id).await
    }

    async fn bind_voice(
        &self,
        inner: &mut Inner,
        user_id: UserId,
        fact: VoiceFact,
        handle: VoiceHandle,
    ) -> Result<UserId> {
        let account = self
            .store
            .upsert_voice_account(&fact.hash, &fact.name, fact.kind, &self.voice_tags(fact.channel_id))
            .await?;

        let current_voice = inner
            .users
            .get(&user_id)
            .ok_or_else(|| MixError::invalid(format!("no live user {user_id}")))?
            .record
            .voice_id();

        let user_id = match current_voice {
            // Fully consistent: refresh the stored projection only.
            Some(id) if id == account.id => {
                let user = Self::user_mut(inner, user_id)?;
                user.record.voice = Some(account);
                user_id
            }
            // Bound to a different voice account: the identity is
            // incompatible with the observed fact. Rebind the live user,
            // leaving the old record (and its data) in place.
            Some(_) => {
                let target = match self.store.find_user_by_voice(account.id).await? {
                    Some(record) => record,
                    None => {
                        self.store
                            .create_user(&fact.name, None, Some(account.id))
                            .await?
                    }
                };
                self.rebind(inner, user_id, target).await?
            }
            // Missing side supplied with no conflict.
            None => {
                match self.store.find_user_by_voice(account.id).await? {
                    Some(other) if other.id != user_id && other.player.is_some() => {
                        // The claiming record is a full identity of its own:
                        // the live user belongs there.
                        self.rebind(inner, user_id, other).await?
                    }
                    Some(other) if other.id != user_id => {
                        // The claiming record exists solely for this voice
                        // account: subsume it into the current identity.
                        self.store.archive_user(other.id).await?;
                        info!(
                            user_id,
                            subsumed = other.id,
                            "voice-only identity subsumed by merge"
                        );
                        let user = Self::user_mut(inner, user_id)?;
                        user.record.voice = Some(account);
                        self.store.update_user(&user.record).await?;
                        user_id
                    }
                    _ => {
                        let user = Self::user_mut(inner, user_id)?;
                        user.record.voice = Some(account);
                        self.store.update_user(&user.record).await?;
                        user_id
                    }
                }
            }
        };

        let user = Self::user_mut(inner, user_id)?;
        user.voice = Some(VoiceSessionState {
            fact,
            control: handle,
        });
        if user.verdict == OriginVerdict::Suppressed {
            user.suppress();
        }
        Ok(user_id)
    }

    async fn bind_game(
        &self,
        inner: &mut Inner,
        user_id: UserId,
        fact: GameFact,
        handle: GameHandle,
    ) -> Result<UserId> {
        let account = self
            .store
            .upsert_player(&fact.account_id, &fact.name, self.is_admin(&fact.account_id))
            .await?;

        let current_player = inner
            .users
            .get(&user_id)
            .ok_or_else(|| MixError::invalid(format!("no live user {user_id}")))?
            .record
            .player_id();

        let user_id = match current_player {
            Some(id) if id == account.id => {
                let user = Self::user_mut(inner, user_id)?;
                user.record.name = account.name.clone();
                user.record.player = Some(account);
                self.store.update_user(&user.record).await?;
                user_id
            }
            Some(_) => {
                let target = match self.store.find_user_by_player(account.id).await? {
                    Some(record) => record,
                    None => {
                        self.store
                            .create_user(&fact.name, Some(account.id), None)
                            .await?
                    }
                };
                self.rebind(inner, user_id, target).await?
            }
            None => {
                match self.store.find_user_by_player(account.id).await? {
                    Some(other) if other.id != user_id && other.voice.is_some() => {
                        self.rebind(inner, user_id, other).await?
                    }
                    Some(other) if other.id != user_id => {
                        self.store.archive_user(other.id).await?;
                        info!(
                            user_id,
                            subsumed = other.id,
                            "player-only identity subsumed by merge"
                        );
                        let user = Self::user_mut(inner, user_id)?;
                        user.record.name = account.name.clone();
                        user.record.player = Some(account);
                        self.store.update_user(&user.record).await?;
                        user_id
                    }
                    _ => {
                        let user = Self::user_mut(inner, user_id)?;
                        user.record.name = account.name.clone();
                        user.record.player = Some(account);
                        self.store.update_user(&user.record).await?;
                        user_id
                    }
                }
            }
        };

        let user = Self::user_mut(inner, user_id)?;
        user.game = Some(GameSessionState {
            fact,
            control: handle,
        });
        if user.verdict == OriginVerdict::Suppressed {
            user.suppress();
        }
        Ok(user_id)
    }

    /// Move the live user (same in-memory object, same sessions) onto a
    /// different durable record. The feed sees a delete for the old id and
    /// a debounced update for the new one.
    async fn rebind(
        &self,
        inner: &mut Inner,
        old_id: UserId,
        target: UserRecord,
    ) -> Result<UserId> {
        let mut user = inner
            .users
            .remove(&old_id)
            .ok_or_else(|| MixError::invalid(format!("no live user {old_id}")))?;
        self.bus.delete(EventPayload::User(user.snapshot()));
        info!(old_id, new_id = target.id, "live user rebound to new identity");

        let new_id = target.id;
        user.record = target;
        user.notify_gen += 1;
        inner.by_origin.insert(user.origin.clone(), new_id);
        self.occupy(inner, user);
        Ok(new_id)
    }

    /// Insert into the arena. A durable identity backs at most one live
    /// user; a previous occupant (stale connection) is evicted.
    fn occupy(&self, inner: &mut Inner, user: LiveUser) {
        if let Some(evicted) = inner.users.remove(&user.id()) {
            inner.by_origin.remove(&evicted.origin);
            self.bus.delete(EventPayload::User(evicted.snapshot()));
            warn!(user_id = user.id(), "evicted stale live user for identity");
        }
        inner.by_origin.insert(user.origin.clone(), user.id());
        inner.users.insert(user.id(), user);
    }

    fn user_mut(inner: &mut Inner, user_id: UserId) -> Result<&mut LiveUser> {
        inner
            .users
            .get_mut(&user_id)
            .ok_or_else(|| MixError::invalid(format!("no live user {user_id}")))
    }

    // Notification debounce.

    fn schedule_notify(&self, inner: &mut Inner, user_id: UserId) {
        let Some(user) = inner.users.get_mut(&user_id) else {
            return;
        };
        user.notify_gen += 1;
        let generation = user.notify_gen;
        let reconciler = self.clone();
        let window = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            reconciler.flush_notification(user_id, generation).await;
        });
    }

    async fn flush_notification(&self, user_id: UserId, generation: u64) {
        let mut inner = self.inner.lock().await;
        let Some(user) = inner.users.get(&user_id) else {
            return;
        };
        if user.notify_gen != generation {
            // A newer mutation restarted the window.
            return;
        }
        if user.has_sessions() {
            let snapshot = user.snapshot();
            drop(inner);
            self.bus.update(EventPayload::User(snapshot));
        } else {
            let origin = user.origin.clone();
            let snapshot = user.snapshot();
            inner.users.remove(&user_id);
            inner.by_origin.remove(&origin);
            drop(inner);
            info!(user_id, %origin, "live user disconnected");
            self.bus.delete(EventPayload::User(snapshot));
        }
    }

    fn spawn_origin_check(&self, origin: &str) {
        let reconciler = self.clone();
        let origin = origin.to_string();
        tokio::spawn(async move {
            match reconciler.checker.check(&origin).await {
                Ok(verdict) if verdict.is_resolved() => {
                    reconciler.apply_verdict(&origin, verdict).await;
                }
                Ok(_) => {}
                Err(error) => warn!(%origin, %error, "origin check failed"),
            }
        });
    }

    fn is_admin(&self, account_id: &str) -> bool {
        self.admins.iter().any(|admin| admin == account_id)
    }

    fn voice_tags(&self, channel: Option<ChannelId>) -> HashMap<String, String> {
        let Some(channel) = channel else {
            return HashMap::new();
        };
        self.channel_tags
            .get(&channel)
            .map(|tags| {
                tags.iter()
                    .map(|(class, skill)| (class.as_str().to_string(), skill.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::identity::store::MemoryIdentityStore;
    use crate::reputation::{ReputationChecker, StaticLookup};
    use crate::session::fakes::{FakeGameSession, FakeVoiceSession, IssuedCommand};
    use crate::types::{PlayerClass, Team, VoiceKind};
    use std::sync::Arc;

    fn voice_fact(hash: &str, name: &str) -> VoiceFact {
        VoiceFact {
            hash: hash.to_string(),
            name: name.to_string(),
            kind: VoiceKind::Mumble,
            channel_id: None,
            mute: false,
            deaf: false,
        }
    }

    fn game_fact(account: &str, name: &str) -> GameFact {
        GameFact {
            account_id: account.to_string(),
            name: name.to_string(),
            team: Team::Red,
            class: PlayerClass::Scout,
            server_address: "mix1.example.org".to_string(),
            mute: false,
        }
    }

    struct Fixture {
        store: Arc<MemoryIdentityStore>,
        reconciler: IdentityReconciler,
        bus: EventBus,
    }

    fn fixture_with_verdict(verdict: OriginVerdict) -> Fixture {
        let store = Arc::new(MemoryIdentityStore::new());
        let bus = EventBus::new(64);
        let checker = Arc::new(ReputationChecker::for_tests(
            store.clone(),
            Arc::new(StaticLookup::new(verdict)),
        ));
        let reconciler = IdentityReconciler::new(
            store.clone(),
            checker,
            bus.clone(),
            &IdentityConfig::default(),
            HashMap::new(),
        );
        Fixture {
            store,
            reconciler,
            bus,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_verdict(OriginVerdict::Trusted)
    }

    #[tokio::test]
    async fn test_one_live_user_per_origin() {
        let fx = fixture();
        let voice = FakeVoiceSession::new();
        let game = FakeGameSession::new(true);

        let from_voice = fx
            .reconciler
            .resolve("10.0.0.1", Some((voice_fact("hash-a", "alice"), voice)), None)
            .await
            .unwrap();
        let from_game = fx
            .reconciler
            .resolve("10.0.0.1", None, Some((game_fact("765-a", "alice"), game)))
            .await
            .unwrap();

        assert_eq!(from_voice, from_game);
        assert_eq!(fx.reconciler.live_count().await, 1);
    }

    #[tokio::test]
    async fn test_merge_idempotence_single_record() {
        let fx = fixture();
        for _ in 0..2 {
            let voice = FakeVoiceSession::new();
            let game = FakeGameSession::new(true);
            fx.reconciler
                .resolve(
                    "10.0.0.1",
                    Some((voice_fact("hash-a", "alice"), voice)),
                    Some((game_fact("765-a", "alice"), game)),
                )
                .await
                .unwrap();
        }
        assert_eq!(fx.store.active_user_count(), 1);
    }

    #[tokio::test]
    async fn test_voice_only_record_subsumed_on_merge() {
        let fx = fixture();

        // A voice-only identity exists from an earlier connection.
        let voice = FakeVoiceSession::new();
        let first = fx
            .reconciler
            .resolve("10.0.0.1", Some((voice_fact("hash-a", "alice"), voice)), None)
            .await
            .unwrap();
        fx.reconciler
            .session_ended("10.0.0.1", SessionKind::Voice)
            .await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fx.reconciler.live_count().await, 0);

        // A separate game-only identity appears, then the voice fact joins it.
        let game = FakeGameSession::new(true);
        let second = fx
            .reconciler
            .resolve("10.0.0.2", None, Some((game_fact("765-a", "alice"), game)))
            .await
            .unwrap();
        assert_ne!(first, second);
        let voice = FakeVoiceSession::new();
        let merged = fx
            .reconciler
            .resolve("10.0.0.2", Some((voice_fact("hash-a", "alice"), voice)), None)
            .await
            .unwrap();

        assert_eq!(merged, second);
        // The voice-only record was archived, its link subsumed.
        assert_eq!(fx.store.active_user_count(), 1);
        let (player, voice_link) = fx.store.record_links(second).unwrap();
        assert!(player.is_some());
        assert!(voice_link.is_some());
    }

    #[tokio::test]
    async fn test_conflict_rebinds_without_data_loss() {
        let fx = fixture();

        // Identity B: full (player + voice) pairing from an old connection.
        let voice_b = FakeVoiceSession::new();
        let game_b = FakeGameSession::new(true);
        let id_b = fx
            .reconciler
            .resolve(
                "10.0.0.9",
                Some((voice_fact("hash-b", "bob"), voice_b)),
                Some((game_fact("765-b", "bob"), game_b)),
            )
            .await
            .unwrap();
        fx.reconciler.session_ended("10.0.0.9", SessionKind::Voice).await;
        fx.reconciler.session_ended("10.0.0.9", SessionKind::Game).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        // Identity A: bound via a different voice fact.
        let voice_a = FakeVoiceSession::new();
        let id_a = fx
            .reconciler
            .resolve("10.0.0.1", Some((voice_fact("hash-a", "alice"), voice_a)), None)
            .await
            .unwrap();
        assert_ne!(id_a, id_b);

        // The same origin now reports B's game account: full rebind to B.
        let game = FakeGameSession::new(true);
        let rebound = fx
            .reconciler
            .resolve("10.0.0.1", None, Some((game_fact("765-b", "bob"), game)))
            .await
            .unwrap();
        assert_eq!(rebound, id_b);
        assert_eq!(fx.reconciler.user_id_for_origin("10.0.0.1").await, Some(id_b));

        // A keeps its voice link; nothing was deleted.
        let (player_a, voice_a_link) = fx.store.record_links(id_a).unwrap();
        assert_eq!(player_a, None);
        assert!(voice_a_link.is_some());
        assert_eq!(fx.store.active_user_count(), 2);
    }

    #[tokio::test]
    async fn test_suppressed_origin_muted_and_spec_locked_on_attach() {
        let fx = fixture_with_verdict(OriginVerdict::Trusted);
        fx.store
            .save_origin_check("10.6.6.6", OriginVerdict::Suppressed)
            .await
            .unwrap();

        let voice = FakeVoiceSession::new();
        let game = FakeGameSession::new(true);
        fx.reconciler
            .resolve(
                "10.6.6.6",
                Some((voice_fact("hash-x", "mallory"), voice.clone())),
                Some((game_fact("765-x", "mallory"), game.clone())),
            )
            .await
            .unwrap();

        assert!(voice.muted());
        assert!(game.spec_locked());
    }

    #[tokio::test]
    async fn test_suppression_applied_on_verdict_transition() {
        let fx = fixture_with_verdict(OriginVerdict::Unknown);
        let voice = FakeVoiceSession::new();
        fx.reconciler
            .resolve("10.7.7.7", Some((voice_fact("hash-y", "eve"), voice.clone())), None)
            .await
            .unwrap();
        assert!(!voice.muted());

        fx.reconciler
            .apply_verdict("10.7.7.7", OriginVerdict::Suppressed)
            .await;
        assert!(voice.muted());
    }

    #[tokio::test]
    async fn test_late_verdict_for_disconnected_user_ignored() {
        let fx = fixture_with_verdict(OriginVerdict::Unknown);
        let voice = FakeVoiceSession::new();
        fx.reconciler
            .resolve("10.8.8.8", Some((voice_fact("hash-z", "zoe"), voice)), None)
            .await
            .unwrap();
        fx.reconciler.session_ended("10.8.8.8", SessionKind::Voice).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fx.reconciler.live_count().await, 0);

        // Must not panic or resurrect the user.
        fx.reconciler
            .apply_verdict("10.8.8.8", OriginVerdict::Suppressed)
            .await;
        assert_eq!(fx.reconciler.live_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_collapses_rapid_mutations() {
        let fx = fixture();
        let mut events = fx.bus.subscribe();

        let voice = FakeVoiceSession::new();
        fx.reconciler
            .resolve("10.1.1.1", Some((voice_fact("hash-a", "alice"), voice)), None)
            .await
            .unwrap();

        // Three rapid display-state mutations inside the window.
        for channel in [1, 2, 3] {
            let mut fact = voice_fact("hash-a", "alice");
            fact.channel_id = Some(channel);
            fx.reconciler
                .session_changed("10.1.1.1", SessionChange::Voice(fact))
                .await
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(60)).await;

        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::Update);
        assert!(events.try_recv().is_err(), "expected exactly one update");
    }

    #[tokio::test]
    async fn test_detach_then_window_elapse_emits_delete() {
        let fx = fixture();
        let mut events = fx.bus.subscribe();

        let voice = FakeVoiceSession::new();
        fx.reconciler
            .resolve("10.2.2.2", Some((voice_fact("hash-a", "alice"), voice)), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
        let first = events.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::Update);

        fx.reconciler.session_ended("10.2.2.2", SessionKind::Voice).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        let second = events.recv().await.unwrap();
        assert_eq!(second.kind, EventKind::Delete);
        assert_eq!(fx.reconciler.live_count().await, 0);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_unknown_user() {
        let fx = fixture();
        let result = fx.reconciler.dispatch_user(404, UserAction::Mute(true)).await;
        assert!(matches!(result, Err(MixError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_dispatch_mute_reaches_both_sessions() {
        let fx = fixture();
        let voice = FakeVoiceSession::new();
        let game = FakeGameSession::new(false);
        let user_id = fx
            .reconciler
            .resolve(
                "10.3.3.3",
                Some((voice_fact("hash-a", "alice"), voice.clone())),
                Some((game_fact("765-a", "alice"), game.clone())),
            )
            .await
            .unwrap();

        fx.reconciler
            .dispatch_user(user_id, UserAction::Mute(true))
            .await
            .unwrap();
        assert!(voice.commands().contains(&IssuedCommand::Mute(true)));
        assert!(game.commands().contains(&IssuedCommand::Mute(true)));

        // Spectator lock is rejected on servers without the capability.
        let result = fx
            .reconciler
            .dispatch_user(user_id, UserAction::SpecLock(true))
            .await;
        assert!(matches!(result, Err(MixError::InvalidOperation(_))));
    }
}
