//! Durable identity records.
//!
//! The store owns the persistent side of reconciliation: player accounts,
//! voice accounts, the user records pairing them, and cached origin checks.
//! The reconciler talks to it through the [`IdentityStore`] trait so the
//! live-state logic can be exercised against [`MemoryIdentityStore`]
//! without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;
use crate::types::{OriginVerdict, PlayerId, UserId, VoiceAccountId, VoiceKind};

/// Durable game identity, keyed by the external account id. Created on
/// first sighting, display name refreshed on every sighting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerAccount {
    pub id: PlayerId,
    pub account_id: String,
    pub name: String,
    pub admin: bool,
    pub coach: bool,
}

/// Durable voice identity, keyed by the client fingerprint hash.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceAccount {
    pub id: VoiceAccountId,
    pub player_id: Option<PlayerId>,
    pub hash: String,
    pub name: String,
    pub kind: VoiceKind,
    /// Derived from channel membership, refreshed on sighting
    pub tags: HashMap<String, String>,
}

/// The durable (player, voice) pairing. Once both links are present the
/// pair is a stable identity reused for any future connection carrying
/// either key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserRecord {
    pub id: UserId,
    pub name: String,
    pub player: Option<PlayerAccount>,
    pub voice: Option<VoiceAccount>,
}

impl UserRecord {
    pub fn player_id(&self) -> Option<PlayerId> {
        self.player.as_ref().map(|player| player.id)
    }

    pub fn voice_id(&self) -> Option<VoiceAccountId> {
        self.voice.as_ref().map(|voice| voice.id)
    }
}

/// A cached reputation verdict for one network origin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OriginCheck {
    pub origin: String,
    pub verdict: OriginVerdict,
    pub checked_at: DateTime<Utc>,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Create or refresh a player account; the name updates on every call.
    async fn upsert_player(
        &self,
        account_id: &str,
        name: &str,
        admin: bool,
    ) -> Result<PlayerAccount>;

    /// Create or refresh a voice account; name and tags update on every call.
    async fn upsert_voice_account(
        &self,
        hash: &str,
        name: &str,
        kind: VoiceKind,
        tags: &HashMap<String, String>,
    ) -> Result<VoiceAccount>;

    async fn find_user_by_voice(&self, voice_id: VoiceAccountId) -> Result<Option<UserRecord>>;

    async fn find_user_by_player(&self, player_id: PlayerId) -> Result<Option<UserRecord>>;

    async fn create_user(
        &self,
        name: &str,
        player_id: Option<PlayerId>,
        voice_id: Option<VoiceAccountId>,
    ) -> Result<UserRecord>;

    /// Persist the record's current links and name.
    async fn update_user(&self, record: &UserRecord) -> Result<()>;

    /// Soft-archive a record subsumed by a merge. Archived records are
    /// invisible to the find operations but their row survives.
    async fn archive_user(&self, user_id: UserId) -> Result<()>;

    /// Cached verdict for an origin. Entries older than `ttl` are purged
    /// and reported as [`OriginVerdict::Unknown`].
    async fn load_origin_check(&self, origin: &str, ttl: Duration) -> Result<OriginVerdict>;

    /// Cache a resolved verdict. Unknown is never persisted.
    async fn save_origin_check(&self, origin: &str, verdict: OriginVerdict) -> Result<()>;
}

/// In-memory store used by the test suite and the fake-session demo path.
#[derive(Default)]
pub struct MemoryIdentityStore {
    inner: std::sync::Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    next_id: i64,
    players: HashMap<PlayerId, PlayerAccount>,
    voices: HashMap<VoiceAccountId, VoiceAccount>,
    users: HashMap<UserId, StoredUser>,
    checks: HashMap<String, OriginCheck>,
}

#[derive(Clone)]
struct StoredUser {
    id: UserId,
    name: String,
    player_id: Option<PlayerId>,
    voice_id: Option<VoiceAccountId>,
    archived: bool,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-archived user records, for assertions.
    pub fn active_user_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.users.values().filter(|user| !user.archived).count()
    }

    /// Whether a record exists (archived or not) with the given links.
    pub fn record_links(&self, user_id: UserId) -> Option<(Option<PlayerId>, Option<VoiceAccountId>)> {
        let inner = self.inner.lock().unwrap();
        inner
            .users
            .get(&user_id)
            .map(|user| (user.player_id, user.voice_id))
    }

    fn materialize(inner: &MemoryInner, stored: &StoredUser) -> UserRecord {
        UserRecord {
            id: stored.id,
            name: stored.name.clone(),
            player: stored
                .player_id
                .and_then(|id| inner.players.get(&id).cloned()),
            voice: stored.voice_id.and_then(|id| inner.voices.get(&id).cloned()),
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn upsert_player(
        &self,
        account_id: &str,
        name: &str,
        admin: bool,
    ) -> Result<PlayerAccount> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner
            .players
            .values()
            .find(|player| player.account_id == account_id)
            .map(|player| player.id)
        {
            let player = inner.players.get_mut(&existing).unwrap();
            player.name = name.to_string();
            player.admin = player.admin || admin;
            return Ok(player.clone());
        }
        inner.next_id += 1;
        let player = PlayerAccount {
            id: inner.next_id,
            account_id: account_id.to_string(),
            name: name.to_string(),
            admin,
            coach: false,
        };
        inner.players.insert(player.id, player.clone());
        Ok(player)
    }

    async fn upsert_voice_account(
        &self,
        hash: &str,
        name: &str,
        kind: VoiceKind,
        tags: &HashMap<String, String>,
    ) -> Result<VoiceAccount> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner
            .voices
            .values()
            .find(|voice| voice.hash == hash)
            .map(|voice| voice.id)
        {
            let voice = inner.voices.get_mut(&existing).unwrap();
            voice.name = name.to_string();
            voice.tags = tags.clone();
            return Ok(voice.clone());
        }
        inner.next_id += 1;
        let voice = VoiceAccount {
            id: inner.next_id,
            player_id: None,
            hash: hash.to_string(),
            name: name.to_string(),
            kind,
            tags: tags.clone(),
        };
        inner.voices.insert(voice.id, voice.clone());
        Ok(voice)
    }

    async fn find_user_by_voice(&self, voice_id: VoiceAccountId) -> Result<Option<UserRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .users
            .values()
            .find(|user| !user.archived && user.voice_id == Some(voice_id))
            .map(|user| Self::materialize(&inner, user)))
    }

    async fn find_user_by_player(&self, player_id: PlayerId) -> Result<Option<UserRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .users
            .values()
            .find(|user| !user.archived && user.player_id == Some(player_id))
            .map(|user| Self::materialize(&inner, user)))
    }

    async fn create_user(
        &self,
        name: &str,
        player_id: Option<PlayerId>,
        voice_id: Option<VoiceAccountId>,
    ) -> Result<UserRecord> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let stored = StoredUser {
            id: inner.next_id,
            name: name.to_string(),
            player_id,
            voice_id,
            archived: false,
        };
        inner.users.insert(stored.id, stored.clone());
        Ok(Self::materialize(&inner, &stored))
    }

    async fn update_user(&self, record: &UserRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let player_id = record.player_id();
        let voice_id = record.voice_id();
        if let Some(stored) = inner.users.get_mut(&record.id) {
            stored.name = record.name.clone();
            stored.player_id = player_id;
            stored.voice_id = voice_id;
        }
        Ok(())
    }

    async fn archive_user(&self, user_id: UserId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(stored) = inner.users.get_mut(&user_id) {
            stored.archived = true;
        }
        Ok(())
    }

    async fn load_origin_check(&self, origin: &str, ttl: Duration) -> Result<OriginVerdict> {
        let mut inner = self.inner.lock().unwrap();
        let expired = match inner.checks.get(origin) {
            Some(check) => {
                let age = Utc::now().signed_duration_since(check.checked_at);
                age.num_seconds() >= ttl.as_secs() as i64
            }
            None => return Ok(OriginVerdict::Unknown),
        };
        if expired {
            inner.checks.remove(origin);
            return Ok(OriginVerdict::Unknown);
        }
        Ok(inner.checks[origin].verdict)
    }

    async fn save_origin_check(&self, origin: &str, verdict: OriginVerdict) -> Result<()> {
        if !verdict.is_resolved() {
            return Ok(());
        }
        let mut inner = self.inner.lock().unwrap();
        inner.checks.insert(
            origin.to_string(),
            OriginCheck {
                origin: origin.to_string(),
                verdict,
                checked_at: Utc::now(),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_player_refreshes_name() {
        let store = MemoryIdentityStore::new();
        let first = store.upsert_player("7656119", "old name", false).await.unwrap();
        let second = store.upsert_player("7656119", "new name", false).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "new name");
    }

    #[tokio::test]
    async fn test_origin_check_ttl_expiry() {
        let store = MemoryIdentityStore::new();
        store
            .save_origin_check("10.0.0.1", OriginVerdict::Trusted)
            .await
            .unwrap();
        let fresh = store
            .load_origin_check("10.0.0.1", Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(fresh, OriginVerdict::Trusted);
        let expired = store
            .load_origin_check("10.0.0.1", Duration::from_secs(0))
            .await
            .unwrap();
        assert_eq!(expired, OriginVerdict::Unknown);
    }

    #[tokio::test]
    async fn test_unknown_verdict_not_cached() {
        let store = MemoryIdentityStore::new();
        store
            .save_origin_check("10.0.0.2", OriginVerdict::Unknown)
            .await
            .unwrap();
        let loaded = store
            .load_origin_check("10.0.0.2", Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(loaded, OriginVerdict::Unknown);
    }

    #[tokio::test]
    async fn test_archived_user_invisible_to_lookups() {
        let store = MemoryIdentityStore::new();
        let voice = store
            .upsert_voice_account("hash-a", "someone", VoiceKind::Mumble, &HashMap::new())
            .await
            .unwrap();
        let user = store
            .create_user("someone", None, Some(voice.id))
            .await
            .unwrap();
        store.archive_user(user.id).await.unwrap();
        assert!(store.find_user_by_voice(voice.id).await.unwrap().is_none());
        // the row itself survives
        assert_eq!(store.record_links(user.id), Some((None, Some(voice.id))));
    }
}
