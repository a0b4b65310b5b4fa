//! PostgreSQL-backed identity store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use crate::identity::{IdentityStore, PlayerAccount, UserRecord, VoiceAccount};
use crate::types::{OriginVerdict, PlayerId, UserId, VoiceAccountId, VoiceKind};

#[derive(Clone)]
pub struct PgIdentityStore {
    pool: PgPool,
}

impl PgIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn player_from_row(row: &sqlx::postgres::PgRow) -> PlayerAccount {
        PlayerAccount {
            id: row.get("id"),
            account_id: row.get("account_id"),
            name: row.get("name"),
            admin: row.get("admin"),
            coach: row.get("coach"),
        }
    }

    fn voice_from_row(row: &sqlx::postgres::PgRow) -> VoiceAccount {
        let tags: serde_json::Value = row.get("tags");
        let kind: String = row.get("kind");
        VoiceAccount {
            id: row.get("id"),
            player_id: row.get("player_id"),
            hash: row.get("hash"),
            name: row.get("name"),
            kind: match kind.as_str() {
                "discord" => VoiceKind::Discord,
                _ => VoiceKind::Mumble,
            },
            tags: serde_json::from_value(tags).unwrap_or_default(),
        }
    }

    async fn fetch_player(&self, player_id: PlayerId) -> Result<Option<PlayerAccount>> {
        let row = sqlx::query(
            "SELECT id, account_id, name, admin, coach FROM players WHERE id = $1",
        )
        .bind(player_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::player_from_row))
    }

    async fn fetch_voice(&self, voice_id: VoiceAccountId) -> Result<Option<VoiceAccount>> {
        let row = sqlx::query(
            "SELECT id, player_id, hash, name, kind, tags FROM voice_accounts WHERE id = $1",
        )
        .bind(voice_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(Self::voice_from_row))
    }

    async fn materialize(&self, row: &sqlx::postgres::PgRow) -> Result<UserRecord> {
        let player_id: Option<PlayerId> = row.get("player_id");
        let voice_id: Option<VoiceAccountId> = row.get("voice_account_id");
        let player = match player_id {
            Some(id) => self.fetch_player(id).await?,
            None => None,
        };
        let voice = match voice_id {
            Some(id) => self.fetch_voice(id).await?,
            None => None,
        };
        Ok(UserRecord {
            id: row.get("id"),
            name: row.get("name"),
            player,
            voice,
        })
    }
}

#[async_trait]
impl IdentityStore for PgIdentityStore {
    async fn upsert_player(
        &self,
        account_id: &str,
        name: &str,
        admin: bool,
    ) -> Result<PlayerAccount> {
        let row = sqlx::query(
            r#"
            INSERT INTO players (account_id, name, admin)
            VALUES ($1, $2, $3)
            ON CONFLICT (account_id) DO UPDATE SET
                name = EXCLUDED.name,
                admin = players.admin OR EXCLUDED.admin
            RETURNING id, account_id, name, admin, coach
            "#,
        )
        .bind(account_id)
        .bind(name)
        .bind(admin)
        .fetch_one(&self.pool)
        .await?;
        Ok(Self::player_from_row(&row))
    }

    async fn upsert_voice_account(
        &self,
        hash: &str,
        name: &str,
        kind: VoiceKind,
        tags: &HashMap<String, String>,
    ) -> Result<VoiceAccount> {
        let row = sqlx::query(
            r#"
            INSERT INTO voice_accounts (hash, name, kind, tags)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (hash) DO UPDATE SET
                name = EXCLUDED.name,
                tags = EXCLUDED.tags
            RETURNING id, player_id, hash, name, kind, tags
            "#,
        )
        .bind(hash)
        .bind(name)
        .bind(kind.as_str())
        .bind(serde_json::to_value(tags).unwrap_or_default())
        .fetch_one(&self.pool)
        .await?;
        Ok(Self::voice_from_row(&row))
    }

    async fn find_user_by_voice(&self, voice_id: VoiceAccountId) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, player_id, voice_account_id
            FROM users
            WHERE voice_account_id = $1 AND archived_at IS NULL
            "#,
        )
        .bind(voice_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.materialize(&row).await?)),
            None => Ok(None),
        }
    }

    async fn find_user_by_player(&self, player_id: PlayerId) -> Result<Option<UserRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, player_id, voice_account_id
            FROM users
            WHERE player_id = $1 AND archived_at IS NULL
            "#,
        )
        .bind(player_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.materialize(&row).await?)),
            None => Ok(None),
        }
    }

    async fn create_user(
        &self,
        name: &str,
        player_id: Option<PlayerId>,
        voice_id: Option<VoiceAccountId>,
    ) -> Result<UserRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (name, player_id, voice_account_id)
            VALUES ($1, $2, $3)
            RETURNING id, name, player_id, voice_account_id
            "#,
        )
        .bind(name)
        .bind(player_id)
        .bind(voice_id)
        .fetch_one(&self.pool)
        .await?;
        debug!(user_id = row.get::<UserId, _>("id"), "user record created");
        self.materialize(&row).await
    }

    async fn update_user(&self, record: &UserRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET name = $2, player_id = $3, voice_account_id = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(record.player_id())
        .bind(record.voice_id())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn archive_user(&self, user_id: UserId) -> Result<()> {
        sqlx::query("UPDATE users SET archived_at = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        debug!(user_id, "user record archived");
        Ok(())
    }

    async fn load_origin_check(&self, origin: &str, ttl: Duration) -> Result<OriginVerdict> {
        let row = sqlx::query("SELECT validated, updated_at FROM origin_checks WHERE origin = $1")
            .bind(origin)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(OriginVerdict::Unknown);
        };

        let updated_at: DateTime<Utc> = row.get("updated_at");
        let age = Utc::now().signed_duration_since(updated_at);
        if age.num_seconds() >= ttl.as_secs() as i64 {
            sqlx::query("DELETE FROM origin_checks WHERE origin = $1")
                .bind(origin)
                .execute(&self.pool)
                .await?;
            return Ok(OriginVerdict::Unknown);
        }

        let validated: Option<bool> = row.get("validated");
        Ok(OriginVerdict::from_validated(validated))
    }

    async fn save_origin_check(&self, origin: &str, verdict: OriginVerdict) -> Result<()> {
        let Some(validated) = verdict.as_validated() else {
            // Unknown is retried on next access, never cached.
            return Ok(());
        };
        sqlx::query(
            r#"
            INSERT INTO origin_checks (origin, validated)
            VALUES ($1, $2)
            ON CONFLICT (origin) DO UPDATE SET
                validated = EXCLUDED.validated,
                updated_at = NOW()
            "#,
        )
        .bind(origin)
        .bind(validated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
