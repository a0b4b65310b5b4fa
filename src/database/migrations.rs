//! Ordered, additive schema migrations.
//!
//! Each migration runs once, inside its own transaction, and is recorded
//! in `schema_migrations`. The caller learns whether anything was pending
//! so it can trigger the replay-all-logs recovery path afterwards.

use sqlx::PgPool;
use tracing::info;

use crate::error::Result;

struct Migration {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "match_facts_and_accounts",
        sql: r#"
            CREATE TABLE players (
                id BIGSERIAL PRIMARY KEY,
                account_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                avatar TEXT,
                admin BOOLEAN NOT NULL DEFAULT FALSE,
                coach BOOLEAN NOT NULL DEFAULT FALSE
            );

            CREATE TABLE voice_accounts (
                id BIGSERIAL PRIMARY KEY,
                player_id BIGINT REFERENCES players (id),
                hash TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                tags JSONB NOT NULL DEFAULT '{}'::jsonb
            );

            CREATE TABLE origin_checks (
                id BIGSERIAL PRIMARY KEY,
                origin TEXT NOT NULL UNIQUE,
                validated BOOLEAN,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );

            CREATE TABLE match_logs (
                id BIGINT PRIMARY KEY,
                title TEXT NOT NULL,
                map TEXT NOT NULL,
                uploaded_at TIMESTAMPTZ NOT NULL,
                duration BIGINT NOT NULL,
                blu_score BIGINT NOT NULL,
                red_score BIGINT NOT NULL,
                winner TEXT,
                team_stats JSONB NOT NULL DEFAULT '{}'::jsonb
            );

            CREATE TABLE rounds (
                id BIGSERIAL PRIMARY KEY,
                log_id BIGINT NOT NULL REFERENCES match_logs (id) ON DELETE CASCADE,
                number INT NOT NULL,
                start_time TIMESTAMPTZ NOT NULL,
                duration BIGINT NOT NULL,
                winner TEXT,
                first_cap TEXT,
                team_stats JSONB NOT NULL DEFAULT '{}'::jsonb,
                UNIQUE (log_id, number)
            );

            CREATE TABLE log_players (
                id BIGSERIAL PRIMARY KEY,
                log_id BIGINT NOT NULL REFERENCES match_logs (id) ON DELETE CASCADE,
                player_id BIGINT NOT NULL REFERENCES players (id),
                kills BIGINT NOT NULL,
                assists BIGINT NOT NULL,
                deaths BIGINT NOT NULL,
                damage BIGINT NOT NULL,
                damage_taken BIGINT NOT NULL,
                playtime BIGINT NOT NULL,
                team TEXT NOT NULL,
                health_packs BIGINT NOT NULL,
                airshots BIGINT NOT NULL,
                captures BIGINT NOT NULL,
                raw_stats JSONB NOT NULL DEFAULT '{}'::jsonb,
                UNIQUE (log_id, player_id)
            );

            CREATE TABLE log_class_stats (
                id BIGSERIAL PRIMARY KEY,
                log_id BIGINT NOT NULL REFERENCES match_logs (id) ON DELETE CASCADE,
                log_player_id BIGINT NOT NULL REFERENCES log_players (id) ON DELETE CASCADE,
                player_id BIGINT NOT NULL REFERENCES players (id),
                class_name TEXT NOT NULL,
                kills BIGINT NOT NULL,
                assists BIGINT NOT NULL,
                deaths BIGINT NOT NULL,
                damage BIGINT NOT NULL,
                playtime BIGINT NOT NULL,
                ka_d DOUBLE PRECISION NOT NULL,
                k_d DOUBLE PRECISION NOT NULL,
                k_m DOUBLE PRECISION NOT NULL,
                a_m DOUBLE PRECISION NOT NULL,
                de_m DOUBLE PRECISION NOT NULL,
                da_m DOUBLE PRECISION NOT NULL,
                weapon_stats JSONB NOT NULL DEFAULT '{}'::jsonb,
                UNIQUE (log_player_id, class_name)
            );

            CREATE TABLE log_medic_stats (
                id BIGSERIAL PRIMARY KEY,
                log_id BIGINT NOT NULL REFERENCES match_logs (id) ON DELETE CASCADE,
                log_player_id BIGINT NOT NULL UNIQUE REFERENCES log_players (id) ON DELETE CASCADE,
                player_id BIGINT NOT NULL REFERENCES players (id),
                deaths BIGINT NOT NULL,
                damage_taken BIGINT NOT NULL,
                playtime BIGINT NOT NULL,
                ubers BIGINT NOT NULL,
                drops BIGINT NOT NULL,
                heals BIGINT NOT NULL,
                build_time DOUBLE PRECISION NOT NULL,
                uber_stats JSONB NOT NULL DEFAULT '{}'::jsonb,
                medic_stats JSONB NOT NULL DEFAULT '{}'::jsonb,
                heal_spread JSONB NOT NULL DEFAULT '{}'::jsonb
            );

            CREATE TABLE aggregated_class_stats (
                id BIGSERIAL PRIMARY KEY,
                player_id BIGINT REFERENCES players (id),
                class_name TEXT NOT NULL,
                count BIGINT NOT NULL,
                wins BIGINT NOT NULL,
                losses BIGINT NOT NULL,
                kills DOUBLE PRECISION NOT NULL,
                assists DOUBLE PRECISION NOT NULL,
                deaths DOUBLE PRECISION NOT NULL,
                damage DOUBLE PRECISION NOT NULL,
                playtime DOUBLE PRECISION NOT NULL,
                ka_d DOUBLE PRECISION NOT NULL,
                k_d DOUBLE PRECISION NOT NULL,
                k_m DOUBLE PRECISION NOT NULL,
                a_m DOUBLE PRECISION NOT NULL,
                de_m DOUBLE PRECISION NOT NULL,
                da_m DOUBLE PRECISION NOT NULL
            );
            CREATE INDEX idx_aggregated_player ON aggregated_class_stats (player_id);
            CREATE INDEX idx_class_stats_player ON log_class_stats (player_id);
        "#,
    },
    Migration {
        version: 2,
        name: "game_servers",
        sql: r#"
            CREATE TABLE game_servers (
                id BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                address TEXT NOT NULL UNIQUE,
                port INT NOT NULL DEFAULT 27015,
                rcon_password TEXT NOT NULL DEFAULT '',
                advanced_stats BOOLEAN NOT NULL DEFAULT FALSE,
                team_channels JSONB NOT NULL DEFAULT '{}'::jsonb
            );
        "#,
    },
    Migration {
        version: 3,
        name: "users",
        sql: r#"
            CREATE TABLE users (
                id BIGSERIAL PRIMARY KEY,
                player_id BIGINT REFERENCES players (id),
                voice_account_id BIGINT REFERENCES voice_accounts (id),
                origin_check_id BIGINT REFERENCES origin_checks (id),
                name TEXT NOT NULL DEFAULT '',
                archived_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            );
            CREATE INDEX idx_users_player ON users (player_id) WHERE archived_at IS NULL;
            CREATE INDEX idx_users_voice ON users (voice_account_id) WHERE archived_at IS NULL;
        "#,
    },
    Migration {
        version: 4,
        name: "voice_channels",
        sql: r#"
            CREATE TABLE voice_channels (
                id BIGINT PRIMARY KEY,
                tags JSONB NOT NULL DEFAULT '{}'::jsonb
            );
        "#,
    },
];

async fn applied_versions(pool: &PgPool) -> Result<Vec<i32>> {
    sqlx::query("CREATE TABLE IF NOT EXISTS schema_migrations (version INT PRIMARY KEY, name TEXT NOT NULL, applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW())")
        .execute(pool)
        .await?;
    let rows: Vec<(i32,)> = sqlx::query_as("SELECT version FROM schema_migrations ORDER BY version")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(version,)| version).collect())
}

/// Apply pending migrations in order. Returns how many ran; a non-zero
/// count means the schema changed and stored logs should be replayed.
pub async fn run(pool: &PgPool) -> Result<usize> {
    let applied = applied_versions(pool).await?;
    let mut ran = 0usize;

    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }
        info!(
            version = migration.version,
            name = migration.name,
            "applying migration"
        );
        let mut tx = pool.begin().await?;
        sqlx::raw_sql(migration.sql).execute(&mut *tx).await?;
        sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
            .bind(migration.version)
            .bind(migration.name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        ran += 1;
    }

    if ran > 0 {
        info!(count = ran, "migrations applied");
    }
    Ok(ran)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_unique() {
        let mut versions: Vec<i32> = MIGRATIONS.iter().map(|m| m.version).collect();
        let sorted = {
            let mut copy = versions.clone();
            copy.sort_unstable();
            copy
        };
        assert_eq!(versions, sorted);
        versions.dedup();
        assert_eq!(versions.len(), MIGRATIONS.len());
    }
}
