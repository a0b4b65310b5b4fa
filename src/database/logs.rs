//! Match fact persistence.
//!
//! One import is one transaction: player accounts, the log row, rounds,
//! per-player totals, per-class stats and medic stats all land together or
//! not at all. Re-importing a log id overwrites every dependent row.

use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::debug;

use crate::error::Result;
use crate::stats::NormalizedLog;
use crate::types::{LogId, PlayerId};

#[derive(Clone)]
pub struct LogRepository {
    pool: PgPool,
}

impl LogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist one normalized match document. Returns the durable player
    /// ids that appeared in it, for targeted aggregate recomputation.
    pub async fn upsert_match(&self, normalized: &NormalizedLog) -> Result<Vec<PlayerId>> {
        let mut tx = self.pool.begin().await?;
        let log_id = normalized.log.id;

        // Player accounts first; names refresh on every sighting.
        let mut player_ids: HashMap<&str, PlayerId> = HashMap::new();
        for player in &normalized.players {
            let row = sqlx::query(
                r#"
                INSERT INTO players (account_id, name)
                VALUES ($1, $2)
                ON CONFLICT (account_id) DO UPDATE SET name = EXCLUDED.name
                RETURNING id
                "#,
            )
            .bind(&player.account_id)
            .bind(&player.name)
            .fetch_one(&mut *tx)
            .await?;
            player_ids.insert(player.account_id.as_str(), row.get("id"));
        }

        sqlx::query(
            r#"
            INSERT INTO match_logs
                (id, title, map, uploaded_at, duration, blu_score, red_score, winner, team_stats)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                map = EXCLUDED.map,
                uploaded_at = EXCLUDED.uploaded_at,
                duration = EXCLUDED.duration,
                blu_score = EXCLUDED.blu_score,
                red_score = EXCLUDED.red_score,
                winner = EXCLUDED.winner,
                team_stats = EXCLUDED.team_stats
            "#,
        )
        .bind(log_id)
        .bind(&normalized.log.title)
        .bind(&normalized.log.map)
        .bind(normalized.log.uploaded_at)
        .bind(normalized.log.duration)
        .bind(normalized.log.blu_score)
        .bind(normalized.log.red_score)
        .bind(normalized.log.winner.map(|team| team.as_str()))
        .bind(&normalized.log.team_stats)
        .execute(&mut *tx)
        .await?;

        // Rounds are replaced wholesale; their identity is (log, number).
        sqlx::query("DELETE FROM rounds WHERE log_id = $1")
            .bind(log_id)
            .execute(&mut *tx)
            .await?;
        for round in &normalized.rounds {
            sqlx::query(
                r#"
                INSERT INTO rounds
                    (log_id, number, start_time, duration, winner, first_cap, team_stats)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(log_id)
            .bind(round.number)
            .bind(round.start_time)
            .bind(round.duration)
            .bind(round.winner.map(|team| team.as_str()))
            .bind(round.first_cap.map(|team| team.as_str()))
            .bind(&round.team_stats)
            .execute(&mut *tx)
            .await?;
        }

        // Per-player totals keep their row identity across re-imports so
        // dependent class/medic rows can reference a stable id.
        let mut log_player_ids: HashMap<&str, i64> = HashMap::new();
        for player in &normalized.players {
            let player_id = player_ids[player.account_id.as_str()];
            let row = sqlx::query(
                r#"
                INSERT INTO log_players
                    (log_id, player_id, kills, assists, deaths, damage, damage_taken,
                     playtime, team, health_packs, airshots, captures, raw_stats)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                ON CONFLICT (log_id, player_id) DO UPDATE SET
                    kills = EXCLUDED.kills,
                    assists = EXCLUDED.assists,
                    deaths = EXCLUDED.deaths,
                    damage = EXCLUDED.damage,
                    damage_taken = EXCLUDED.damage_taken,
                    playtime = EXCLUDED.playtime,
                    team = EXCLUDED.team,
                    health_packs = EXCLUDED.health_packs,
                    airshots = EXCLUDED.airshots,
                    captures = EXCLUDED.captures,
                    raw_stats = EXCLUDED.raw_stats
                RETURNING id
                "#,
            )
            .bind(log_id)
            .bind(player_id)
            .bind(player.kills)
            .bind(player.assists)
            .bind(player.deaths)
            .bind(player.damage)
            .bind(player.damage_taken)
            .bind(player.playtime)
            .bind(player.team.as_str())
            .bind(player.health_packs)
            .bind(player.airshots)
            .bind(player.captures)
            .bind(&player.raw_stats)
            .fetch_one(&mut *tx)
            .await?;
            log_player_ids.insert(player.account_id.as_str(), row.get("id"));
        }

        // Class and medic rows are simplest to replace outright.
        sqlx::query("DELETE FROM log_class_stats WHERE log_id = $1")
            .bind(log_id)
            .execute(&mut *tx)
            .await?;
        for stats in &normalized.class_stats {
            let (Some(&log_player_id), Some(&player_id)) = (
                log_player_ids.get(stats.account_id.as_str()),
                player_ids.get(stats.account_id.as_str()),
            ) else {
                continue;
            };
            sqlx::query(
                r#"
                INSERT INTO log_class_stats
                    (log_id, log_player_id, player_id, class_name, kills, assists, deaths,
                     damage, playtime, ka_d, k_d, k_m, a_m, de_m, da_m, weapon_stats)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                "#,
            )
            .bind(log_id)
            .bind(log_player_id)
            .bind(player_id)
            .bind(stats.class.as_str())
            .bind(stats.kills)
            .bind(stats.assists)
            .bind(stats.deaths)
            .bind(stats.damage)
            .bind(stats.playtime)
            .bind(stats.ka_d)
            .bind(stats.k_d)
            .bind(stats.k_m)
            .bind(stats.a_m)
            .bind(stats.de_m)
            .bind(stats.da_m)
            .bind(&stats.weapon_stats)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM log_medic_stats WHERE log_id = $1")
            .bind(log_id)
            .execute(&mut *tx)
            .await?;
        for medic in &normalized.medic_stats {
            let (Some(&log_player_id), Some(&player_id)) = (
                log_player_ids.get(medic.account_id.as_str()),
                player_ids.get(medic.account_id.as_str()),
            ) else {
                continue;
            };
            sqlx::query(
                r#"
                INSERT INTO log_medic_stats
                    (log_id, log_player_id, player_id, deaths, damage_taken, playtime,
                     ubers, drops, heals, build_time, uber_stats, medic_stats, heal_spread)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(log_id)
            .bind(log_player_id)
            .bind(player_id)
            .bind(medic.deaths)
            .bind(medic.damage_taken)
            .bind(medic.playtime)
            .bind(medic.ubers)
            .bind(medic.drops)
            .bind(medic.heals)
            .bind(medic.build_time)
            .bind(&medic.uber_stats)
            .bind(&medic.medic_stats)
            .bind(&medic.heal_spread)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            log_id,
            players = player_ids.len(),
            "match facts persisted"
        );
        Ok(player_ids.into_values().collect())
    }

    pub async fn list_log_ids(&self) -> Result<Vec<LogId>> {
        let rows: Vec<(LogId,)> = sqlx::query_as("SELECT id FROM match_logs ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    pub async fn log_player_count(&self, log_id: LogId) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM log_players WHERE log_id = $1")
            .bind(log_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }
}
