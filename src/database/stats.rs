//! Aggregate row persistence.

use sqlx::{PgPool, Row};
use tracing::warn;

use crate::error::Result;
use crate::stats::{AggregateRow, ClassStatSample};
use crate::types::{PlayerClass, PlayerId, Team};

#[derive(Clone)]
pub struct StatsRepository {
    pool: PgPool,
}

impl StatsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Every per-class-per-match sample joined with its match outcome.
    pub async fn fetch_samples(&self) -> Result<Vec<ClassStatSample>> {
        let rows = sqlx::query(
            r#"
            SELECT lcs.player_id, lcs.class_name, lcs.kills, lcs.assists, lcs.deaths,
                   lcs.damage, lcs.playtime, lcs.ka_d, lcs.k_d, lcs.k_m, lcs.a_m,
                   lcs.de_m, lcs.da_m, lp.team, ml.winner
            FROM log_class_stats lcs
            JOIN log_players lp ON lcs.log_player_id = lp.id
            JOIN match_logs ml ON lcs.log_id = ml.id
            ORDER BY lcs.id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut samples = Vec::with_capacity(rows.len());
        for row in rows {
            let class_name: String = row.get("class_name");
            let Some(class) = PlayerClass::parse(&class_name) else {
                warn!(class = %class_name, "skipping sample with unknown class");
                continue;
            };
            let team_name: String = row.get("team");
            let Some(team) = Team::parse(&team_name) else {
                warn!(team = %team_name, "skipping sample with unknown team");
                continue;
            };
            let winner: Option<String> = row.get("winner");
            samples.push(ClassStatSample {
                player_id: row.get("player_id"),
                class,
                kills: row.get("kills"),
                assists: row.get("assists"),
                deaths: row.get("deaths"),
                damage: row.get("damage"),
                playtime: row.get("playtime"),
                ka_d: row.get("ka_d"),
                k_d: row.get("k_d"),
                k_m: row.get("k_m"),
                a_m: row.get("a_m"),
                de_m: row.get("de_m"),
                da_m: row.get("da_m"),
                team,
                winner: winner.as_deref().and_then(Team::parse),
            });
        }
        Ok(samples)
    }

    /// Replace aggregate rows transactionally. With `player_ids` given,
    /// only those players' rows plus the global rows are touched; with
    /// `None`, the whole table is rebuilt.
    pub async fn replace_rows(
        &self,
        player_ids: Option<&[PlayerId]>,
        rows: &[AggregateRow],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        match player_ids {
            Some(ids) => {
                sqlx::query(
                    "DELETE FROM aggregated_class_stats WHERE player_id = ANY($1) OR player_id IS NULL",
                )
                .bind(ids)
                .execute(&mut *tx)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM aggregated_class_stats")
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO aggregated_class_stats
                    (player_id, class_name, count, wins, losses, kills, assists, deaths,
                     damage, playtime, ka_d, k_d, k_m, a_m, de_m, da_m)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                "#,
            )
            .bind(row.player_id)
            .bind(row.class.as_str())
            .bind(row.count)
            .bind(row.wins)
            .bind(row.losses)
            .bind(row.kills)
            .bind(row.assists)
            .bind(row.deaths)
            .bind(row.damage)
            .bind(row.playtime)
            .bind(row.ka_d)
            .bind(row.k_d)
            .bind(row.k_m)
            .bind(row.a_m)
            .bind(row.de_m)
            .bind(row.da_m)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Stored aggregate rows, ordered for stable comparison.
    pub async fn fetch_rows(&self) -> Result<Vec<AggregateRow>> {
        let rows = sqlx::query(
            r#"
            SELECT player_id, class_name, count, wins, losses, kills, assists, deaths,
                   damage, playtime, ka_d, k_d, k_m, a_m, de_m, da_m
            FROM aggregated_class_stats
            ORDER BY player_id NULLS LAST, class_name, count DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let class_name: String = row.get("class_name");
            let Some(class) = PlayerClass::parse(&class_name) else {
                continue;
            };
            result.push(AggregateRow {
                player_id: row.get("player_id"),
                class,
                count: row.get("count"),
                wins: row.get("wins"),
                losses: row.get("losses"),
                kills: row.get("kills"),
                assists: row.get("assists"),
                deaths: row.get("deaths"),
                damage: row.get("damage"),
                playtime: row.get("playtime"),
                ka_d: row.get("ka_d"),
                k_d: row.get("k_d"),
                k_m: row.get("k_m"),
                a_m: row.get("a_m"),
                de_m: row.get("de_m"),
                da_m: row.get("da_m"),
            });
        }
        Ok(result)
    }
}
