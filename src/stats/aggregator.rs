//! Aggregate statistics.
//!
//! Per-player-per-class running totals plus two global rows per class: the
//! population average (count populated) and the sample standard deviation
//! (count zero). Rows are fully recomputed from the per-match samples on
//! every import; the math lives in pure functions so it can be checked
//! against hand-computed values.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::database::DatabasePool;
use crate::error::Result;
use crate::types::{PlayerClass, PlayerId, Team};

/// One (player, class, match) sample joined with the match outcome.
#[derive(Debug, Clone)]
pub struct ClassStatSample {
    pub player_id: PlayerId,
    pub class: PlayerClass,
    pub kills: i64,
    pub assists: i64,
    pub deaths: i64,
    pub damage: i64,
    pub playtime: i64,
    pub ka_d: f64,
    pub k_d: f64,
    pub k_m: f64,
    pub a_m: f64,
    pub de_m: f64,
    pub da_m: f64,
    pub team: Team,
    pub winner: Option<Team>,
}

/// One row of the aggregate table. `player_id` absent means a global row;
/// global rows with `count > 0` hold averages, `count == 0` deviations.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub player_id: Option<PlayerId>,
    pub class: PlayerClass,
    pub count: i64,
    pub wins: i64,
    pub losses: i64,
    pub kills: f64,
    pub assists: f64,
    pub deaths: f64,
    pub damage: f64,
    pub playtime: f64,
    pub ka_d: f64,
    pub k_d: f64,
    pub k_m: f64,
    pub a_m: f64,
    pub de_m: f64,
    pub da_m: f64,
}

/// Sample standard deviation (divide by N-1). Zero for fewer than two
/// samples.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values
        .iter()
        .map(|value| (value - mean) * (value - mean))
        .sum::<f64>()
        / (n as f64 - 1.0);
    variance.sqrt()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Per-player-per-class totals: counts, win/loss from decisive matches,
/// summed raw stats and the average of the per-match derived ratios (not
/// the ratio of sums).
pub fn aggregate_players(samples: &[ClassStatSample]) -> Vec<AggregateRow> {
    let mut groups: BTreeMap<(PlayerId, &'static str), Vec<&ClassStatSample>> = BTreeMap::new();
    for sample in samples {
        groups
            .entry((sample.player_id, sample.class.as_str()))
            .or_default()
            .push(sample);
    }

    groups
        .into_values()
        .map(|group| {
            let count = group.len() as i64;
            let wins = group
                .iter()
                .filter(|sample| sample.winner == Some(sample.team))
                .count() as i64;
            let decisive = group.iter().filter(|sample| sample.winner.is_some()).count() as i64;
            let ratios = |f: fn(&ClassStatSample) -> f64| {
                mean(&group.iter().map(|sample| f(sample)).collect::<Vec<_>>())
            };
            AggregateRow {
                player_id: Some(group[0].player_id),
                class: group[0].class,
                count,
                wins,
                losses: decisive - wins,
                kills: group.iter().map(|s| s.kills).sum::<i64>() as f64,
                assists: group.iter().map(|s| s.assists).sum::<i64>() as f64,
                deaths: group.iter().map(|s| s.deaths).sum::<i64>() as f64,
                damage: group.iter().map(|s| s.damage).sum::<i64>() as f64,
                playtime: group.iter().map(|s| s.playtime).sum::<i64>() as f64,
                ka_d: ratios(|s| s.ka_d),
                k_d: ratios(|s| s.k_d),
                k_m: ratios(|s| s.k_m),
                a_m: ratios(|s| s.a_m),
                de_m: ratios(|s| s.de_m),
                da_m: ratios(|s| s.da_m),
            }
        })
        .collect()
}

/// The two global rows per class over every sample in the population: an
/// average row (count = sample count, playtime = total playtime) and a
/// sample-standard-deviation row (count = 0).
pub fn aggregate_global(samples: &[ClassStatSample]) -> Vec<AggregateRow> {
    let mut groups: BTreeMap<&'static str, Vec<&ClassStatSample>> = BTreeMap::new();
    for sample in samples {
        groups.entry(sample.class.as_str()).or_default().push(sample);
    }

    let mut rows = Vec::with_capacity(groups.len() * 2);
    for group in groups.into_values() {
        let class = group[0].class;
        let count = group.len() as i64;
        let collect = |f: fn(&ClassStatSample) -> f64| {
            group.iter().map(|sample| f(sample)).collect::<Vec<_>>()
        };
        let kills = collect(|s| s.kills as f64);
        let assists = collect(|s| s.assists as f64);
        let deaths = collect(|s| s.deaths as f64);
        let damage = collect(|s| s.damage as f64);
        let playtime = collect(|s| s.playtime as f64);
        let ka_d = collect(|s| s.ka_d);
        let k_d = collect(|s| s.k_d);
        let k_m = collect(|s| s.k_m);
        let a_m = collect(|s| s.a_m);
        let de_m = collect(|s| s.de_m);
        let da_m = collect(|s| s.da_m);

        rows.push(AggregateRow {
            player_id: None,
            class,
            count,
            wins: 0,
            losses: 0,
            kills: mean(&kills),
            assists: mean(&assists),
            deaths: mean(&deaths),
            damage: mean(&damage),
            playtime: playtime.iter().sum(),
            ka_d: mean(&ka_d),
            k_d: mean(&k_d),
            k_m: mean(&k_m),
            a_m: mean(&a_m),
            de_m: mean(&de_m),
            da_m: mean(&da_m),
        });
        rows.push(AggregateRow {
            player_id: None,
            class,
            count: 0,
            wins: 0,
            losses: 0,
            kills: sample_std_dev(&kills),
            assists: sample_std_dev(&assists),
            deaths: sample_std_dev(&deaths),
            damage: sample_std_dev(&damage),
            playtime: sample_std_dev(&playtime),
            ka_d: sample_std_dev(&ka_d),
            k_d: sample_std_dev(&k_d),
            k_m: sample_std_dev(&k_m),
            a_m: sample_std_dev(&a_m),
            de_m: sample_std_dev(&de_m),
            da_m: sample_std_dev(&da_m),
        });
    }
    rows
}

/// Recomputes aggregate rows from the stored per-match samples.
pub struct StatsAggregator {
    db: Arc<DatabasePool>,
    /// Global rows are truncate+rebuild; interleaved writers would lose
    /// updates, so rebuilds are single-writer.
    rebuild: Mutex<()>,
}

impl StatsAggregator {
    pub fn new(db: Arc<DatabasePool>) -> Self {
        Self {
            db,
            rebuild: Mutex::new(()),
        }
    }

    /// Recompute rows for the given players (after an import) or for
    /// everyone (full rebuild). Global rows are always recomputed. The
    /// whole replacement is one transaction; re-running with unchanged
    /// inputs yields identical rows.
    pub async fn recompute(&self, player_ids: Option<&[PlayerId]>) -> Result<()> {
        let _guard = self.rebuild.lock().await;

        let samples = self.db.stats().fetch_samples().await?;
        let mut rows = match player_ids {
            Some(ids) => {
                let subset: Vec<ClassStatSample> = samples
                    .iter()
                    .filter(|sample| ids.contains(&sample.player_id))
                    .cloned()
                    .collect();
                aggregate_players(&subset)
            }
            None => aggregate_players(&samples),
        };
        rows.extend(aggregate_global(&samples));

        debug!(
            players = ?player_ids.map(<[PlayerId]>::len),
            rows = rows.len(),
            "replacing aggregate rows"
        );
        self.db.stats().replace_rows(player_ids, &rows).await?;
        info!(rows = rows.len(), "aggregate statistics recomputed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(
        player_id: PlayerId,
        class: PlayerClass,
        kills: i64,
        deaths: i64,
        playtime: i64,
        team: Team,
        winner: Option<Team>,
    ) -> ClassStatSample {
        let minutes = playtime as f64 / 60.0;
        let divide = |num: f64, denom: f64| if denom == 0.0 { 0.0 } else { num / denom };
        ClassStatSample {
            player_id,
            class,
            kills,
            assists: 0,
            deaths,
            damage: 0,
            playtime,
            ka_d: divide(kills as f64, deaths as f64),
            k_d: divide(kills as f64, deaths as f64),
            k_m: divide(kills as f64, minutes),
            a_m: 0.0,
            de_m: divide(deaths as f64, minutes),
            da_m: 0.0,
            team,
            winner,
        }
    }

    #[test]
    fn test_sample_std_dev_known_values() {
        // Hand computed: mean 5, squared deviations 8+2+2+8 = 20,
        // 20 / (4-1) = 6.666..., sqrt = 2.581988...
        let values = [2.0, 4.0, 6.0, 8.0];
        assert!((sample_std_dev(&values) - 2.581_988_897_471_611).abs() < 1e-12);
        assert_eq!(sample_std_dev(&[42.0]), 0.0);
        assert_eq!(sample_std_dev(&[]), 0.0);
    }

    #[test]
    fn test_wins_losses_count_only_decisive_matches() {
        let samples = vec![
            sample(1, PlayerClass::Scout, 10, 2, 600, Team::Red, Some(Team::Red)),
            sample(1, PlayerClass::Scout, 4, 6, 600, Team::Red, Some(Team::Blue)),
            // tie: decisive-match counters unaffected
            sample(1, PlayerClass::Scout, 7, 7, 600, Team::Red, None),
        ];
        let rows = aggregate_players(&samples);
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.count, 3);
        assert_eq!(row.wins, 1);
        assert_eq!(row.losses, 1);
        assert_eq!(row.kills, 21.0);
    }

    #[test]
    fn test_ratios_averaged_not_recomputed_from_sums() {
        // k_d per match: 10/2 = 5.0 and 2/10 = 0.2; average 2.6. The
        // ratio of the sums would be 12/12 = 1.0.
        let samples = vec![
            sample(1, PlayerClass::Soldier, 10, 2, 600, Team::Red, Some(Team::Red)),
            sample(1, PlayerClass::Soldier, 2, 10, 600, Team::Red, Some(Team::Red)),
        ];
        let rows = aggregate_players(&samples);
        assert!((rows[0].k_d - 2.6).abs() < 1e-12);
    }

    #[test]
    fn test_global_rows_average_and_deviation() {
        let samples = vec![
            sample(1, PlayerClass::Scout, 10, 2, 600, Team::Red, Some(Team::Red)),
            sample(2, PlayerClass::Scout, 6, 2, 600, Team::Blue, Some(Team::Red)),
        ];
        let rows = aggregate_global(&samples);
        assert_eq!(rows.len(), 2);

        let average = &rows[0];
        assert_eq!(average.count, 2);
        assert_eq!(average.kills, 8.0);
        assert!((average.k_d - 4.0).abs() < 1e-12);
        // playtime on the average row is the population total
        assert_eq!(average.playtime, 1200.0);

        let deviation = &rows[1];
        assert_eq!(deviation.count, 0);
        // kills 10 and 6: sample std dev = sqrt(((10-8)^2 + (6-8)^2) / 1)
        assert!((deviation.kills - 8.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_aggregation_idempotent() {
        let samples = vec![
            sample(1, PlayerClass::Scout, 10, 2, 600, Team::Red, Some(Team::Red)),
            sample(2, PlayerClass::Soldier, 5, 5, 600, Team::Blue, Some(Team::Red)),
        ];
        let first: Vec<AggregateRow> = aggregate_players(&samples)
            .into_iter()
            .chain(aggregate_global(&samples))
            .collect();
        let second: Vec<AggregateRow> = aggregate_players(&samples)
            .into_iter()
            .chain(aggregate_global(&samples))
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_import_scenario_scout_and_soldier() {
        // Two players, red wins 3-1: the scout (red) earns a win, the
        // soldier (blue) a loss, and the lone scout sample pins the global
        // scout average k_d at exactly 10/2.
        let samples = vec![
            sample(1, PlayerClass::Scout, 10, 2, 600, Team::Red, Some(Team::Red)),
            sample(2, PlayerClass::Soldier, 5, 5, 600, Team::Blue, Some(Team::Red)),
        ];

        let players = aggregate_players(&samples);
        let scout = players
            .iter()
            .find(|row| row.class == PlayerClass::Scout)
            .unwrap();
        assert_eq!((scout.count, scout.wins, scout.losses), (1, 1, 0));
        let soldier = players
            .iter()
            .find(|row| row.class == PlayerClass::Soldier)
            .unwrap();
        assert_eq!((soldier.count, soldier.wins, soldier.losses), (1, 0, 1));

        let global = aggregate_global(&samples);
        let scout_average = global
            .iter()
            .find(|row| row.class == PlayerClass::Scout && row.count > 0)
            .unwrap();
        assert!((scout_average.k_d - 5.0).abs() < f64::EPSILON);
    }
}
