//! Match log import.
//!
//! Fetches one match document from the external source, normalizes it into
//! persistent facts, writes them in a single transaction and hands the
//! affected player set to the aggregator. Re-importing an id overwrites
//! the stored facts, it never duplicates them.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::ImportConfig;
use crate::database::DatabasePool;
use crate::error::{MixError, Result};
use crate::events::{EventBus, EventPayload};
use crate::stats::aggregator::StatsAggregator;
use crate::stats::logjson::LogDocument;
use crate::types::{LogId, PlayerClass, Team};

/// Read-only fetch of one match document by external id.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn fetch(&self, log_id: LogId) -> Result<LogDocument>;
}

pub struct HttpLogSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpLogSource {
    pub fn new(config: &ImportConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.source_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LogSource for HttpLogSource {
    async fn fetch(&self, log_id: LogId) -> Result<LogDocument> {
        let url = format!("{}/{}", self.base_url, log_id);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(MixError::External(format!(
                "log source returned {} for log {}",
                response.status(),
                log_id
            )));
        }
        Ok(response.json().await?)
    }
}

/// In-memory source for tests and replays from disk.
#[derive(Default)]
pub struct MemoryLogSource {
    documents: Mutex<HashMap<LogId, LogDocument>>,
}

impl MemoryLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, log_id: LogId, document: LogDocument) {
        self.documents.lock().unwrap().insert(log_id, document);
    }
}

#[async_trait]
impl LogSource for MemoryLogSource {
    async fn fetch(&self, log_id: LogId) -> Result<LogDocument> {
        self.documents
            .lock()
            .unwrap()
            .get(&log_id)
            .cloned()
            .ok_or_else(|| MixError::External(format!("no such log {log_id}")))
    }
}

// Normalized facts, keyed by the source's raw account id until the
// repository resolves durable player ids during the transactional upsert.

#[derive(Debug, Clone)]
pub struct NormalizedLog {
    pub log: MatchLogFact,
    pub rounds: Vec<RoundFact>,
    pub players: Vec<LogPlayerFact>,
    pub class_stats: Vec<ClassStatFact>,
    pub medic_stats: Vec<MedicStatFact>,
}

#[derive(Debug, Clone)]
pub struct MatchLogFact {
    pub id: LogId,
    pub title: String,
    pub map: String,
    pub uploaded_at: DateTime<Utc>,
    pub duration: i64,
    pub blu_score: i64,
    pub red_score: i64,
    pub winner: Option<Team>,
    pub team_stats: Value,
}

#[derive(Debug, Clone)]
pub struct RoundFact {
    pub number: i32,
    pub start_time: DateTime<Utc>,
    pub duration: i64,
    pub winner: Option<Team>,
    pub first_cap: Option<Team>,
    pub team_stats: Value,
}

#[derive(Debug, Clone)]
pub struct LogPlayerFact {
    pub account_id: String,
    pub name: String,
    pub team: Team,
    pub kills: i64,
    pub assists: i64,
    pub deaths: i64,
    pub damage: i64,
    pub damage_taken: i64,
    pub playtime: i64,
    pub health_packs: i64,
    pub airshots: i64,
    pub captures: i64,
    pub raw_stats: Value,
}

#[derive(Debug, Clone)]
pub struct ClassStatFact {
    pub account_id: String,
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
    pub weapon_stats: Value,
}

#[derive(Debug, Clone)]
pub struct MedicStatFact {
    pub account_id: String,
    pub deaths: i64,
    pub damage_taken: i64,
    pub playtime: i64,
    pub ubers: i64,
    pub drops: i64,
    pub heals: i64,
    pub build_time: f64,
    pub uber_stats: Value,
    pub medic_stats: Value,
    pub heal_spread: Value,
}

/// Summary published on the event feed after an import.
#[derive(Debug, Clone, Serialize)]
pub struct LogSummary {
    pub id: LogId,
    pub title: String,
    pub map: String,
    pub winner: Option<Team>,
    pub blu_score: i64,
    pub red_score: i64,
    pub duration: i64,
    pub player_count: usize,
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn json(value: &impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn medic_playtime(doc: &crate::stats::logjson::PlayerDoc) -> i64 {
    doc.class_stats
        .iter()
        .find(|stats| stats.class == Some(PlayerClass::Medic))
        .map(|stats| stats.total_time)
        .unwrap_or(0)
}

/// Pure normalization of one source document into persistent facts.
pub fn normalize(log_id: LogId, doc: &LogDocument) -> NormalizedLog {
    let winner = match doc.teams.blue.score.cmp(&doc.teams.red.score) {
        std::cmp::Ordering::Greater => Some(Team::Blue),
        std::cmp::Ordering::Less => Some(Team::Red),
        std::cmp::Ordering::Equal => None,
    };

    let log = MatchLogFact {
        id: log_id,
        title: doc.info.title.clone(),
        map: doc.info.map.clone(),
        uploaded_at: Utc
            .timestamp_opt(doc.info.date, 0)
            .single()
            .unwrap_or_else(Utc::now),
        duration: doc.length,
        blu_score: doc.teams.blue.score,
        red_score: doc.teams.red.score,
        winner,
        team_stats: json(&doc.teams),
    };

    let rounds = doc
        .rounds
        .iter()
        .enumerate()
        .map(|(index, round)| RoundFact {
            number: index as i32 + 1,
            start_time: Utc
                .timestamp_opt(round.start_time, 0)
                .single()
                .unwrap_or_else(Utc::now),
            duration: round.length,
            winner: round.winner,
            first_cap: round.firstcap,
            team_stats: json(&round.team),
        })
        .collect();

    let mut players = Vec::new();
    let mut class_stats = Vec::new();
    let mut medic_stats = Vec::new();

    for (raw_id, player) in &doc.players {
        let name = doc
            .names
            .get(raw_id)
            .cloned()
            .unwrap_or_else(|| raw_id.clone());
        let playtime: i64 = player.class_stats.iter().map(|stats| stats.total_time).sum();

        players.push(LogPlayerFact {
            account_id: raw_id.clone(),
            name,
            team: player.team,
            kills: player.kills,
            assists: player.assists,
            deaths: player.deaths,
            damage: player.dmg,
            damage_taken: player.dt,
            playtime,
            health_packs: player.medkits,
            airshots: player.airshots,
            captures: player.captures,
            raw_stats: json(player),
        });

        for stats in &player.class_stats {
            // corrupt entries carry no class
            let Some(class) = stats.class else { continue };
            let minutes = stats.total_time as f64 / 60.0;
            class_stats.push(ClassStatFact {
                account_id: raw_id.clone(),
                class,
                kills: stats.kills,
                assists: stats.assists,
                deaths: stats.deaths,
                damage: stats.dmg,
                playtime: stats.total_time,
                ka_d: ratio((stats.kills + stats.assists) as f64, stats.deaths as f64),
                k_d: ratio(stats.kills as f64, stats.deaths as f64),
                k_m: ratio(stats.kills as f64, minutes),
                a_m: ratio(stats.assists as f64, minutes),
                de_m: ratio(stats.deaths as f64, minutes),
                da_m: ratio(stats.dmg as f64, minutes),
                weapon_stats: json(&stats.weapon),
            });
        }

        if let Some(medic) = &player.medicstats {
            medic_stats.push(MedicStatFact {
                account_id: raw_id.clone(),
                deaths: player.deaths,
                damage_taken: player.dt,
                playtime: medic_playtime(player),
                ubers: player.ubers,
                drops: player.drops,
                heals: player.heal,
                build_time: medic.avg_time_to_build,
                uber_stats: json(&player.ubertypes),
                medic_stats: json(medic),
                heal_spread: json(
                    &doc.healspread.get(raw_id).cloned().unwrap_or_default(),
                ),
            });
        }
    }

    // Deterministic order for stable upserts and tests.
    players.sort_by(|a, b| a.account_id.cmp(&b.account_id));
    class_stats.sort_by(|a, b| {
        (a.account_id.as_str(), a.class.as_str()).cmp(&(b.account_id.as_str(), b.class.as_str()))
    });
    medic_stats.sort_by(|a, b| a.account_id.cmp(&b.account_id));

    NormalizedLog {
        log,
        rounds,
        players,
        class_stats,
        medic_stats,
    }
}

/// Imports match logs and keeps the aggregate table in step.
pub struct LogImporter {
    db: Arc<DatabasePool>,
    source: Arc<dyn LogSource>,
    aggregator: Arc<StatsAggregator>,
    bus: EventBus,
    /// Ids completed by this process instance; a fresh process may
    /// legitimately re-import (full refresh / migration replay).
    completed: Mutex<HashSet<LogId>>,
}

/// Outcome of a full refresh pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub total: usize,
    pub failed: usize,
}

impl LogImporter {
    pub fn new(
        db: Arc<DatabasePool>,
        source: Arc<dyn LogSource>,
        aggregator: Arc<StatsAggregator>,
        bus: EventBus,
    ) -> Self {
        Self {
            db,
            source,
            aggregator,
            bus,
            completed: Mutex::new(HashSet::new()),
        }
    }

    /// Import one log. Fails with `AlreadyImported` when this instance has
    /// already completed the id; any persistence failure rolls the whole
    /// import back and leaves the aggregate table untouched.
    pub async fn import(&self, log_id: LogId) -> Result<LogSummary> {
        if self.completed.lock().unwrap().contains(&log_id) {
            return Err(MixError::AlreadyImported(log_id));
        }

        let document = self.source.fetch(log_id).await?;
        let normalized = normalize(log_id, &document);
        let affected = self.db.logs().upsert_match(&normalized).await?;
        self.aggregator.recompute(Some(&affected)).await?;

        self.completed.lock().unwrap().insert(log_id);

        let summary = LogSummary {
            id: log_id,
            title: normalized.log.title.clone(),
            map: normalized.log.map.clone(),
            winner: normalized.log.winner,
            blu_score: normalized.log.blu_score,
            red_score: normalized.log.red_score,
            duration: normalized.log.duration,
            player_count: normalized.players.len(),
        };
        info!(
            log_id,
            players = summary.player_count,
            map = %summary.map,
            "log imported"
        );
        self.bus.update(EventPayload::Log(summary.clone()));
        Ok(summary)
    }

    /// Re-import every stored log, then rebuild all aggregate rows. Used
    /// by the migration replay recovery path; individual fetch failures
    /// are logged and skipped so one dead log cannot wedge the refresh.
    pub async fn refresh_all(&self) -> Result<RefreshOutcome> {
        let log_ids = self.db.logs().list_log_ids().await?;
        self.completed.lock().unwrap().clear();

        let total = log_ids.len();
        let mut failed = 0usize;
        for log_id in log_ids {
            info!(log_id, "refreshing log");
            if let Err(error) = self.import(log_id).await {
                warn!(log_id, %error, "log refresh failed, continuing");
                failed += 1;
            }
        }
        self.aggregator.recompute(None).await?;
        info!(total, failed, "log refresh complete");
        Ok(RefreshOutcome { total, failed })
    }
}
