//! Integration tests.
//!
//! The identity flows run against the in-memory store and fake sessions.
//! The import pipeline tests exercise a real PostgreSQL database and only
//! run when MIX_TEST_DATABASE_URL is set; they skip cleanly otherwise.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mixmaster::config::IdentityConfig;
use mixmaster::database::DatabasePool;
use mixmaster::events::{EventBus, EventKind, EventPayload};
use mixmaster::identity::{IdentityReconciler, MemoryIdentityStore};
use mixmaster::reputation::{ReputationChecker, StaticLookup};
use mixmaster::session::fakes::{FakeGameSession, FakeVoiceSession};
use mixmaster::session::{GameFact, VoiceFact};
use mixmaster::stats::{LogImporter, MemoryLogSource, StatsAggregator};
use mixmaster::types::{OriginVerdict, PlayerClass, Team, VoiceKind};
use mixmaster::MixError;

// ============================================================================
// Test helpers
// ============================================================================

fn voice_fact(hash: &str, name: &str) -> VoiceFact {
    VoiceFact {
        hash: hash.to_string(),
        name: name.to_string(),
        kind: VoiceKind::Mumble,
        channel_id: Some(1),
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

fn reconciler_with(verdict: OriginVerdict) -> (IdentityReconciler, EventBus) {
    let store = Arc::new(MemoryIdentityStore::new());
    let bus = EventBus::new(128);
    let checker = Arc::new(
        ReputationChecker::new(
            store.clone(),
            Arc::new(StaticLookup::new(verdict)),
            &mixmaster::config::ReputationConfig::default(),
        )
        .0,
    );
    let reconciler = IdentityReconciler::new(
        store,
        checker,
        bus.clone(),
        &IdentityConfig::default(),
        HashMap::new(),
    );
    (reconciler, bus)
}

/// The spec.md §8 end-to-end scenario document: two players, red wins 3-1.
fn scenario_document() -> mixmaster::stats::logjson::LogDocument {
    serde_json::from_value(serde_json::json!({
        "teams": {
            "Red": { "score": 3, "kills": 15, "dmg": 9000 },
            "Blue": { "score": 1, "kills": 8, "dmg": 5000 }
        },
        "length": 1800,
        "names": { "[U:1:100]": "scout-player", "[U:1:200]": "soldier-player" },
        "players": {
            "[U:1:100]": {
                "team": "Red", "kills": 10, "deaths": 2, "assists": 3,
                "dmg": 6000, "dt": 4000,
                "class_stats": [
                    { "type": "scout", "kills": 10, "assists": 3,
                      "deaths": 2, "dmg": 6000, "total_time": 600 }
                ]
            },
            "[U:1:200]": {
                "team": "Blue", "kills": 5, "deaths": 5, "assists": 1,
                "dmg": 4000, "dt": 4200,
                "class_stats": [
                    { "type": "soldier", "kills": 5, "assists": 1,
                      "deaths": 5, "dmg": 4000, "total_time": 600 }
                ]
            }
        },
        "rounds": [
            { "start_time": 1700000000, "length": 900, "winner": "Red" },
            { "start_time": 1700000900, "length": 900, "winner": "Red" }
        ],
        "info": { "title": "mix #1001", "map": "cp_process", "date": 1700000000 }
    }))
    .unwrap()
}

async fn test_database() -> Option<Arc<DatabasePool>> {
    let Ok(url) = std::env::var("MIX_TEST_DATABASE_URL") else {
        eprintln!("MIX_TEST_DATABASE_URL not set, skipping database test");
        return None;
    };
    let config = mixmaster::config::DatabaseConfig {
        url,
        max_connections: 4,
    };
    let db = Arc::new(
        DatabasePool::connect(&config)
            .await
            .expect("failed to connect to test database"),
    );
    db.migrate().await.expect("migrations failed");

    // Leftovers from earlier runs would skew the aggregate assertions.
    for table in [
        "aggregated_class_stats",
        "log_medic_stats",
        "log_class_stats",
        "log_players",
        "rounds",
        "match_logs",
        "users",
        "voice_accounts",
        "origin_checks",
        "players",
    ] {
        sqlx::query(&format!("DELETE FROM {table}"))
            .execute(db.pool())
            .await
            .expect("cleanup failed");
    }
    Some(db)
}

// ============================================================================
// Identity flows (in-memory store, fake sessions)
// ============================================================================

#[tokio::test]
async fn test_voice_then_game_attach_keeps_one_user() {
    let (reconciler, bus) = reconciler_with(OriginVerdict::Trusted);
    let mut events = bus.subscribe();

    let voice = FakeVoiceSession::new();
    let first = reconciler
        .resolve("192.0.2.1", Some((voice_fact("hash-1", "alice"), voice)), None)
        .await
        .unwrap();

    let game = FakeGameSession::new(true);
    let second = reconciler
        .resolve("192.0.2.1", None, Some((game_fact("765-1", "alice"), game)))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(reconciler.live_count().await, 1);

    tokio::time::sleep(Duration::from_millis(80)).await;
    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, EventKind::Update);
    match event.payload {
        EventPayload::User(user) => {
            assert!(user.voice_session.is_some());
            assert!(user.game_session.is_some());
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[tokio::test]
async fn test_async_suppression_flows_back_to_sessions() {
    let (reconciler, _bus) = reconciler_with(OriginVerdict::Suppressed);

    let voice = FakeVoiceSession::new();
    let game = FakeGameSession::new(true);
    reconciler
        .resolve(
            "198.51.100.7",
            Some((voice_fact("hash-p", "proxy-user"), voice.clone())),
            Some((game_fact("765-p", "proxy-user"), game.clone())),
        )
        .await
        .unwrap();

    // The verdict arrives asynchronously from the spawned lookup.
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(voice.muted());
    assert!(game.spec_locked());
}

#[tokio::test]
async fn test_disconnect_tears_down_and_late_events_ignored() {
    let (reconciler, bus) = reconciler_with(OriginVerdict::Trusted);
    let mut events = bus.subscribe();

    let voice = FakeVoiceSession::new();
    reconciler
        .resolve("192.0.2.9", Some((voice_fact("hash-9", "bob"), voice)), None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(events.recv().await.unwrap().kind, EventKind::Update);

    reconciler
        .session_ended("192.0.2.9", mixmaster::SessionKind::Voice)
        .await;
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(events.recv().await.unwrap().kind, EventKind::Delete);
    assert_eq!(reconciler.live_count().await, 0);

    reconciler
        .apply_verdict("192.0.2.9", OriginVerdict::Suppressed)
        .await;
    assert_eq!(reconciler.live_count().await, 0);
}

// ============================================================================
// Import pipeline (real database, gated)
// ============================================================================

#[tokio::test]
async fn test_end_to_end_import_scenario() {
    let Some(db) = test_database().await else {
        return;
    };

    let bus = EventBus::new(32);
    let aggregator = Arc::new(StatsAggregator::new(db.clone()));
    let source = Arc::new(MemoryLogSource::new());
    source.insert(1001, scenario_document());
    let importer = LogImporter::new(db.clone(), source, aggregator.clone(), bus.clone());
    let mut events = bus.subscribe();

    let summary = importer.import(1001).await.unwrap();
    assert_eq!(summary.winner, Some(Team::Red));
    assert_eq!(summary.player_count, 2);

    // The log event reaches subscribers.
    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, EventKind::Update);
    assert!(matches!(event.payload, EventPayload::Log(_)));

    // LogPlayer rows exist for both players.
    assert_eq!(db.logs().log_player_count(1001).await.unwrap(), 2);

    let rows = db.stats().fetch_rows().await.unwrap();

    // Per-player scout row: one decisive match, won.
    let scout = rows
        .iter()
        .find(|row| row.player_id.is_some() && row.class == PlayerClass::Scout)
        .expect("scout aggregate row");
    assert_eq!((scout.count, scout.wins, scout.losses), (1, 1, 0));

    let soldier = rows
        .iter()
        .find(|row| row.player_id.is_some() && row.class == PlayerClass::Soldier)
        .expect("soldier aggregate row");
    assert_eq!((soldier.count, soldier.wins, soldier.losses), (1, 0, 1));

    // Global scout average row: k_d = 10 / 2 over the single sample.
    let global_scout = rows
        .iter()
        .find(|row| row.player_id.is_none() && row.class == PlayerClass::Scout && row.count > 0)
        .expect("global scout average row");
    assert!((global_scout.k_d - 5.0).abs() < 1e-9);

    // Deviation row exists with count zero.
    assert!(rows
        .iter()
        .any(|row| row.player_id.is_none() && row.class == PlayerClass::Scout && row.count == 0));
}

#[tokio::test]
async fn test_reimport_and_recompute_are_idempotent() {
    let Some(db) = test_database().await else {
        return;
    };

    let bus = EventBus::new(32);
    let aggregator = Arc::new(StatsAggregator::new(db.clone()));
    let source = Arc::new(MemoryLogSource::new());
    source.insert(2002, scenario_document());
    let importer = LogImporter::new(db.clone(), source.clone(), aggregator.clone(), bus.clone());

    importer.import(2002).await.unwrap();

    // Same instance refuses a double import.
    let again = importer.import(2002).await;
    assert!(matches!(again, Err(MixError::AlreadyImported(2002))));

    let first_rows = db.stats().fetch_rows().await.unwrap();

    // A fresh instance (new process lifetime) may re-import; facts are
    // overwritten, never duplicated.
    let fresh = LogImporter::new(db.clone(), source, aggregator.clone(), bus.clone());
    fresh.import(2002).await.unwrap();
    assert_eq!(db.logs().log_player_count(2002).await.unwrap(), 2);

    // Recompute twice more; rows must not drift.
    aggregator.recompute(None).await.unwrap();
    aggregator.recompute(None).await.unwrap();
    let second_rows = db.stats().fetch_rows().await.unwrap();
    assert_eq!(first_rows, second_rows);

    // Full refresh replays the stored log.
    let outcome = fresh.refresh_all().await.unwrap();
    assert_eq!(outcome.total, 1);
    assert_eq!(outcome.failed, 0);
}
