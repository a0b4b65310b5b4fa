//! Match log source document.
//!
//! Read-only wire format served by the external log site. We consume it,
//! we never own it; unrecognized fields are ignored and blob-like sections
//! are carried as raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::types::{PlayerClass, Team};

#[derive(Debug, Clone, Deserialize)]
pub struct LogDocument {
    pub teams: TeamsDoc,
    /// Match duration in seconds
    pub length: i64,
    /// Raw account id -> per-match totals
    pub players: HashMap<String, PlayerDoc>,
    /// Raw account id -> display name
    pub names: HashMap<String, String>,
    #[serde(default)]
    pub rounds: Vec<RoundDoc>,
    /// healer id -> healed id -> amount
    #[serde(default)]
    pub healspread: HashMap<String, HashMap<String, i64>>,
    pub info: InfoDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamsDoc {
    #[serde(rename = "Red")]
    pub red: TeamDoc,
    #[serde(rename = "Blue")]
    pub blue: TeamDoc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamDoc {
    pub score: i64,
    #[serde(default)]
    pub kills: i64,
    #[serde(default)]
    pub deaths: i64,
    #[serde(default)]
    pub dmg: i64,
    #[serde(default)]
    pub charges: i64,
    #[serde(default)]
    pub drops: i64,
    #[serde(default)]
    pub firstcaps: i64,
    #[serde(default)]
    pub caps: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InfoDoc {
    pub title: String,
    pub map: String,
    /// Upload time, unix seconds
    pub date: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerDoc {
    pub team: Team,
    #[serde(default)]
    pub class_stats: Vec<ClassStatsDoc>,
    pub kills: i64,
    pub deaths: i64,
    pub assists: i64,
    pub dmg: i64,
    /// Damage taken
    #[serde(default)]
    pub dt: i64,
    /// Health packs collected
    #[serde(default)]
    pub medkits: i64,
    /// Airshots
    #[serde(rename = "as", default)]
    pub airshots: i64,
    /// Capture point captures
    #[serde(rename = "cpc", default)]
    pub captures: i64,
    #[serde(default)]
    pub ubers: i64,
    #[serde(default)]
    pub ubertypes: HashMap<String, i64>,
    #[serde(default)]
    pub drops: i64,
    #[serde(default)]
    pub heal: i64,
    #[serde(default)]
    pub medicstats: Option<MedicStatsDoc>,
    /// Everything else, preserved verbatim for the raw-stats column
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MedicStatsDoc {
    #[serde(default)]
    pub advantages_lost: i64,
    #[serde(default)]
    pub biggest_advantage_lost: i64,
    #[serde(default)]
    pub deaths_with_95_99_uber: i64,
    #[serde(default)]
    pub deaths_within_20s_after_uber: i64,
    #[serde(default)]
    pub avg_time_before_healing: f64,
    #[serde(default)]
    pub avg_time_to_build: f64,
    #[serde(default)]
    pub avg_time_before_using: f64,
    #[serde(default)]
    pub avg_uber_length: f64,
}

fn lenient_class<'de, D>(deserializer: D) -> Result<Option<PlayerClass>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.as_deref().and_then(PlayerClass::parse))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassStatsDoc {
    /// The source emits the literal string "undefined" for corrupt
    /// entries; those rows are skipped during normalization.
    #[serde(rename = "type", default, deserialize_with = "lenient_class")]
    pub class: Option<PlayerClass>,
    pub kills: i64,
    pub assists: i64,
    pub deaths: i64,
    pub dmg: i64,
    #[serde(default)]
    pub weapon: HashMap<String, Value>,
    pub total_time: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoundDoc {
    pub start_time: i64,
    pub length: i64,
    #[serde(default)]
    pub winner: Option<Team>,
    #[serde(default)]
    pub firstcap: Option<Team>,
    #[serde(default)]
    pub team: HashMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_document() {
        let raw = serde_json::json!({
            "teams": {
                "Red": { "score": 3 },
                "Blue": { "score": 1 }
            },
            "length": 1200,
            "names": { "[U:1:1]": "alice" },
            "players": {
                "[U:1:1]": {
                    "team": "Red",
                    "kills": 10,
                    "deaths": 2,
                    "assists": 4,
                    "dmg": 5000,
                    "as": 2,
                    "class_stats": [
                        { "type": "scout", "kills": 10, "assists": 4,
                          "deaths": 2, "dmg": 5000, "total_time": 600 }
                    ]
                }
            },
            "rounds": [
                { "start_time": 1700000000, "length": 300, "winner": "Red" }
            ],
            "info": { "title": "mix #42", "map": "cp_process", "date": 1700000000 }
        });

        let doc: LogDocument = serde_json::from_value(raw).unwrap();
        assert_eq!(doc.teams.red.score, 3);
        let player = &doc.players["[U:1:1]"];
        assert_eq!(player.airshots, 2);
        assert_eq!(player.class_stats[0].class, Some(PlayerClass::Scout));
        assert_eq!(doc.rounds[0].winner, Some(Team::Red));
    }

    #[test]
    fn test_corrupt_class_entry_parses_as_none() {
        let raw = serde_json::json!({
            "type": "undefined", "kills": 0, "assists": 0, "deaths": 0,
            "dmg": 0, "total_time": 10
        });
        let doc: ClassStatsDoc = serde_json::from_value(raw).unwrap();
        assert!(doc.class.is_none());
    }
}
