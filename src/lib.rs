//! mixmaster
//!
//! Coordinates live player identity across a voice server and one or more
//! game servers, and keeps historical match statistics aggregated.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Server entrypoint
//! ├── config.rs      - Configuration management
//! ├── error.rs       - Error taxonomy
//! ├── types.rs       - Shared enums and identifiers
//! ├── events.rs      - Outward update/delete event fan-out
//! ├── identity/      - Identity reconciliation core
//! │   ├── reconciler.rs - Live user arena, merge/split, suppression
//! │   ├── store.rs      - Durable identity records
//! │   └── user.rs       - Live user state and snapshots
//! ├── session/       - Voice/game adapter capability surface
//! ├── reputation/    - Cached, rate-limited origin classification
//! ├── stats/         - Match log import and aggregate statistics
//! ├── database/      - PostgreSQL persistence (sqlx) and migrations
//! ├── servers.rs     - Live game server registry
//! ├── draft.rs       - Coached-mix draft coordinator
//! └── commands.rs    - Administrative command dispatch
//! ```

pub mod commands;
pub mod config;
pub mod database;
pub mod draft;
pub mod error;
pub mod events;
pub mod identity;
pub mod reputation;
pub mod servers;
pub mod session;
pub mod stats;
pub mod types;

pub use commands::{AdminCommand, CommandDispatcher};
pub use config::MixConfig;
pub use database::DatabasePool;
pub use draft::{DraftAction, DraftCoordinator, DraftSnapshot};
pub use error::{MixError, Result};
pub use events::{Event, EventBus, EventKind, EventPayload};
pub use identity::{
    IdentityReconciler, IdentityStore, MemoryIdentityStore, SessionChange, UserAction,
    UserSnapshot,
};
pub use reputation::{HttpReputationLookup, ReputationChecker, ReputationLookup, StaticLookup};
pub use servers::{ServerAction, ServerRegistry, ServerSnapshot, TeamChannels};
pub use session::{GameControl, GameFact, SessionKind, VoiceControl, VoiceFact};
pub use stats::{HttpLogSource, LogImporter, LogSource, LogSummary, MemoryLogSource, StatsAggregator};
pub use types::{LogId, OriginVerdict, PlayerClass, PlayerId, Team, UserId, VoiceKind};
