//! PostgreSQL persistence.
//!
//! One pool, one repository per area, additive ordered migrations run
//! before any service starts.

pub mod identities;
pub mod logs;
pub mod migrations;
pub mod pool;
pub mod stats;

pub use identities::PgIdentityStore;
pub use logs::LogRepository;
pub use pool::DatabasePool;
pub use stats::StatsRepository;
