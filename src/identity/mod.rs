//! Identity reconciliation core.
//!
//! The durable side ([`store`]) persists (player, voice) pairings; the
//! live side ([`reconciler`]) binds sessions to them and keeps the two
//! consistent as evidence changes.

mod reconciler;
mod store;
mod user;

pub use reconciler::{IdentityReconciler, SessionChange, UserAction};
pub use store::{
    IdentityStore, MemoryIdentityStore, OriginCheck, PlayerAccount, UserRecord, VoiceAccount,
};
pub use user::{GameSessionState, LiveUser, PlayerRef, UserSnapshot, VoiceRef, VoiceSessionState};
