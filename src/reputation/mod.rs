//! Origin reputation checking.
//!
//! Classifies network origins (known proxy / VPN exits get suppressed)
//! through an external lookup service, with a TTL cache in the identity
//! store, a bounded concurrency budget and a FIFO backlog for overflow.

mod checker;

pub use checker::{
    HttpReputationLookup, ReputationChecker, ReputationLookup, StaticLookup,
};
