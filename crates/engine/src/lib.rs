//! Digest coordination engine.
//!
//! [`coordinator::DigestCoordinator`] aggregates the events of a digest window
//! and propagates them to the sibling jobs of the same workflow run. Its
//! collaborators (job store, feature flags, audit log, legacy strategies) are
//! trait objects with Postgres/Redis and in-memory implementations.

pub mod aggregation;
pub mod audit;
pub mod coordinator;
pub mod error;
pub mod flags;
pub mod store;
pub mod strategy;

pub use coordinator::{DigestCoordinator, DigestOutcome};
pub use error::DigestError;
