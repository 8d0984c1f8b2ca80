//! autopilot-state — persistence for the Autopilot control loop.
//!
//! The engine talks to storage only through the traits in [`repository`]:
//! policies, per-target control state, the append-only audit trail, and a
//! bounded snapshot history. [`StateStore`] implements all of them on top
//! of [redb](https://docs.rs/redb), on disk or in memory.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{target_id}:{sequence:020}`, `{target_id}:{timestamp:020}`)
//! keep records of one target adjacent and ordered, so per-target queries
//! are range scans.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod repository;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use repository::{
    AuditRepository, ControlRepository, PolicyRepository, Repository, SnapshotRepository,
};
pub use store::StateStore;
