//! Persistence layer — libsql-backed storage behind the `Store` trait.

pub mod libsql_backend;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{OverflowEntry, PendingReview, Reviewer, Source, SourcePolicy, Store};
