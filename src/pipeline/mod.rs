//! The content admission and scheduling pipeline.
//!
//! Flow: transport event → admission gate → dedup → review fan-out (manual
//! sources) or direct scheduling (auto sources) → delivery, with a durable
//! overflow queue when the transport's schedule capacity is exhausted.

pub mod admission;
pub mod collector;
pub mod dedup;
pub mod listener;
pub mod review;
pub mod scheduler;

pub use admission::{Admission, admit};
pub use collector::Collector;
pub use dedup::{DedupIndex, content_hash};
pub use listener::{IntakeListener, SourceCache};
pub use review::{ResolutionOutcome, ReviewBoard};
pub use scheduler::{DeliveryOutcome, DeliveryScheduler};
