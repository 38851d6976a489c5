//! Admission gate — decides whether an intake event enters the pipeline.
//!
//! Runs before any payload download or hashing, so rejected events cost no
//! bandwidth. Order matters: an inactive source never consumes a random
//! draw, and the media-kind filter is checked before sampling.

use rand::Rng;
use tracing::debug;

use crate::settings::MediaFilter;
use crate::store::{Source, SourcePolicy};
use crate::transport::MediaKind;

/// Verdict of the admission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Source is configured but switched off.
    RejectedInactive,
    /// Media kind is not enabled by the active filter.
    RejectedKind,
    /// Lost the per-event probability draw.
    SampledOut,
    /// Accepted; route through human review.
    Manual,
    /// Accepted; schedule directly.
    Auto,
}

impl Admission {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::RejectedInactive => "rejected_inactive",
            Self::RejectedKind => "rejected_kind",
            Self::SampledOut => "sampled_out",
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Manual | Self::Auto)
    }
}

/// Evaluate one intake event against its source record and the active
/// media filter.
///
/// The sampling step is probabilistic admission control, not a threshold:
/// every event draws independently, so repeated content from a high-chance
/// source is still subject to a fresh draw each time.
pub fn admit<R: Rng>(
    kind: MediaKind,
    source: &Source,
    filter: MediaFilter,
    rng: &mut R,
) -> Admission {
    if source.policy == SourcePolicy::Inactive {
        return Admission::RejectedInactive;
    }

    if !filter.allows(kind) {
        return Admission::RejectedKind;
    }

    let draw: u8 = rng.gen_range(1..=100);
    if draw > source.chance {
        debug!(
            source = source.id,
            chance = source.chance,
            draw,
            "Sampled out"
        );
        return Admission::SampledOut;
    }

    match source.policy {
        SourcePolicy::Manual => Admission::Manual,
        SourcePolicy::Auto => Admission::Auto,
        SourcePolicy::Inactive => unreachable!("inactive rejected above"),
    }
}
