//! The `Store` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::transport::{CandidateId, MessageId, NotificationId, ReviewerId, SourceId};

/// Per-source admission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePolicy {
    /// Source is configured but nothing is admitted.
    Inactive,
    /// Admitted items go through human review.
    Manual,
    /// Admitted items are scheduled directly.
    Auto,
}

impl SourcePolicy {
    /// Stored wire value (0/1/2).
    pub fn as_i64(&self) -> i64 {
        match self {
            Self::Inactive => 0,
            Self::Manual => 1,
            Self::Auto => 2,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => Self::Manual,
            2 => Self::Auto,
            _ => Self::Inactive,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }
}

/// An upstream origin whose media is candidate content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub id: SourceId,
    pub policy: SourcePolicy,
    /// Acceptance chance in percent, 1..=100.
    pub chance: u8,
    /// Cumulative accepted-post counter. Never decreases.
    pub posts_taken: u64,
}

/// A principal entitled to approve or reject candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reviewer {
    pub id: ReviewerId,
    /// Console-owned interaction cursor (the pinned menu message).
    pub menu_cursor: Option<i64>,
    /// Receives candidates for review.
    pub subscribed: bool,
    /// May mutate sources, reviewers, and settings.
    pub elevated: bool,
}

/// One fan-out record per (candidate, subscribed reviewer) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReview {
    pub candidate: CandidateId,
    pub reviewer: ReviewerId,
    pub notification: NotificationId,
}

/// A delivery deferred because the transport's schedule queue was full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverflowEntry {
    pub source: SourceId,
    pub message: MessageId,
    pub enqueued_at: DateTime<Utc>,
}

/// Backend-agnostic persistence trait covering sources, reviewers,
/// settings, pending reviews, the overflow queue, and seen hashes.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Sources ─────────────────────────────────────────────────────

    async fn insert_source(&self, source: &Source) -> Result<(), StoreError>;

    async fn delete_source(&self, id: SourceId) -> Result<(), StoreError>;

    async fn source(&self, id: SourceId) -> Result<Option<Source>, StoreError>;

    async fn sources(&self) -> Result<Vec<Source>, StoreError>;

    async fn update_source_policy(
        &self,
        id: SourceId,
        policy: SourcePolicy,
    ) -> Result<(), StoreError>;

    async fn update_source_chance(&self, id: SourceId, chance: u8) -> Result<(), StoreError>;

    /// Increment the accepted-post counter by one.
    async fn bump_posts_taken(&self, id: SourceId) -> Result<(), StoreError>;

    // ── Reviewers ───────────────────────────────────────────────────

    async fn insert_reviewer(&self, reviewer: &Reviewer) -> Result<(), StoreError>;

    async fn delete_reviewer(&self, id: ReviewerId) -> Result<(), StoreError>;

    async fn reviewer(&self, id: ReviewerId) -> Result<Option<Reviewer>, StoreError>;

    async fn reviewers(&self) -> Result<Vec<Reviewer>, StoreError>;

    async fn update_menu_cursor(
        &self,
        id: ReviewerId,
        cursor: Option<i64>,
    ) -> Result<(), StoreError>;

    async fn update_subscribed(&self, id: ReviewerId, subscribed: bool) -> Result<(), StoreError>;

    async fn update_elevated(&self, id: ReviewerId, elevated: bool) -> Result<(), StoreError>;

    // ── Settings ────────────────────────────────────────────────────

    async fn setting(&self, name: &str) -> Result<Option<String>, StoreError>;

    /// Insert-or-update a setting value.
    async fn put_setting(&self, name: &str, value: &str) -> Result<(), StoreError>;

    // ── Pending reviews ─────────────────────────────────────────────

    async fn insert_pending_review(&self, review: &PendingReview) -> Result<(), StoreError>;

    async fn pending_reviews(
        &self,
        candidate: CandidateId,
    ) -> Result<Vec<PendingReview>, StoreError>;

    /// Delete every record for the candidate. Returns how many were
    /// deleted — zero means another resolution already claimed the set.
    async fn purge_pending_reviews(&self, candidate: CandidateId) -> Result<usize, StoreError>;

    // ── Overflow queue ──────────────────────────────────────────────

    async fn push_overflow(&self, entry: &OverflowEntry) -> Result<(), StoreError>;

    /// Remove and return the oldest entry by enqueue time, if any.
    async fn pop_oldest_overflow(&self) -> Result<Option<OverflowEntry>, StoreError>;

    /// Cascade removal when a source is deleted. Returns entries removed.
    async fn delete_overflow_for_source(&self, id: SourceId) -> Result<usize, StoreError>;

    // ── Seen hashes ─────────────────────────────────────────────────

    /// Register a content hash. Returns `false` when the hash was already
    /// present — the unique-constraint conflict doubles as an atomic
    /// "already seen" signal.
    async fn record_hash(
        &self,
        hash: &str,
        first_seen: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn hash_seen(&self, hash: &str) -> Result<bool, StoreError>;

    async fn delete_hash(&self, hash: &str) -> Result<(), StoreError>;
}
