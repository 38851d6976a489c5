//! Human approval workflow — fan-out to reviewers, first resolution wins.
//!
//! A candidate entering review is shown to every subscribed reviewer; each
//! copy is tracked as one pending-review record. Whoever acts first claims
//! the whole record set by purging it — a zero-row purge means somebody
//! else already resolved the candidate, so concurrent decisions collapse
//! to one winner without explicit locking.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::pipeline::scheduler::{DeliveryOutcome, DeliveryScheduler};
use crate::store::{PendingReview, Store};
use crate::transport::{CandidateId, MediaRef, ReviewVerdict, ReviewerDecision, Transport};

/// What a resolution attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// Verdict was approve/approve-now; carries the delivery result.
    Approved(DeliveryOutcome),
    /// Verdict was reject; the media reference was discarded.
    Rejected,
    /// The record set was already purged by an earlier resolution.
    AlreadyResolved,
}

/// Tracks candidates under human review.
pub struct ReviewBoard {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    scheduler: Arc<DeliveryScheduler>,
}

impl ReviewBoard {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        scheduler: Arc<DeliveryScheduler>,
    ) -> Self {
        Self {
            store,
            transport,
            scheduler,
        }
    }

    /// Fan a candidate out to every subscribed reviewer.
    ///
    /// Returns the number of copies delivered. A failure to reach one
    /// reviewer is logged and does not block the others.
    pub async fn submit(
        &self,
        candidate: CandidateId,
        media: &MediaRef,
    ) -> Result<usize, PipelineError> {
        let reviewers = self.store.reviewers().await?;
        let mut delivered = 0;

        for reviewer in reviewers.iter().filter(|r| r.subscribed) {
            match self.transport.notify(reviewer.id, media, candidate).await {
                Ok(notification) => {
                    self.store
                        .insert_pending_review(&PendingReview {
                            candidate,
                            reviewer: reviewer.id,
                            notification,
                        })
                        .await?;
                    delivered += 1;
                }
                Err(e) => {
                    warn!(
                        reviewer = reviewer.id,
                        candidate = %candidate,
                        error = %e,
                        "Failed to deliver review copy"
                    );
                }
            }
        }

        if delivered == 0 {
            warn!(candidate = %candidate, "Candidate reached no reviewers");
        } else {
            info!(
                candidate = %candidate,
                copies = delivered,
                "Candidate sent for review"
            );
        }
        Ok(delivered)
    }

    /// Resolve a candidate. The first resolution claims the record set;
    /// later attempts return `AlreadyResolved` and touch nothing.
    pub async fn resolve(
        &self,
        decision: &ReviewerDecision,
    ) -> Result<ResolutionOutcome, PipelineError> {
        let candidate = decision.candidate;

        let copies = self.store.pending_reviews(candidate).await?;
        let purged = self.store.purge_pending_reviews(candidate).await?;
        if purged == 0 {
            debug!(candidate = %candidate, "Candidate already resolved, ignoring");
            return Ok(ResolutionOutcome::AlreadyResolved);
        }

        // This call owns the set now; withdraw every copy. One failed
        // retraction must not block the rest.
        for copy in &copies {
            if let Err(e) = self
                .transport
                .retract(copy.reviewer, copy.notification)
                .await
            {
                warn!(
                    reviewer = copy.reviewer,
                    notification = copy.notification,
                    error = %e,
                    "Failed to retract review copy"
                );
            }
        }

        info!(
            candidate = %candidate,
            reviewer = decision.reviewer,
            verdict = decision.verdict.label(),
            "Candidate resolved"
        );

        match decision.verdict {
            ReviewVerdict::Approve => {
                let outcome = self
                    .scheduler
                    .deliver(candidate.source, candidate.message, true)
                    .await?;
                Ok(ResolutionOutcome::Approved(outcome))
            }
            ReviewVerdict::ApproveNow => {
                let outcome = self
                    .scheduler
                    .deliver(candidate.source, candidate.message, false)
                    .await?;
                Ok(ResolutionOutcome::Approved(outcome))
            }
            ReviewVerdict::Reject => Ok(ResolutionOutcome::Rejected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::SettingsMirror;
    use crate::store::{LibSqlBackend, Reviewer};
    use crate::transport::testing::MockTransport;
    use crate::transport::{MediaKind, ReviewerId};
    use crate::watermark::PassThrough;

    struct Fixture {
        store: Arc<dyn Store>,
        transport: Arc<MockTransport>,
        board: ReviewBoard,
    }

    fn reviewer(id: ReviewerId, subscribed: bool) -> Reviewer {
        Reviewer {
            id,
            menu_cursor: None,
            subscribed,
            elevated: false,
        }
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        for r in [reviewer(1, true), reviewer(2, true), reviewer(3, false)] {
            store.insert_reviewer(&r).await.unwrap();
        }

        let settings = SettingsMirror::load(Arc::clone(&store)).await.unwrap();
        let transport = Arc::new(MockTransport::new());
        let scheduler = Arc::new(DeliveryScheduler::new(
            Arc::clone(&store),
            Arc::clone(&transport) as Arc<dyn Transport>,
            settings,
            Arc::new(PassThrough),
            "@target",
        ));
        let board = ReviewBoard::new(
            Arc::clone(&store),
            Arc::clone(&transport) as Arc<dyn Transport>,
            scheduler,
        );
        Fixture {
            store,
            transport,
            board,
        }
    }

    async fn submitted_candidate(fx: &Fixture) -> (CandidateId, MediaRef) {
        let candidate = CandidateId::new(7, 1000);
        fx.transport.put_media(7, 1000, MediaKind::Video, b"clip");
        let media = fx.transport.resolve_media(7, 1000).await.unwrap();
        fx.board.submit(candidate, &media).await.unwrap();
        (candidate, media)
    }

    fn decision(
        reviewer: ReviewerId,
        candidate: CandidateId,
        verdict: ReviewVerdict,
    ) -> ReviewerDecision {
        ReviewerDecision {
            reviewer,
            candidate,
            verdict,
        }
    }

    #[tokio::test]
    async fn submit_fans_out_to_subscribed_reviewers_only() {
        let fx = fixture().await;
        let (candidate, _) = submitted_candidate(&fx).await;

        let copies = fx.store.pending_reviews(candidate).await.unwrap();
        assert_eq!(copies.len(), 2);
        let reviewers: Vec<_> = copies.iter().map(|c| c.reviewer).collect();
        assert!(reviewers.contains(&1) && reviewers.contains(&2));
        // Distinct notification references per copy.
        assert_ne!(copies[0].notification, copies[1].notification);
    }

    #[tokio::test]
    async fn notify_failure_does_not_block_other_reviewers() {
        let fx = fixture().await;
        fx.transport.fail_notify_for(1);

        let candidate = CandidateId::new(7, 2000);
        fx.transport.put_media(7, 2000, MediaKind::Photo, b"pic");
        let media = fx.transport.resolve_media(7, 2000).await.unwrap();
        let delivered = fx.board.submit(candidate, &media).await.unwrap();

        assert_eq!(delivered, 1);
        let copies = fx.store.pending_reviews(candidate).await.unwrap();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].reviewer, 2);
    }

    #[tokio::test]
    async fn reject_retracts_all_copies_and_delivers_nothing() {
        let fx = fixture().await;
        let (candidate, _) = submitted_candidate(&fx).await;

        let outcome = fx
            .board
            .resolve(&decision(1, candidate, ReviewVerdict::Reject))
            .await
            .unwrap();
        assert_eq!(outcome, ResolutionOutcome::Rejected);

        assert_eq!(fx.transport.retractions.lock().unwrap().len(), 2);
        assert_eq!(fx.transport.sent_count(), 0);
        assert!(fx.store.pending_reviews(candidate).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn approve_schedules_with_jitter() {
        let fx = fixture().await;
        let (candidate, _) = submitted_candidate(&fx).await;

        let outcome = fx
            .board
            .resolve(&decision(2, candidate, ReviewVerdict::Approve))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ResolutionOutcome::Approved(DeliveryOutcome::Scheduled(_))
        ));

        let sends = fx.transport.sends.lock().unwrap();
        assert_eq!(sends.len(), 1);
        assert!(sends[0].schedule_at.is_some());
    }

    #[tokio::test]
    async fn approve_now_sends_immediately() {
        let fx = fixture().await;
        let (candidate, _) = submitted_candidate(&fx).await;

        let outcome = fx
            .board
            .resolve(&decision(1, candidate, ReviewVerdict::ApproveNow))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ResolutionOutcome::Approved(DeliveryOutcome::Sent)
        );

        let sends = fx.transport.sends.lock().unwrap();
        assert_eq!(sends.len(), 1);
        assert!(sends[0].schedule_at.is_none());
    }

    #[tokio::test]
    async fn second_resolution_is_a_noop() {
        let fx = fixture().await;
        let (candidate, _) = submitted_candidate(&fx).await;

        fx.board
            .resolve(&decision(1, candidate, ReviewVerdict::Reject))
            .await
            .unwrap();
        let retractions_after_first = fx.transport.retractions.lock().unwrap().len();

        // A racing second reviewer approves after the purge.
        let outcome = fx
            .board
            .resolve(&decision(2, candidate, ReviewVerdict::Approve))
            .await
            .unwrap();
        assert_eq!(outcome, ResolutionOutcome::AlreadyResolved);

        // Nothing delivered, nothing retracted a second time.
        assert_eq!(fx.transport.sent_count(), 0);
        assert_eq!(
            fx.transport.retractions.lock().unwrap().len(),
            retractions_after_first
        );
    }

    #[tokio::test]
    async fn retract_failure_does_not_block_purge_or_other_retractions() {
        let fx = fixture().await;
        let (candidate, _) = submitted_candidate(&fx).await;
        fx.transport.fail_retract_for(1);

        let outcome = fx
            .board
            .resolve(&decision(2, candidate, ReviewVerdict::Reject))
            .await
            .unwrap();
        assert_eq!(outcome, ResolutionOutcome::Rejected);

        // Reviewer 2's copy still came down and the set is gone.
        let retractions = fx.transport.retractions.lock().unwrap();
        assert_eq!(retractions.len(), 1);
        assert_eq!(retractions[0].0, 2);
        drop(retractions);
        assert!(fx.store.pending_reviews(candidate).await.unwrap().is_empty());
    }
}
