//! Intake listener — binds transport events to the pipeline.
//!
//! One logical loop consumes the event stream; each event is handled in
//! its own task so a slow download never stalls unrelated sources. No
//! handler failure terminates the loop.

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{PipelineError, StoreError};
use crate::pipeline::admission::{Admission, admit};
use crate::pipeline::dedup::{DedupIndex, content_hash};
use crate::pipeline::review::ReviewBoard;
use crate::pipeline::scheduler::DeliveryScheduler;
use crate::settings::SettingsMirror;
use crate::store::Store;
use crate::transport::{
    IntakeEvent, ReviewerDecision, SourceId, Transport, TransportEvent,
};

/// Cache of configured source ids for the fast membership check.
///
/// Refreshed from the store after every console mutation. Only membership
/// is trusted — policy and chance are re-read per event, so a stale cache
/// can at worst admit one lookup for a just-deleted source.
#[derive(Default)]
pub struct SourceCache {
    inner: RwLock<HashSet<SourceId>>,
}

impl SourceCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reload the membership set from the store.
    pub async fn refresh(&self, store: &dyn Store) -> Result<(), StoreError> {
        let ids: HashSet<SourceId> = store.sources().await?.iter().map(|s| s.id).collect();
        debug!(sources = ids.len(), "Source cache refreshed");
        *self.inner.write().await = ids;
        Ok(())
    }

    pub async fn contains(&self, id: SourceId) -> bool {
        self.inner.read().await.contains(&id)
    }
}

/// Routes transport events into admission, review, and scheduling.
pub struct IntakeListener {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    settings: Arc<SettingsMirror>,
    dedup: DedupIndex,
    review: Arc<ReviewBoard>,
    scheduler: Arc<DeliveryScheduler>,
    cache: Arc<SourceCache>,
}

impl IntakeListener {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        settings: Arc<SettingsMirror>,
        review: Arc<ReviewBoard>,
        scheduler: Arc<DeliveryScheduler>,
        cache: Arc<SourceCache>,
    ) -> Arc<Self> {
        let dedup = DedupIndex::new(Arc::clone(&store));
        Arc::new(Self {
            store,
            transport,
            settings,
            dedup,
            review,
            scheduler,
            cache,
        })
    }

    /// Consume the transport event stream until it closes.
    pub async fn run(self: Arc<Self>) -> Result<(), PipelineError> {
        self.cache.refresh(&*self.store).await?;
        let mut events = self.transport.events().await?;
        info!("Intake listener running");

        while let Some(event) = events.next().await {
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.handle_event(event).await;
            });
        }

        info!("Transport event stream closed");
        Ok(())
    }

    /// Handle one event. All failures are converted to log entries — no
    /// event may take the listener down.
    pub async fn handle_event(&self, event: TransportEvent) {
        let result = match event {
            TransportEvent::NewMedia(intake) => self.handle_media(intake).await,
            TransportEvent::OutgoingPosted => {
                self.scheduler.drain_overflow().await.map(|_| ())
            }
            TransportEvent::Decision(decision) => self.handle_decision(decision).await,
        };
        if let Err(e) = result {
            error!(error = %e, "Event handler failed");
        }
    }

    async fn handle_media(&self, intake: IntakeEvent) -> Result<(), PipelineError> {
        if !self.cache.contains(intake.source).await {
            return Ok(());
        }
        // The cache only answers membership; the store is the source of
        // truth for policy and chance.
        let Some(source) = self.store.source(intake.source).await? else {
            return Ok(());
        };

        let filter = self.settings.snapshot().await.media_filter;
        let verdict = admit(intake.kind, &source, filter, &mut rand::thread_rng());
        debug!(
            source = intake.source,
            message = intake.message,
            kind = intake.kind.label(),
            verdict = verdict.label(),
            "New mediafile"
        );
        if !verdict.is_accepted() {
            return Ok(());
        }

        // Only accepted events pay for the download and hash.
        let media = match self
            .transport
            .resolve_media(intake.source, intake.message)
            .await
        {
            Ok(media) => media,
            Err(e) if e.is_not_found() => {
                warn!(
                    source = intake.source,
                    message = intake.message,
                    "Mediafile vanished before intake"
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let payload = self.transport.download(&media).await?;
        let hash = content_hash(&payload);

        if self.dedup.seen(&hash).await? || !self.dedup.record(&hash).await? {
            info!(
                source = intake.source,
                message = intake.message,
                hash,
                "Skipping duplicate mediafile"
            );
            return Ok(());
        }

        match verdict {
            Admission::Manual => {
                self.review.submit(intake.candidate(), &media).await?;
            }
            Admission::Auto => {
                self.scheduler
                    .deliver(intake.source, intake.message, true)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn handle_decision(&self, decision: ReviewerDecision) -> Result<(), PipelineError> {
        if self.store.reviewer(decision.reviewer).await?.is_none() {
            warn!(
                reviewer = decision.reviewer,
                candidate = %decision.candidate,
                "Ignoring decision from unknown principal"
            );
            return Ok(());
        }
        self.review.resolve(&decision).await?;
        Ok(())
    }
}
