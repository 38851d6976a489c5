//! Collector mode — single-source relay without review or dedup.
//!
//! Watches one upstream channel and reschedules everything the kind filter
//! and chance gate admit. Delivery-time failures are deferred into the same
//! durable overflow queue the processor uses, drained one item per observed
//! outgoing-send confirmation.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, error, info};

use crate::error::PipelineError;
use crate::pipeline::admission::admit;
use crate::pipeline::scheduler::DeliveryScheduler;
use crate::settings::SettingsMirror;
use crate::store::{Source, SourcePolicy};
use crate::transport::{IntakeEvent, SourceId, Transport, TransportEvent};

/// Single-source collector loop.
pub struct Collector {
    transport: Arc<dyn Transport>,
    settings: Arc<SettingsMirror>,
    scheduler: Arc<DeliveryScheduler>,
    /// Synthetic auto source carrying the configured chance; collector mode
    /// has no source table.
    source: Source,
}

impl Collector {
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: Arc<SettingsMirror>,
        scheduler: Arc<DeliveryScheduler>,
        source: SourceId,
        chance: u8,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            settings,
            scheduler,
            source: Source {
                id: source,
                policy: SourcePolicy::Auto,
                chance: chance.clamp(1, 100),
                posts_taken: 0,
            },
        })
    }

    /// Consume the transport event stream until it closes.
    pub async fn run(self: Arc<Self>) -> Result<(), PipelineError> {
        let mut events = self.transport.events().await?;
        info!(source = self.source.id, "Collector running");

        while let Some(event) = events.next().await {
            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.handle_event(event).await;
            });
        }

        info!("Transport event stream closed");
        Ok(())
    }

    /// Handle one event; failures are logged, never propagated.
    pub async fn handle_event(&self, event: TransportEvent) {
        let result = match event {
            TransportEvent::NewMedia(intake) if intake.source == self.source.id => {
                self.handle_media(intake).await
            }
            TransportEvent::OutgoingPosted => {
                self.scheduler.drain_overflow().await.map(|_| ())
            }
            _ => Ok(()),
        };
        if let Err(e) = result {
            error!(error = %e, "Collector handler failed");
        }
    }

    async fn handle_media(&self, intake: IntakeEvent) -> Result<(), PipelineError> {
        let filter = self.settings.snapshot().await.media_filter;
        let verdict = admit(intake.kind, &self.source, filter, &mut rand::thread_rng());
        debug!(
            message = intake.message,
            kind = intake.kind.label(),
            verdict = verdict.label(),
            "New mediafile"
        );
        if !verdict.is_accepted() {
            return Ok(());
        }

        self.scheduler
            .deliver_or_defer(intake.source, intake.message)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MediaFilter;
    use crate::store::{LibSqlBackend, Store};
    use crate::transport::testing::MockTransport;
    use crate::transport::MediaKind;
    use crate::watermark::PassThrough;

    struct Fixture {
        store: Arc<dyn Store>,
        transport: Arc<MockTransport>,
        settings: Arc<SettingsMirror>,
        collector: Arc<Collector>,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let settings = SettingsMirror::load(Arc::clone(&store)).await.unwrap();
        let transport = Arc::new(MockTransport::new());
        let scheduler = Arc::new(DeliveryScheduler::new(
            Arc::clone(&store),
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&settings),
            Arc::new(PassThrough),
            "@target",
        ));
        let collector = Collector::new(
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::clone(&settings),
            scheduler,
            42,
            100,
        );
        Fixture {
            store,
            transport,
            settings,
            collector,
        }
    }

    fn media_event(source: i64, message: i64, kind: MediaKind) -> TransportEvent {
        TransportEvent::NewMedia(IntakeEvent {
            source,
            message,
            kind,
        })
    }

    #[tokio::test]
    async fn accepted_item_is_scheduled() {
        let fx = fixture().await;
        fx.transport.put_media(42, 1, MediaKind::Photo, b"pic");

        fx.collector
            .handle_event(media_event(42, 1, MediaKind::Photo))
            .await;

        let sends = fx.transport.sends.lock().unwrap();
        assert_eq!(sends.len(), 1);
        assert!(sends[0].schedule_at.is_some());
    }

    #[tokio::test]
    async fn foreign_source_is_ignored() {
        let fx = fixture().await;
        fx.transport.put_media(43, 1, MediaKind::Photo, b"pic");

        fx.collector
            .handle_event(media_event(43, 1, MediaKind::Photo))
            .await;

        assert_eq!(fx.transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn kind_filter_applies() {
        let fx = fixture().await;
        fx.settings.set_media_filter(MediaFilter::Photos).await.unwrap();
        fx.transport.put_media(42, 1, MediaKind::Video, b"vid");

        fx.collector
            .handle_event(media_event(42, 1, MediaKind::Video))
            .await;

        assert_eq!(fx.transport.sent_count(), 0);
    }

    #[tokio::test]
    async fn failed_delivery_defers_and_drains_on_confirmation() {
        let fx = fixture().await;
        fx.transport.put_media(42, 1, MediaKind::Photo, b"pic");
        *fx.transport.fail_sends.lock().unwrap() = true;

        fx.collector
            .handle_event(media_event(42, 1, MediaKind::Photo))
            .await;
        assert_eq!(fx.transport.sent_count(), 0);

        // The item survived as a durable overflow entry.
        {
            let entry = fx.store.pop_oldest_overflow().await.unwrap().unwrap();
            assert_eq!((entry.source, entry.message), (42, 1));
            // Put it back for the drain below.
            fx.store.push_overflow(&entry).await.unwrap();
        }

        *fx.transport.fail_sends.lock().unwrap() = false;
        fx.collector
            .handle_event(TransportEvent::OutgoingPosted)
            .await;

        assert_eq!(fx.transport.sent_count(), 1);
        assert!(fx.store.pop_oldest_overflow().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn capacity_exhaustion_defers_like_processor_mode() {
        let fx = fixture().await;
        fx.transport.put_media(42, 2, MediaKind::Photo, b"pic2");
        fx.transport.set_capacity(0);

        fx.collector
            .handle_event(media_event(42, 2, MediaKind::Photo))
            .await;

        let entry = fx.store.pop_oldest_overflow().await.unwrap().unwrap();
        assert_eq!((entry.source, entry.message), (42, 2));
    }
}
