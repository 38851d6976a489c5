//! Delivery scheduling — jittered sends with a durable overflow queue.
//!
//! The transport's native schedule queue is bounded. When it reports
//! capacity exhaustion the item is not dropped: its (source, message) pair
//! is persisted and resubmitted later, one entry per observed outgoing-send
//! confirmation, oldest first.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::settings::{Settings, SettingsMirror};
use crate::store::{OverflowEntry, Store};
use crate::transport::{
    MediaKind, MediaRef, MediaUpload, MessageId, SendOutcome, SourceId, Transport,
};
use crate::watermark::Watermarker;

/// What happened to a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handed to the transport with a future schedule time.
    Scheduled(DateTime<Utc>),
    /// Sent immediately.
    Sent,
    /// Schedule capacity exhausted; intent persisted to the overflow queue.
    Deferred,
    /// Upstream content is gone. Permanently abandoned.
    Lost,
    /// Transient failure (download/watermark/send). Dropped unless the
    /// caller re-enqueues.
    Failed,
}

/// Computes delivery times, talks to the transport, and owns the overflow
/// queue.
pub struct DeliveryScheduler {
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    settings: Arc<SettingsMirror>,
    watermarker: Arc<dyn Watermarker>,
    target: String,
}

impl DeliveryScheduler {
    pub fn new(
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        settings: Arc<SettingsMirror>,
        watermarker: Arc<dyn Watermarker>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            store,
            transport,
            settings,
            watermarker,
            target: target.into(),
        }
    }

    /// Deliver one item to the target channel, jittered or immediate.
    ///
    /// Transport failures never propagate: they resolve to `Lost` or
    /// `Failed` after logging. Only store failures return `Err`.
    pub async fn deliver(
        &self,
        source: SourceId,
        message: MessageId,
        jitter: bool,
    ) -> Result<DeliveryOutcome, PipelineError> {
        let media = match self.transport.resolve_media(source, message).await {
            Ok(media) => media,
            Err(e) if e.is_not_found() => {
                warn!(source, message, "Upstream content gone, abandoning item");
                return Ok(DeliveryOutcome::Lost);
            }
            Err(e) => {
                warn!(source, message, error = %e, "Media resolution failed, dropping item");
                return Ok(DeliveryOutcome::Failed);
            }
        };

        let settings = self.settings.snapshot().await;

        let upload = match self.prepare_upload(&media, &settings).await {
            Ok(upload) => upload,
            Err(e) => {
                warn!(source, message, error = %e, "Post-processing failed, dropping item");
                return Ok(DeliveryOutcome::Failed);
            }
        };

        let schedule_at = jitter.then(|| pick_schedule_time(&settings));

        match self
            .transport
            .send_or_schedule(&self.target, upload, &settings.caption, schedule_at)
            .await
        {
            Ok(SendOutcome::Delivered) => {
                self.store.bump_posts_taken(source).await?;
                match schedule_at {
                    Some(at) => {
                        info!(source, message, schedule_at = %at, "Mediafile scheduled");
                        Ok(DeliveryOutcome::Scheduled(at))
                    }
                    None => {
                        info!(source, message, "Mediafile sent instantly");
                        Ok(DeliveryOutcome::Sent)
                    }
                }
            }
            Ok(SendOutcome::CapacityExhausted) => {
                info!(
                    source,
                    message, "Schedule queue full, adding post to overflow instead"
                );
                self.store
                    .push_overflow(&OverflowEntry {
                        source,
                        message,
                        enqueued_at: Utc::now(),
                    })
                    .await?;
                Ok(DeliveryOutcome::Deferred)
            }
            Err(e) => {
                warn!(source, message, error = %e, "Send failed, dropping item");
                Ok(DeliveryOutcome::Failed)
            }
        }
    }

    /// Like [`deliver`](Self::deliver) with jitter, but a transient failure
    /// re-enqueues the item instead of dropping it. Collector mode uses
    /// this so delivery-time failures survive until the next drain.
    pub async fn deliver_or_defer(
        &self,
        source: SourceId,
        message: MessageId,
    ) -> Result<DeliveryOutcome, PipelineError> {
        match self.deliver(source, message, true).await? {
            DeliveryOutcome::Failed => {
                info!(source, message, "Re-enqueuing failed delivery");
                self.store
                    .push_overflow(&OverflowEntry {
                        source,
                        message,
                        enqueued_at: Utc::now(),
                    })
                    .await?;
                Ok(DeliveryOutcome::Deferred)
            }
            outcome => Ok(outcome),
        }
    }

    /// Resubmit the oldest deferred delivery, if any.
    ///
    /// Called when the transport reports an outgoing send in the target
    /// channel — a proxy signal that the schedule queue likely has room.
    pub async fn drain_overflow(&self) -> Result<Option<DeliveryOutcome>, PipelineError> {
        let Some(entry) = self.store.pop_oldest_overflow().await? else {
            debug!("No deferred deliveries to drain");
            return Ok(None);
        };
        info!(
            source = entry.source,
            message = entry.message,
            enqueued_at = %entry.enqueued_at,
            "Draining deferred delivery"
        );
        self.deliver(entry.source, entry.message, true)
            .await
            .map(Some)
    }

    /// Watermark photos when an overlay is configured; otherwise pass the
    /// transport-side reference through untouched.
    async fn prepare_upload(
        &self,
        media: &MediaRef,
        settings: &Settings,
    ) -> Result<MediaUpload, PipelineError> {
        let Some(watermark) = settings.watermark.as_deref() else {
            return Ok(MediaUpload::Ref(media.clone()));
        };
        if media.kind != MediaKind::Photo {
            return Ok(MediaUpload::Ref(media.clone()));
        }

        let payload = self.transport.download(media).await?;
        let stamped = self.watermarker.apply(payload, watermark).await?;
        Ok(MediaUpload::Bytes {
            data: stamped,
            kind: media.kind,
            file_name: media.kind.file_name().to_string(),
        })
    }
}

/// Now plus a uniform draw from the configured delay window.
fn pick_schedule_time(settings: &Settings) -> DateTime<Utc> {
    // Bounds are validated at write time; normalize anyway so a hand-edited
    // row cannot panic the draw.
    let lo = settings.bottom_delay.min(settings.top_delay);
    let hi = settings.bottom_delay.max(settings.top_delay);
    let minutes = rand::thread_rng().gen_range(lo..=hi);
    Utc::now() + Duration::minutes(minutes as i64)
}
