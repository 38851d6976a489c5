//! Transport abstraction — event intake and media delivery.
//!
//! The relay core never talks to a wire protocol directly. It consumes a
//! stream of [`TransportEvent`]s and calls back into the [`Transport`]
//! capability set for media resolution, delivery, and reviewer
//! notifications. `telegram` provides the production implementation.

pub mod telegram;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;

use crate::error::TransportError;

pub use telegram::TelegramTransport;

/// Transport-native id of an upstream source (chat/channel).
pub type SourceId = i64;
/// Transport-native id of a message within its chat.
pub type MessageId = i64;
/// Transport-native id of a reviewer principal (their private chat).
pub type ReviewerId = i64;
/// Transport-native id of a reviewer-visible notification message.
pub type NotificationId = i64;

/// Composite identity of an in-flight candidate: which message of which
/// source is under consideration. Also the wire identity embedded in
/// reviewer decision callbacks, rendered as `"{source}_{message}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CandidateId {
    pub source: SourceId,
    pub message: MessageId,
}

impl CandidateId {
    pub fn new(source: SourceId, message: MessageId) -> Self {
        Self { source, message }
    }

    /// Parse the `"{source}_{message}"` wire form.
    pub fn parse(s: &str) -> Option<Self> {
        let (source, message) = s.rsplit_once('_')?;
        Some(Self {
            source: source.parse().ok()?,
            message: message.parse().ok()?,
        })
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.source, self.message)
    }
}

/// Kind of media carried by an intake event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
        }
    }

    /// Default upload file name for in-memory payloads.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Photo => "file.png",
            Self::Video => "file.mp4",
        }
    }
}

/// Opaque reference to a media object held by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub file_id: String,
    pub kind: MediaKind,
}

/// Media handed to `send_or_schedule` — either a transport-side reference
/// (cheap server-side copy) or locally post-processed bytes.
#[derive(Debug, Clone)]
pub enum MediaUpload {
    Ref(MediaRef),
    Bytes {
        data: Vec<u8>,
        kind: MediaKind,
        file_name: String,
    },
}

impl MediaUpload {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Ref(media) => media.kind,
            Self::Bytes { kind, .. } => *kind,
        }
    }
}

/// A new media item observed in an upstream source.
#[derive(Debug, Clone)]
pub struct IntakeEvent {
    pub source: SourceId,
    pub message: MessageId,
    pub kind: MediaKind,
}

impl IntakeEvent {
    pub fn candidate(&self) -> CandidateId {
        CandidateId::new(self.source, self.message)
    }
}

/// A reviewer's verdict on a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewVerdict {
    /// Publish with jittered delay.
    Approve,
    /// Publish immediately.
    ApproveNow,
    /// Discard.
    Reject,
}

impl ReviewVerdict {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::ApproveNow => "approve_now",
            Self::Reject => "reject",
        }
    }
}

/// A decision event emitted when a reviewer acts on a notification.
#[derive(Debug, Clone)]
pub struct ReviewerDecision {
    pub reviewer: ReviewerId,
    pub candidate: CandidateId,
    pub verdict: ReviewVerdict,
}

/// Everything the transport can deliver to the relay core.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Media posted in an upstream chat.
    NewMedia(IntakeEvent),
    /// A message went out in the target channel — a proxy signal that the
    /// native schedule queue likely freed a slot.
    OutgoingPosted,
    /// A reviewer resolved a candidate.
    Decision(ReviewerDecision),
}

/// Outcome of a send/schedule call.
///
/// Capacity exhaustion is a designed backpressure signal, not an error:
/// the caller persists the intent and retries on a later drain trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    CapacityExhausted,
}

/// Stream of transport events consumed by the intake listener.
pub type EventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Transport capability set — pure I/O, no admission or scheduling logic.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the event stream. Called once per listener run.
    async fn events(&self) -> Result<EventStream, TransportError>;

    /// Resolve the media reference for a (source, message) pair.
    /// `NotFound` means the upstream content is gone; the item is lost.
    async fn resolve_media(
        &self,
        source: SourceId,
        message: MessageId,
    ) -> Result<MediaRef, TransportError>;

    /// Download the full media payload (for hashing and watermarking).
    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, TransportError>;

    /// Send media to the target channel, immediately or at `schedule_at`.
    async fn send_or_schedule(
        &self,
        target: &str,
        upload: MediaUpload,
        caption: &str,
        schedule_at: Option<DateTime<Utc>>,
    ) -> Result<SendOutcome, TransportError>;

    /// Show a candidate to a reviewer with approve/approve-now/reject
    /// actions. Returns the id of the notification message.
    async fn notify(
        &self,
        reviewer: ReviewerId,
        media: &MediaRef,
        candidate: CandidateId,
    ) -> Result<NotificationId, TransportError>;

    /// Withdraw a previously delivered reviewer notification.
    async fn retract(
        &self,
        reviewer: ReviewerId,
        notification: NotificationId,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory transport for unit tests.

    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;

    /// One recorded `send_or_schedule` call.
    #[derive(Debug, Clone)]
    pub struct SentRecord {
        pub target: String,
        pub kind: MediaKind,
        pub caption: String,
        pub schedule_at: Option<DateTime<Utc>>,
        /// True when the media arrived as re-uploaded bytes rather than a
        /// transport-side reference.
        pub uploaded_bytes: bool,
    }

    /// Scripted transport: media registered up front, all outgoing calls
    /// recorded, capacity and retraction failures injectable.
    #[derive(Default)]
    pub struct MockTransport {
        media: Mutex<HashMap<(SourceId, MessageId), MediaRef>>,
        payloads: Mutex<HashMap<String, Vec<u8>>>,
        pub sends: Mutex<Vec<SentRecord>>,
        pub notifications: Mutex<Vec<(ReviewerId, CandidateId, NotificationId)>>,
        pub retractions: Mutex<Vec<(ReviewerId, NotificationId)>>,
        /// Remaining sends before `CapacityExhausted`. `None` = unlimited.
        pub capacity: Mutex<Option<u32>>,
        /// When set, every send fails with a transient error.
        pub fail_sends: Mutex<bool>,
        pub failing_retracts: Mutex<HashSet<ReviewerId>>,
        pub failing_notifies: Mutex<HashSet<ReviewerId>>,
        scripted_events: Mutex<Vec<TransportEvent>>,
        next_notification: AtomicI64,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                next_notification: AtomicI64::new(1),
                ..Self::default()
            }
        }

        /// Register a resolvable media item with its payload.
        pub fn put_media(&self, source: SourceId, message: MessageId, kind: MediaKind, payload: &[u8]) {
            let file_id = format!("file-{source}-{message}");
            self.media
                .lock()
                .unwrap()
                .insert((source, message), MediaRef { file_id: file_id.clone(), kind });
            self.payloads.lock().unwrap().insert(file_id, payload.to_vec());
        }

        pub fn set_capacity(&self, left: u32) {
            *self.capacity.lock().unwrap() = Some(left);
        }

        pub fn fail_retract_for(&self, reviewer: ReviewerId) {
            self.failing_retracts.lock().unwrap().insert(reviewer);
        }

        pub fn fail_notify_for(&self, reviewer: ReviewerId) {
            self.failing_notifies.lock().unwrap().insert(reviewer);
        }

        pub fn script_events(&self, events: Vec<TransportEvent>) {
            *self.scripted_events.lock().unwrap() = events;
        }

        pub fn sent_count(&self) -> usize {
            self.sends.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn events(&self) -> Result<EventStream, TransportError> {
            let events = std::mem::take(&mut *self.scripted_events.lock().unwrap());
            Ok(Box::pin(futures::stream::iter(events)))
        }

        async fn resolve_media(
            &self,
            source: SourceId,
            message: MessageId,
        ) -> Result<MediaRef, TransportError> {
            self.media
                .lock()
                .unwrap()
                .get(&(source, message))
                .cloned()
                .ok_or(TransportError::NotFound { source_id: source, message })
        }

        async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, TransportError> {
            self.payloads
                .lock()
                .unwrap()
                .get(&media.file_id)
                .cloned()
                .ok_or_else(|| TransportError::Api {
                    method: "download".into(),
                    detail: format!("no payload for {}", media.file_id),
                })
        }

        async fn send_or_schedule(
            &self,
            target: &str,
            upload: MediaUpload,
            caption: &str,
            schedule_at: Option<DateTime<Utc>>,
        ) -> Result<SendOutcome, TransportError> {
            if *self.fail_sends.lock().unwrap() {
                return Err(TransportError::Api {
                    method: "send".into(),
                    detail: "scripted failure".into(),
                });
            }
            let mut capacity = self.capacity.lock().unwrap();
            if let Some(left) = capacity.as_mut() {
                if *left == 0 {
                    return Ok(SendOutcome::CapacityExhausted);
                }
                *left -= 1;
            }
            self.sends.lock().unwrap().push(SentRecord {
                target: target.to_string(),
                kind: upload.kind(),
                caption: caption.to_string(),
                schedule_at,
                uploaded_bytes: matches!(upload, MediaUpload::Bytes { .. }),
            });
            Ok(SendOutcome::Delivered)
        }

        async fn notify(
            &self,
            reviewer: ReviewerId,
            _media: &MediaRef,
            candidate: CandidateId,
        ) -> Result<NotificationId, TransportError> {
            if self.failing_notifies.lock().unwrap().contains(&reviewer) {
                return Err(TransportError::Api {
                    method: "notify".into(),
                    detail: "scripted failure".into(),
                });
            }
            let id = self.next_notification.fetch_add(1, Ordering::SeqCst);
            self.notifications
                .lock()
                .unwrap()
                .push((reviewer, candidate, id));
            Ok(id)
        }

        async fn retract(
            &self,
            reviewer: ReviewerId,
            notification: NotificationId,
        ) -> Result<(), TransportError> {
            if self.failing_retracts.lock().unwrap().contains(&reviewer) {
                return Err(TransportError::Api {
                    method: "retract".into(),
                    detail: "scripted failure".into(),
                });
            }
            self.retractions
                .lock()
                .unwrap()
                .push((reviewer, notification));
            Ok(())
        }
    }
}
