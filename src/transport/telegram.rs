//! Telegram transport — long-polls the Bot API for updates.
//!
//! Maps raw updates onto the relay's event model: media posts in watched
//! chats become intake events, posts in the target channel become
//! outgoing-send confirmations, and inline-keyboard callbacks become
//! reviewer decisions.
//!
//! The Bot API cannot re-fetch arbitrary messages, so `resolve_media` is
//! served from a bounded cache of recently observed (chat, message) →
//! file-id mappings; a miss reports the content as lost, which is exactly
//! the abandon path the pipeline takes for deleted upstream posts.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::{
    CandidateId, EventStream, IntakeEvent, MediaKind, MediaRef, MediaUpload, MessageId,
    NotificationId, ReviewVerdict, ReviewerDecision, ReviewerId, SendOutcome, SourceId, Transport,
    TransportEvent,
};

/// How many (chat, message) → media mappings to keep for resolution.
const REF_CACHE_CAPACITY: usize = 4096;

/// Long-poll timeout in seconds.
const POLL_TIMEOUT_SECS: u32 = 30;

/// Bounded FIFO map of recently observed media references.
struct RefCache {
    map: HashMap<(SourceId, MessageId), MediaRef>,
    order: VecDeque<(SourceId, MessageId)>,
}

impl RefCache {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, key: (SourceId, MessageId), media: MediaRef) {
        if self.map.insert(key, media).is_none() {
            self.order.push_back(key);
            while self.order.len() > REF_CACHE_CAPACITY {
                if let Some(evicted) = self.order.pop_front() {
                    self.map.remove(&evicted);
                }
            }
        }
    }

    fn get(&self, key: &(SourceId, MessageId)) -> Option<MediaRef> {
        self.map.get(key).cloned()
    }
}

/// Telegram transport — connects to the Bot API via long-polling.
pub struct TelegramTransport {
    bot_token: SecretString,
    target_channel: String,
    client: reqwest::Client,
    ref_cache: Arc<Mutex<RefCache>>,
}

impl TelegramTransport {
    pub fn new(bot_token: SecretString, target_channel: impl Into<String>) -> Self {
        Self {
            bot_token,
            target_channel: target_channel.into(),
            client: reqwest::Client::new(),
            ref_cache: Arc::new(Mutex::new(RefCache::new())),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{method}",
            self.bot_token.expose_secret()
        )
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "https://api.telegram.org/file/bot{}/{file_path}",
            self.bot_token.expose_secret()
        )
    }

    /// POST a JSON method call and unwrap the Bot API envelope.
    async fn call(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let envelope: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        unwrap_envelope(method, envelope)
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn events(&self) -> Result<EventStream, TransportError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let client = self.client.clone();
        let url = self.api_url("getUpdates");
        let answer_url = self.api_url("answerCallbackQuery");
        let target = self.target_channel.clone();
        let ref_cache = Arc::clone(&self.ref_cache);

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            info!("Telegram transport listening for updates...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "channel_post", "callback_query"],
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: serde_json::Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("Telegram parse error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let Some(updates) = data.get("result").and_then(serde_json::Value::as_array)
                else {
                    continue;
                };

                for update in updates {
                    if let Some(uid) = update.get("update_id").and_then(serde_json::Value::as_i64)
                    {
                        offset = uid + 1;
                    }

                    // Acknowledge callbacks so reviewer clients stop spinning.
                    if let Some(callback_id) = update
                        .pointer("/callback_query/id")
                        .and_then(serde_json::Value::as_str)
                    {
                        let ack = serde_json::json!({ "callback_query_id": callback_id });
                        let _ = client.post(&answer_url).json(&ack).send().await;
                    }

                    let Some(event) = map_update(update, &target) else {
                        continue;
                    };

                    // Keep the resolution cache current for intake events.
                    if let MappedUpdate::Intake(ref intake, ref media) = event {
                        ref_cache
                            .lock()
                            .unwrap()
                            .insert((intake.source, intake.message), media.clone());
                    }

                    if tx.send(event.into_event()).is_err() {
                        info!("Telegram event receiver closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(Box::pin(stream))
    }

    async fn resolve_media(
        &self,
        source: SourceId,
        message: MessageId,
    ) -> Result<MediaRef, TransportError> {
        self.ref_cache
            .lock()
            .unwrap()
            .get(&(source, message))
            .ok_or(TransportError::NotFound { source_id: source, message })
    }

    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, TransportError> {
        let result = self
            .call(
                "getFile",
                &serde_json::json!({ "file_id": media.file_id }),
            )
            .await?;
        let file_path = result
            .get("file_path")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| TransportError::Api {
                method: "getFile".into(),
                detail: "response missing file_path".into(),
            })?;

        let resp = self
            .client
            .get(self.file_url(file_path))
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(TransportError::Api {
                method: "getFile".into(),
                detail: format!("file download returned {}", resp.status()),
            });
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn send_or_schedule(
        &self,
        target: &str,
        upload: MediaUpload,
        caption: &str,
        schedule_at: Option<DateTime<Utc>>,
    ) -> Result<SendOutcome, TransportError> {
        let method = match upload.kind() {
            MediaKind::Photo => "sendPhoto",
            MediaKind::Video => "sendVideo",
        };
        let media_field = match upload.kind() {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
        };

        let result = match upload {
            MediaUpload::Ref(media) => {
                let mut body = serde_json::json!({
                    "chat_id": target,
                    media_field: media.file_id,
                });
                if !caption.is_empty() {
                    body["caption"] = serde_json::Value::String(caption.to_string());
                    body["parse_mode"] = serde_json::Value::String("HTML".into());
                }
                if let Some(at) = schedule_at {
                    body["schedule_date"] = serde_json::Value::from(at.timestamp());
                }
                self.call(method, &body).await
            }
            MediaUpload::Bytes {
                data,
                file_name,
                ..
            } => {
                let part = Part::bytes(data).file_name(file_name);
                let mut form = Form::new()
                    .text("chat_id", target.to_string())
                    .part(media_field, part);
                if !caption.is_empty() {
                    form = form
                        .text("caption", caption.to_string())
                        .text("parse_mode", "HTML");
                }
                if let Some(at) = schedule_at {
                    form = form.text("schedule_date", at.timestamp().to_string());
                }

                let resp = self
                    .client
                    .post(self.api_url(method))
                    .multipart(form)
                    .send()
                    .await
                    .map_err(|e| TransportError::Http(e.to_string()))?;
                let envelope: serde_json::Value = resp
                    .json()
                    .await
                    .map_err(|e| TransportError::Http(e.to_string()))?;
                unwrap_envelope(method, envelope)
            }
        };

        match result {
            Ok(_) => {
                debug!(target, method, scheduled = schedule_at.is_some(), "Media sent");
                Ok(SendOutcome::Delivered)
            }
            Err(TransportError::Api { detail, .. }) if is_capacity_exhausted(&detail) => {
                Ok(SendOutcome::CapacityExhausted)
            }
            Err(e) => Err(e),
        }
    }

    async fn notify(
        &self,
        reviewer: ReviewerId,
        media: &MediaRef,
        candidate: CandidateId,
    ) -> Result<NotificationId, TransportError> {
        let (method, media_field) = match media.kind {
            MediaKind::Photo => ("sendPhoto", "photo"),
            MediaKind::Video => ("sendVideo", "video"),
        };
        let body = serde_json::json!({
            "chat_id": reviewer,
            media_field: media.file_id,
            "reply_markup": {
                "inline_keyboard": [
                    [{ "text": "Approve", "callback_data": format!("approve_{candidate}") }],
                    [{ "text": "Approve instantly",
                       "callback_data": format!("approve_instantly_{candidate}") }],
                    [{ "text": "Reject", "callback_data": format!("reject_{candidate}") }],
                ],
            },
        });

        let result = self.call(method, &body).await?;
        result
            .get("message_id")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| TransportError::Api {
                method: method.into(),
                detail: "response missing message_id".into(),
            })
    }

    async fn retract(
        &self,
        reviewer: ReviewerId,
        notification: NotificationId,
    ) -> Result<(), TransportError> {
        self.call(
            "deleteMessage",
            &serde_json::json!({
                "chat_id": reviewer,
                "message_id": notification,
            }),
        )
        .await?;
        Ok(())
    }
}

// ── Update mapping helpers ──────────────────────────────────────────

/// An update decoded far enough to route; intake carries the media ref so
/// the poll loop can feed the resolution cache.
enum MappedUpdate {
    Intake(IntakeEvent, MediaRef),
    Outgoing,
    Decision(ReviewerDecision),
}

impl MappedUpdate {
    fn into_event(self) -> TransportEvent {
        match self {
            Self::Intake(intake, _) => TransportEvent::NewMedia(intake),
            Self::Outgoing => TransportEvent::OutgoingPosted,
            Self::Decision(decision) => TransportEvent::Decision(decision),
        }
    }
}

/// Decode one raw update into a relay event, or `None` for chatter the
/// relay does not care about.
fn map_update(update: &serde_json::Value, target: &str) -> Option<MappedUpdate> {
    if let Some(callback) = update.get("callback_query") {
        let reviewer = callback.pointer("/from/id")?.as_i64()?;
        let data = callback.get("data")?.as_str()?;
        let (verdict, candidate) = parse_callback_data(data)?;
        return Some(MappedUpdate::Decision(ReviewerDecision {
            reviewer,
            candidate,
            verdict,
        }));
    }

    let message = update.get("message").or_else(|| update.get("channel_post"))?;
    let chat = message.get("chat")?;

    if chat_matches(chat, target) {
        return Some(MappedUpdate::Outgoing);
    }

    let source = chat.get("id")?.as_i64()?;
    let message_id = message.get("message_id")?.as_i64()?;
    let media = media_from_message(message)?;
    Some(MappedUpdate::Intake(
        IntakeEvent {
            source,
            message: message_id,
            kind: media.kind,
        },
        media,
    ))
}

/// Extract the media reference from a message, if it carries one.
/// Photos arrive as a size ladder; the last entry is the largest.
fn media_from_message(message: &serde_json::Value) -> Option<MediaRef> {
    if let Some(sizes) = message.get("photo").and_then(serde_json::Value::as_array) {
        let file_id = sizes.last()?.get("file_id")?.as_str()?;
        return Some(MediaRef {
            file_id: file_id.to_string(),
            kind: MediaKind::Photo,
        });
    }
    if let Some(file_id) = message.pointer("/video/file_id").and_then(|v| v.as_str()) {
        return Some(MediaRef {
            file_id: file_id.to_string(),
            kind: MediaKind::Video,
        });
    }
    None
}

/// Parse reviewer callback data: `approve_…`, `approve_instantly_…`,
/// `reject_…`, each followed by the candidate's `{source}_{message}` pair.
fn parse_callback_data(data: &str) -> Option<(ReviewVerdict, CandidateId)> {
    let re = Regex::new(r"^(approve_instantly|approve|reject)_(-?\d+_\d+)$").unwrap();
    let captures = re.captures(data)?;
    let verdict = match &captures[1] {
        "approve" => ReviewVerdict::Approve,
        "approve_instantly" => ReviewVerdict::ApproveNow,
        "reject" => ReviewVerdict::Reject,
        _ => return None,
    };
    let candidate = CandidateId::parse(&captures[2])?;
    Some((verdict, candidate))
}

/// Does this chat object refer to the configured target channel?
/// The target may be a numeric id or an @username.
fn chat_matches(chat: &serde_json::Value, target: &str) -> bool {
    if let Some(id) = chat.get("id").and_then(serde_json::Value::as_i64) {
        if id.to_string() == target {
            return true;
        }
    }
    if let Some(username) = chat.get("username").and_then(serde_json::Value::as_str) {
        if username == target.trim_start_matches('@') {
            return true;
        }
    }
    false
}

/// Does an API rejection mean the native schedule queue is full?
fn is_capacity_exhausted(detail: &str) -> bool {
    let lower = detail.to_lowercase();
    lower.contains("schedule_too_much") || lower.contains("too many scheduled")
}

fn unwrap_envelope(
    method: &str,
    envelope: serde_json::Value,
) -> Result<serde_json::Value, TransportError> {
    if envelope.get("ok").and_then(serde_json::Value::as_bool) == Some(true) {
        return Ok(envelope.get("result").cloned().unwrap_or(serde_json::Value::Null));
    }
    let detail = envelope
        .get("description")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    Err(TransportError::Api {
        method: method.into(),
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn api_url_embeds_token() {
        let transport = TelegramTransport::new(SecretString::from("123:ABC"), "@pics");
        assert_eq!(
            transport.api_url("getMe"),
            "https://api.telegram.org/bot123:ABC/getMe"
        );
    }

    #[test]
    fn callback_data_parses_all_verdicts() {
        assert_eq!(
            parse_callback_data("approve_-100123_42"),
            Some((ReviewVerdict::Approve, CandidateId::new(-100123, 42)))
        );
        assert_eq!(
            parse_callback_data("approve_instantly_-100123_42"),
            Some((ReviewVerdict::ApproveNow, CandidateId::new(-100123, 42)))
        );
        assert_eq!(
            parse_callback_data("reject_7_9"),
            Some((ReviewVerdict::Reject, CandidateId::new(7, 9)))
        );
    }

    #[test]
    fn callback_data_rejects_console_buttons() {
        assert_eq!(parse_callback_data("manage_sources"), None);
        assert_eq!(parse_callback_data("approve_"), None);
        assert_eq!(parse_callback_data("approve_1"), None);
        assert_eq!(parse_callback_data("approve_1_2_3"), None);
    }

    #[test]
    fn photo_message_maps_to_intake() {
        let update = json!({
            "update_id": 1,
            "channel_post": {
                "message_id": 55,
                "chat": { "id": -100777, "type": "channel" },
                "photo": [
                    { "file_id": "small", "width": 90 },
                    { "file_id": "large", "width": 1280 },
                ],
            },
        });

        let Some(MappedUpdate::Intake(intake, media)) = map_update(&update, "@pics") else {
            panic!("expected intake event");
        };
        assert_eq!(intake.source, -100777);
        assert_eq!(intake.message, 55);
        assert_eq!(intake.kind, MediaKind::Photo);
        assert_eq!(media.file_id, "large");
    }

    #[test]
    fn video_message_maps_to_intake() {
        let update = json!({
            "update_id": 2,
            "message": {
                "message_id": 7,
                "chat": { "id": 555, "type": "group" },
                "video": { "file_id": "vid-1" },
            },
        });

        let Some(MappedUpdate::Intake(intake, media)) = map_update(&update, "@pics") else {
            panic!("expected intake event");
        };
        assert_eq!(intake.kind, MediaKind::Video);
        assert_eq!(media.file_id, "vid-1");
    }

    #[test]
    fn text_message_is_ignored() {
        let update = json!({
            "update_id": 3,
            "message": {
                "message_id": 8,
                "chat": { "id": 555 },
                "text": "hello",
            },
        });
        assert!(map_update(&update, "@pics").is_none());
    }

    #[test]
    fn target_post_maps_to_outgoing_confirmation() {
        let by_username = json!({
            "update_id": 4,
            "channel_post": {
                "message_id": 9,
                "chat": { "id": -100999, "username": "pics" },
                "photo": [{ "file_id": "x" }],
            },
        });
        assert!(matches!(
            map_update(&by_username, "@pics"),
            Some(MappedUpdate::Outgoing)
        ));

        let by_id = json!({
            "update_id": 5,
            "channel_post": {
                "message_id": 10,
                "chat": { "id": -100999 },
                "video": { "file_id": "y" },
            },
        });
        assert!(matches!(
            map_update(&by_id, "-100999"),
            Some(MappedUpdate::Outgoing)
        ));
    }

    #[test]
    fn callback_update_maps_to_decision() {
        let update = json!({
            "update_id": 6,
            "callback_query": {
                "id": "cb1",
                "from": { "id": 4242 },
                "data": "reject_-100777_55",
            },
        });

        let Some(MappedUpdate::Decision(decision)) = map_update(&update, "@pics") else {
            panic!("expected decision event");
        };
        assert_eq!(decision.reviewer, 4242);
        assert_eq!(decision.verdict, ReviewVerdict::Reject);
        assert_eq!(decision.candidate, CandidateId::new(-100777, 55));
    }

    #[test]
    fn capacity_detection_matches_api_wordings() {
        assert!(is_capacity_exhausted("Bad Request: SCHEDULE_TOO_MUCH"));
        assert!(is_capacity_exhausted("too many scheduled messages"));
        assert!(!is_capacity_exhausted("Bad Request: chat not found"));
    }

    #[test]
    fn envelope_unwrap() {
        let ok = json!({ "ok": true, "result": { "message_id": 1 } });
        assert_eq!(
            unwrap_envelope("sendPhoto", ok).unwrap()["message_id"],
            json!(1)
        );

        let err = json!({ "ok": false, "description": "Bad Request: wrong file" });
        match unwrap_envelope("sendPhoto", err) {
            Err(TransportError::Api { detail, .. }) => {
                assert!(detail.contains("wrong file"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn ref_cache_evicts_oldest() {
        let mut cache = RefCache::new();
        for i in 0..(REF_CACHE_CAPACITY + 10) {
            cache.insert(
                (1, i as i64),
                MediaRef {
                    file_id: format!("f{i}"),
                    kind: MediaKind::Photo,
                },
            );
        }
        assert!(cache.get(&(1, 0)).is_none());
        assert!(cache.get(&(1, (REF_CACHE_CAPACITY + 9) as i64)).is_some());
        assert_eq!(cache.map.len(), REF_CACHE_CAPACITY);
    }

    #[tokio::test]
    async fn resolve_media_serves_from_cache() {
        let transport = TelegramTransport::new(SecretString::from("t"), "@pics");
        let media = MediaRef {
            file_id: "abc".into(),
            kind: MediaKind::Photo,
        };
        transport
            .ref_cache
            .lock()
            .unwrap()
            .insert((-100777, 55), media.clone());

        assert_eq!(transport.resolve_media(-100777, 55).await.unwrap(), media);
        let miss = transport.resolve_media(-100777, 56).await;
        assert!(matches!(miss, Err(TransportError::NotFound { .. })));
    }
}
