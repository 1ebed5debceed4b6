use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// Optional call-to-action attached to a notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    /// Action identifier understood by the UI (e.g. "open_execution")
    pub kind: String,
    /// Opaque action arguments
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A notification as held by the client-side store.
///
/// Everything except `read` is fixed at creation; the store only hands out
/// clones and mutates `read` itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    /// Unique identifier, the de-duplication key
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<NotificationAction>,
    #[serde(default)]
    pub read: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Auto-read after this many milliseconds (toast-style notices)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

/// Notification body as it appears in an envelope's `data`.
///
/// `id` and `createdAt` fall back to the envelope's own id and timestamp.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NotificationPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub action: Option<NotificationAction>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub created_at: Option<i64>,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl NotificationPayload {
    pub(crate) fn into_record(self, envelope_id: &str, envelope_timestamp: i64) -> NotificationRecord {
        let created_ms = self.created_at.unwrap_or(envelope_timestamp);
        NotificationRecord {
            id: self.id.unwrap_or_else(|| envelope_id.to_string()),
            kind: self.kind,
            title: self.title,
            message: self.message,
            action: self.action,
            read: self.read,
            created_at: DateTime::from_timestamp_millis(created_ms).unwrap_or_else(Utc::now),
            ttl_ms: self.ttl_ms,
        }
    }
}

/// Builder for notification records
#[derive(Debug, Clone)]
pub struct NotificationBuilder {
    id: String,
    kind: NotificationKind,
    title: String,
    message: String,
    action: Option<NotificationAction>,
    created_at: Option<DateTime<Utc>>,
    ttl_ms: Option<u64>,
}

impl NotificationBuilder {
    pub fn new(id: impl Into<String>, kind: NotificationKind) -> Self {
        Self {
            id: id.into(),
            kind,
            title: String::new(),
            message: String::new(),
            action: None,
            created_at: None,
            ttl_ms: None,
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn action(mut self, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        self.action = Some(NotificationAction {
            kind: kind.into(),
            payload,
        });
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Mark read automatically after `ttl_ms`
    pub fn ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn build(self) -> NotificationRecord {
        NotificationRecord {
            id: self.id,
            kind: self.kind,
            title: self.title,
            message: self.message,
            action: self.action,
            read: false,
            created_at: self.created_at.unwrap_or_else(Utc::now),
            ttl_ms: self.ttl_ms,
        }
    }
}

impl NotificationRecord {
    pub fn builder(id: impl Into<String>, kind: NotificationKind) -> NotificationBuilder {
        NotificationBuilder::new(id, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_builder() {
        let record = NotificationRecord::builder("n-1", NotificationKind::Warning)
            .title("Disk almost full")
            .message("92% used on /data")
            .action("open_volume", serde_json::json!({"volume": "/data"}))
            .ttl_ms(5_000)
            .build();

        assert_eq!(record.id, "n-1");
        assert_eq!(record.kind, NotificationKind::Warning);
        assert!(!record.read);
        assert_eq!(record.ttl_ms, Some(5_000));
        assert_eq!(record.action.unwrap().kind, "open_volume");
    }

    #[test]
    fn test_payload_falls_back_to_envelope_fields() {
        let payload: NotificationPayload = serde_json::from_value(serde_json::json!({
            "type": "success",
            "title": "Run finished"
        }))
        .unwrap();

        let record = payload.into_record("env-7", 1_700_000_000_000);
        assert_eq!(record.id, "env-7");
        assert_eq!(record.kind, NotificationKind::Success);
        assert_eq!(record.created_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_record_wire_format() {
        let record = NotificationRecord::builder("n-2", NotificationKind::Error)
            .created_at(DateTime::from_timestamp_millis(1_000).unwrap())
            .build();
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["type"], "error");
        assert_eq!(json["createdAt"], 1_000);
        assert!(json.get("action").is_none());
    }
}
