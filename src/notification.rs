//! Notification record and payload normalization.
//!
//! Notifications reach the client two ways: as stored records from the
//! REST listing and as pushed hub events. Both are loose JSON whose field
//! names and types vary (`createdAt` vs `createdOn`, numeric or symbolic
//! categories, numeric or string ids). Everything is normalized into
//! [`Notification`] here; missing or malformed fields fall back to
//! defaults rather than failing.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::{
    DEFAULT_NOTIFICATION_TITLE, INVITATION_CATEGORY_CODE, INVITATION_CATEGORY_SYMBOL,
};

/// Epoch values at or above this are milliseconds (year 5138 in seconds).
const EPOCH_MILLIS_THRESHOLD: u64 = 100_000_000_000;

/// Notification category, numeric or symbolic depending on the producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Category {
    /// Numeric category code (e.g. `9003`).
    Code(i64),
    /// Symbolic category name (e.g. `"INVITE"`).
    Symbol(String),
}

impl Category {
    /// The category reserved for invitations.
    pub fn invitation() -> Self {
        Self::Code(INVITATION_CATEGORY_CODE)
    }

    /// Returns `true` for either reserved invitation value.
    pub fn is_invitation(&self) -> bool {
        match self {
            Self::Code(code) => *code == INVITATION_CATEGORY_CODE,
            Self::Symbol(name) => name == INVITATION_CATEGORY_SYMBOL,
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Code),
            Value::String(s) if !s.is_empty() => Some(Self::Symbol(s.clone())),
            _ => None,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code}"),
            Self::Symbol(name) => write!(f, "{name}"),
        }
    }
}

/// A single notification as held in the feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Identifier, unique within a feed. Locally assigned when the
    /// producer did not provide one.
    pub id: String,
    /// Short headline.
    pub title: String,
    /// Body; may contain markup.
    pub message: String,
    /// Category, absent on stored records that carry none.
    #[serde(rename = "type")]
    pub category: Option<Category>,
    /// Whether the user can act on this notification.
    pub is_actionable: bool,
    /// Creation time, if known.
    pub created_at: Option<DateTime<Utc>>,
    /// Backend entity (invitation) this notification refers to.
    pub related_id: Option<String>,
    /// Read flag.
    pub is_read: bool,
}

/// Loose wire shape shared by stored records and pushed objects.
///
/// Every field stays a raw [`Value`] so one mistyped field cannot take the
/// rest of the object down with it; each is converted on its own.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNotification {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    title: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default, rename = "type")]
    kind: Option<Value>,
    #[serde(default)]
    category: Option<Value>,
    #[serde(default)]
    is_actionable: Option<Value>,
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default)]
    created_on: Option<Value>,
    #[serde(default)]
    related_id: Option<Value>,
    #[serde(default)]
    is_read: Option<Value>,
}

impl RawNotification {
    /// Split an object into fields. Only a non-object can fail here.
    fn from_object(object: &Value) -> Self {
        Self::deserialize(object).unwrap_or_else(|e| {
            log::warn!("[Notification] Unreadable object, using defaults: {}", e);
            Self::default()
        })
    }

    fn id(&self) -> String {
        self.id.as_ref().and_then(value_id).unwrap_or_else(local_id)
    }

    fn title(&self) -> Option<String> {
        self.title.as_ref().and_then(|v| field_text(v, "title"))
    }

    fn message(&self) -> String {
        self.message.as_ref().map(value_text).unwrap_or_default()
    }

    fn category(&self) -> Option<Category> {
        self.kind
            .as_ref()
            .and_then(Category::from_value)
            .or_else(|| self.category.as_ref().and_then(Category::from_value))
    }

    fn is_actionable(&self) -> bool {
        flag(self.is_actionable.as_ref(), "isActionable")
    }

    fn is_read(&self) -> bool {
        flag(self.is_read.as_ref(), "isRead")
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
            .as_ref()
            .and_then(value_timestamp)
            .or_else(|| self.created_on.as_ref().and_then(value_timestamp))
    }

    fn related_id(&self) -> Option<String> {
        self.related_id.as_ref().and_then(value_id)
    }
}

impl Notification {
    /// Normalize a stored record from the REST listing.
    ///
    /// Returns `None` only when the record is not a JSON object; a bad
    /// field falls back to its default and the record is kept.
    pub fn from_record(record: &Value) -> Option<Self> {
        if !record.is_object() {
            log::warn!("[Notification] Skipping non-object record: {}", record);
            return None;
        }
        let raw = RawNotification::from_object(record);

        Some(Self {
            id: raw.id(),
            title: raw.title().unwrap_or_default(),
            message: raw.message(),
            category: raw.category(),
            is_actionable: raw.is_actionable(),
            created_at: raw.created_at(),
            related_id: raw.related_id(),
            is_read: raw.is_read(),
        })
    }

    /// Normalize a pushed hub event payload.
    ///
    /// The payload is either an object or a bare message string. Pushed
    /// notifications are always unread; missing or mistyped fields default
    /// to the placeholder title, the invitation category, not actionable,
    /// and `received_at`.
    pub fn from_push(payload: &Value, received_at: DateTime<Utc>) -> Self {
        let raw = match payload {
            Value::Object(_) => RawNotification::from_object(payload),
            other => RawNotification {
                message: Some(other.clone()),
                ..RawNotification::default()
            },
        };

        Self {
            id: raw.id(),
            title: raw
                .title()
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| DEFAULT_NOTIFICATION_TITLE.to_string()),
            message: raw.message(),
            category: Some(raw.category().unwrap_or_else(Category::invitation)),
            is_actionable: raw.is_actionable(),
            created_at: Some(raw.created_at().unwrap_or(received_at)),
            related_id: raw.related_id(),
            is_read: false,
        }
    }

    /// Returns `true` if the user can accept or reject this notification.
    pub fn is_actionable_invitation(&self) -> bool {
        self.is_actionable
            && self.related_id.is_some()
            && self.category.as_ref().is_some_and(Category::is_invitation)
    }
}

/// Generate a locally unique notification identifier.
pub fn local_id() -> String {
    format!("local-{}", Uuid::new_v4())
}

/// Parse the timestamp formats the backend emits.
///
/// Accepts RFC 3339 and offset-less ISO 8601 (treated as UTC).
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn value_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Seconds since the epoch; values too large for seconds are taken as
/// milliseconds.
fn epoch_timestamp(n: i64) -> Option<DateTime<Utc>> {
    if n.unsigned_abs() >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

fn value_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n.as_i64().and_then(epoch_timestamp),
        _ => None,
    }
}

fn field_text(value: &Value, field: &str) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        Value::Number(n) => Some(n.to_string()),
        other => {
            log::debug!("[Notification] Ignoring non-text {}: {}", field, other);
            None
        }
    }
}

fn flag(value: Option<&Value>, field: &str) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        None | Some(Value::Null) => false,
        Some(other) => {
            log::debug!("[Notification] Ignoring non-boolean {}: {}", field, other);
            false
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn received() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_push_object_with_all_fields() {
        let payload = json!({
            "title": "Invite",
            "message": "<b>Join</b> the tree",
            "type": 9003,
            "isActionable": true,
            "createdAt": "2024-06-01T08:30:00Z",
            "relatedId": "R1"
        });
        let n = Notification::from_push(&payload, received());

        assert_eq!(n.title, "Invite");
        assert_eq!(n.message, "<b>Join</b> the tree");
        assert_eq!(n.category, Some(Category::Code(9003)));
        assert!(n.is_actionable);
        assert_eq!(
            n.created_at,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap())
        );
        assert_eq!(n.related_id.as_deref(), Some("R1"));
        assert!(!n.is_read);
        assert!(n.id.starts_with("local-"));
    }

    #[test]
    fn test_push_defaults() {
        let n = Notification::from_push(&json!({}), received());
        assert_eq!(n.title, DEFAULT_NOTIFICATION_TITLE);
        assert_eq!(n.message, "");
        assert_eq!(n.category, Some(Category::invitation()));
        assert!(!n.is_actionable);
        assert_eq!(n.created_at, Some(received()));
        assert_eq!(n.related_id, None);
        assert!(!n.is_read);
    }

    #[test]
    fn test_push_bare_string_is_message() {
        let n = Notification::from_push(&json!("Hello <i>there</i>"), received());
        assert_eq!(n.message, "Hello <i>there</i>");
        assert_eq!(n.title, DEFAULT_NOTIFICATION_TITLE);
    }

    #[test]
    fn test_push_ignores_is_read_from_payload() {
        let n = Notification::from_push(&json!({"isRead": true}), received());
        assert!(!n.is_read);
    }

    #[test]
    fn test_push_numeric_related_id() {
        let n = Notification::from_push(&json!({"relatedId": 42}), received());
        assert_eq!(n.related_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_push_unparseable_timestamp_uses_receipt_time() {
        let n = Notification::from_push(&json!({"createdAt": "yesterday"}), received());
        assert_eq!(n.created_at, Some(received()));
    }

    #[test]
    fn test_push_mistyped_field_keeps_the_others() {
        let payload = json!({
            "title": ["not", "text"],
            "message": "Join",
            "type": 9003,
            "isActionable": true,
            "relatedId": "R1"
        });
        let n = Notification::from_push(&payload, received());
        assert_eq!(n.title, DEFAULT_NOTIFICATION_TITLE);
        assert_eq!(n.message, "Join");
        assert_eq!(n.related_id.as_deref(), Some("R1"));
        assert!(n.is_actionable_invitation());
    }

    #[test]
    fn test_push_numeric_title_and_bad_flag() {
        let payload = json!({"title": 7, "isActionable": "yes", "relatedId": "R1"});
        let n = Notification::from_push(&payload, received());
        assert_eq!(n.title, "7");
        assert!(!n.is_actionable);
        assert_eq!(n.related_id.as_deref(), Some("R1"));
    }

    #[test]
    fn test_push_unique_local_ids() {
        let a = Notification::from_push(&json!({}), received());
        let b = Notification::from_push(&json!({}), received());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_record_created_on_alias_and_category_field() {
        let record = json!({
            "id": 7,
            "title": "B",
            "message": "m",
            "category": "INVITE",
            "isActionable": true,
            "createdOn": "2024-06-01T08:30:00.123",
            "relatedId": "R2",
            "isRead": true
        });
        let n = Notification::from_record(&record).unwrap();
        assert_eq!(n.id, "7");
        assert_eq!(n.category, Some(Category::Symbol("INVITE".into())));
        assert!(n.created_at.is_some());
        assert!(n.is_read);
        assert!(n.is_actionable_invitation());
    }

    #[test]
    fn test_record_without_category_is_not_invitation() {
        let n = Notification::from_record(&json!({"id": 1, "isActionable": true, "relatedId": "R"}))
            .unwrap();
        assert_eq!(n.category, None);
        assert!(!n.is_actionable_invitation());
        assert_eq!(n.created_at, None);
    }

    #[test]
    fn test_record_mistyped_fields_still_kept() {
        let record = json!({
            "id": 1,
            "title": "A",
            "createdAt": 1717230600,
            "isRead": "no",
            "relatedId": {"nested": true}
        });
        let n = Notification::from_record(&record).unwrap();
        assert_eq!(n.id, "1");
        assert_eq!(n.title, "A");
        assert_eq!(
            n.created_at,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap())
        );
        assert!(!n.is_read);
        assert_eq!(n.related_id, None);
    }

    #[test]
    fn test_epoch_millis_timestamp() {
        let n = Notification::from_record(&json!({"createdOn": 1717230600000_i64})).unwrap();
        assert_eq!(
            n.created_at,
            Some(Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_record_non_object_skipped() {
        assert!(Notification::from_record(&json!("text")).is_none());
        assert!(Notification::from_record(&json!(null)).is_none());
    }

    #[test]
    fn test_category_display_and_invitation() {
        assert!(Category::Code(9003).is_invitation());
        assert!(Category::Symbol("INVITE".into()).is_invitation());
        assert!(!Category::Symbol("9003".into()).is_invitation());
        assert!(!Category::Code(1).is_invitation());
        assert_eq!(Category::Code(9003).to_string(), "9003");
    }

    #[test]
    fn test_parse_timestamp_with_offset() {
        let dt = parse_timestamp("2024-06-01T10:30:00+02:00").unwrap();
        assert_eq!(dt, Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap());
    }
}
