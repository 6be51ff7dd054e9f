//! Shared types for the quiz state service and its RPC clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Reserved top-level key in the state file. Never a participant id.
pub const META_KEY: &str = "meta";

/// All participant records, keyed by participant id.
pub type RecordMap = BTreeMap<String, Record>;

// =====================================================
// Domain Types
// =====================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StandProgress {
    #[serde(default)]
    pub done: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingQuestion {
    pub stand_id: String,
    #[serde(default)]
    pub question_text: String,
    #[serde(default)]
    pub accepted_answers: Vec<String>,
    #[serde(default)]
    pub hint: String,
    /// Transport-owned keys such as `stand_title`
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One participant's persisted progress and profile.
///
/// Keys the store does not know about (message ids and keyboard state kept by
/// the chat transport) land in `extra` and are written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub awaiting_name: bool,
    #[serde(default)]
    pub awaiting_vk_link: bool,
    #[serde(default)]
    pub profile_link: Option<String>,
    #[serde(default)]
    pub profile_verified: bool,
    #[serde(default)]
    pub stand_status: BTreeMap<String, StandProgress>,
    #[serde(default)]
    pub pending_question: Option<PendingQuestion>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    /// Fresh record for a participant seen for the first time.
    pub fn new<'a>(stand_ids: impl IntoIterator<Item = &'a String>, now: DateTime<Utc>) -> Self {
        Self {
            full_name: None,
            awaiting_name: false,
            awaiting_vk_link: false,
            profile_link: None,
            profile_verified: false,
            stand_status: stand_ids
                .into_iter()
                .map(|id| (id.clone(), StandProgress::default()))
                .collect(),
            pending_question: None,
            created_at: now,
            updated_at: now,
            extra: Map::new(),
        }
    }

    /// Refresh `updated_at`, keeping it strictly increasing even when the clock
    /// has not moved since the previous touch.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::microseconds(1)
        };
    }

    pub fn completed_stands(&self) -> usize {
        self.stand_status.values().filter(|s| s.done).count()
    }

    /// Completion percentage against this record's own stand set.
    pub fn progress_percent(&self) -> f64 {
        let total = self.stand_status.len();
        if total == 0 {
            return 0.0;
        }
        self.completed_stands() as f64 / total as f64 * 100.0
    }

    pub fn stand_ids(&self) -> BTreeSet<&str> {
        self.stand_status.keys().map(String::as_str).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandQuestion {
    pub question: String,
    #[serde(default)]
    pub answers: Vec<String>,
    #[serde(default)]
    pub hint: String,
}

/// Catalog entry owned by the admin side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stand {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub emoji: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub questions: Vec<StandQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateStats {
    pub timestamp: String,
    pub total_participants: usize,
    pub total_stands: usize,
    pub completed: usize,
    pub verified: usize,
    pub qualified: usize,
    pub with_pending_question: usize,
    pub average_progress: f64,
}

/// Admin-facing progress row for a single participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantSummary {
    pub participant_id: String,
    pub full_name: Option<String>,
    pub completed_stands: usize,
    pub total_stands: usize,
    pub progress_percent: f64,
    pub profile_verified: bool,
    pub profile_link: Option<String>,
    pub pending_question_stand: Option<String>,
    pub qualified: bool,
    pub awaiting_name: bool,
    pub awaiting_vk_link: bool,
    pub created_at: String,
    pub updated_at: String,
}

// =====================================================
// Control Plane Types
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    Ok,
    Success,
    Error,
}

/// Body of every control-plane answer (`/health`, `/reload-config`, `/webhook`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: ControlStatus,
    pub message: String,
}

impl ControlResponse {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            status: ControlStatus::Ok,
            message: msg.into(),
        }
    }

    pub fn success(msg: impl Into<String>) -> Self {
        Self {
            status: ControlStatus::Success,
            message: msg.into(),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            status: ControlStatus::Error,
            message: msg.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status != ControlStatus::Error
    }
}

fn unknown_event() -> String {
    "unknown".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRequest {
    #[serde(rename = "type", default = "unknown_event")]
    pub event_type: String,
}

impl Default for WebhookRequest {
    fn default() -> Self {
        Self {
            event_type: unknown_event(),
        }
    }
}

// =====================================================
// RPC Response Types
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> RpcResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub total_participants: usize,
    pub total_stands: usize,
    pub watching: bool,
}

// =====================================================
// Timestamp codec
// =====================================================

/// RFC 3339 on the way out; RFC 3339 or a naive ISO date-time (taken as UTC)
/// on the way in.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn format(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_record_defaults() {
        let ids = vec!["a".to_string(), "b".to_string()];
        let now = Utc::now();
        let record = Record::new(&ids, now);
        assert_eq!(record.full_name, None);
        assert!(!record.awaiting_name);
        assert!(!record.profile_verified);
        assert_eq!(record.stand_ids(), ["a", "b"].into_iter().collect());
        assert!(record.stand_status.values().all(|s| !s.done));
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn test_touch_is_strictly_monotonic() {
        let now = Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, 0).unwrap();
        let mut record = Record::new(std::iter::empty(), now);
        record.touch(now);
        assert!(record.updated_at > now);
        let before = record.updated_at;
        record.touch(now - chrono::Duration::seconds(10));
        assert!(record.updated_at > before);
    }

    #[test]
    fn test_progress_uses_own_stand_set() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let mut record = Record::new(&ids, Utc::now());
        record.stand_status.get_mut("a").unwrap().done = true;
        assert_eq!(record.completed_stands(), 1);
        assert_eq!(record.progress_percent(), 25.0);

        let empty = Record::new(std::iter::empty(), Utc::now());
        assert_eq!(empty.progress_percent(), 0.0);
    }

    #[test]
    fn test_unknown_fields_are_kept() {
        let raw = serde_json::json!({
            "full_name": "Ann",
            "created_at": "2026-05-01T10:00:00Z",
            "updated_at": "2026-05-01T10:00:00Z",
            "menu_message_id": 77,
            "last_keyboard_state": "main"
        });
        let record: Record = serde_json::from_value(raw).unwrap();
        assert_eq!(record.extra.get("menu_message_id"), Some(&serde_json::json!(77)));

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["last_keyboard_state"], "main");
        assert_eq!(back["full_name"], "Ann");
    }

    #[test]
    fn test_nested_unknown_fields_are_kept() {
        let raw = serde_json::json!({
            "created_at": "2026-05-01T10:00:00Z",
            "updated_at": "2026-05-01T10:00:00Z",
            "stand_status": {"a": {"done": true, "attempts": 3}},
            "pending_question": {"stand_id": "a", "stand_title": "Robotics", "accepted_answers": ["x"]}
        });
        let record: Record = serde_json::from_value(raw).unwrap();
        assert!(record.stand_status["a"].done);

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["stand_status"]["a"]["attempts"], 3);
        assert_eq!(back["pending_question"]["stand_title"], "Robotics");
        assert_eq!(back["pending_question"]["hint"], "");
    }

    #[test]
    fn test_timestamp_accepts_naive_iso() {
        let ts = timestamp::parse("2026-05-01T10:11:12.345678").unwrap();
        assert_eq!(timestamp::format(&ts), "2026-05-01T10:11:12.345678Z");
        assert!(timestamp::parse("yesterday").is_none());
    }

    #[test]
    fn test_webhook_defaults_to_unknown() {
        let req: WebhookRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.event_type, "unknown");
        let req: WebhookRequest = serde_json::from_str(r#"{"type":"stands_updated"}"#).unwrap();
        assert_eq!(req.event_type, "stands_updated");
    }

    #[test]
    fn test_control_response_shape() {
        let body = serde_json::to_value(ControlResponse::success("Configuration reloaded")).unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["message"], "Configuration reloaded");
        assert!(!ControlResponse::error("boom").is_success());
    }
}
