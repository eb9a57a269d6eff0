//! # Data Model
//!
//! Shared types for both ends of the stream.
//!
//! - **Wire records** (`EventRecord`, `AnomalyRecord`, `VolumeBucket`,
//!   `StatsDelta`) are what the producer keeps in memory and serves verbatim,
//!   camelCase on the wire.
//! - **Consumer slices** (`TimelineEvent`, `Anomaly`, `Metrics`) are what the
//!   reconciler derives from those records.
//! - **`PushMessage`** is the closed set of frames carried by the push channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Producer-side cap on the timeline.
pub const MAX_PRODUCER_EVENTS: usize = 100;
/// Producer-side cap on the anomaly list.
pub const MAX_PRODUCER_ANOMALIES: usize = 50;
/// Length of the hourly volume ring on both ends.
pub const VOLUME_RING_LEN: usize = 24;

/// Classification of a timeline event, always derived from its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Completed,
    Pending,
    Anomaly,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Completed => "completed",
            EventStatus::Pending => "pending",
            EventStatus::Anomaly => "anomaly",
        }
    }
}

/// Normalized anomaly severity as seen by the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// Display order, most severe first.
    pub const ALL: [Severity; 3] = [Severity::High, Severity::Medium, Severity::Low];

    /// Normalizes a producer label.
    ///
    /// Labels are compared lowercased and trimmed. `"critical"` folds into
    /// `High`; anything outside {low, medium, high, critical} is rejected.
    pub fn normalize(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" | "critical" => Some(Severity::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

// --- Wire records ---

/// A timeline event as the producer stores and serves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: DateTime<Utc>,
}

/// An anomaly as the producer stores and serves it. `severity` is the raw
/// producer label ("Low", "Medium", "High", "Critical").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    pub timestamp: DateTime<Utc>,
}

/// One hour of workflow volume. Used verbatim on the wire and in the
/// consumer's volume history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeBucket {
    /// Bucket start, epoch milliseconds.
    pub timestamp: i64,
    /// Hour key, e.g. "14:00". Unique within a volume history.
    pub hour_display: String,
    pub volume: u32,
    /// Completion rate in percent, 0-100.
    pub completion_rate: u8,
}

/// Overview statistics. Every field is optional so that the same type
/// carries both the full `/stats/overview` body and partial stream deltas;
/// only present fields are merged into the consumer's metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatsDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_workflows_today: Option<u64>,
    /// Average cycle time in minutes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_cycle_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sla_compliance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_anomalies_count: Option<u64>,
}

/// Payload of a `simulated-error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultAdvisory {
    pub message: String,
}

/// A push channel frame: `{"event": "<kind>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum PushMessage {
    NewEvent(EventRecord),
    NewAnomaly(AnomalyRecord),
    StatsUpdate(StatsDelta),
    VolumeUpdate(VolumeBucket),
    SimulatedError(FaultAdvisory),
}

/// Kind tag of a `PushMessage`, used for logging and apply outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Event,
    Anomaly,
    Metrics,
    Volume,
    Fault,
}

impl PushMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            PushMessage::NewEvent(_) => MessageKind::Event,
            PushMessage::NewAnomaly(_) => MessageKind::Anomaly,
            PushMessage::StatsUpdate(_) => MessageKind::Metrics,
            PushMessage::VolumeUpdate(_) => MessageKind::Volume,
            PushMessage::SimulatedError(_) => MessageKind::Fault,
        }
    }

    /// Decodes one text frame. Unknown kinds and malformed payloads are errors.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// --- Consumer slices ---

/// A timeline entry in the consumer's events slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub id: u64,
    pub title: String,
    pub timestamp: DateTime<Utc>,
    pub status: EventStatus,
    pub description: String,
}

/// An anomaly in the consumer's anomalies slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub id: u64,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Headline metrics. Only `total_workflows`, `average_cycle_time` and
/// `sla_compliance` are fed by the producer; the rest keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub active_users: u64,
    pub transactions_per_second: f64,
    pub error_rate: f64,
    /// 0-100.
    pub system_health: f64,
    /// Percent.
    pub sla_compliance: f64,
    /// Display string, e.g. "42m".
    pub average_cycle_time: String,
    pub total_workflows: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            active_users: 0,
            transactions_per_second: 0.0,
            error_rate: 0.0,
            system_health: 100.0,
            sla_compliance: 100.0,
            average_cycle_time: "0m 0s".to_string(),
            total_workflows: 0,
        }
    }
}

impl Metrics {
    /// Shallow merge: fields present in `delta` overwrite, the rest stay.
    pub fn merge(&mut self, delta: &StatsDelta) {
        if let Some(total) = delta.total_workflows_today {
            self.total_workflows = total;
        }
        if let Some(minutes) = delta.average_cycle_time {
            self.average_cycle_time = format_cycle_time(minutes);
        }
        if let Some(sla) = delta.sla_compliance {
            self.sla_compliance = sla;
        }
    }
}

/// Renders a cycle time in minutes for display: "42m", or "42.5m" when
/// fractional.
pub fn format_cycle_time(minutes: f64) -> String {
    if minutes.fract() == 0.0 {
        format!("{}m", minutes as i64)
    } else {
        format!("{:.1}m", minutes)
    }
}

/// The consumer's canonical state. Events and anomalies are newest first;
/// volume history is oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardState {
    pub events: Vec<TimelineEvent>,
    pub metrics: Metrics,
    pub anomalies: Vec<Anomaly>,
    pub volume_history: Vec<VolumeBucket>,
    pub is_paused: bool,
    pub is_loading: bool,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            metrics: Metrics::default(),
            anomalies: Vec::new(),
            volume_history: Vec::new(),
            is_paused: false,
            is_loading: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn push_frames_use_kebab_case_tags() {
        let msg = PushMessage::SimulatedError(FaultAdvisory {
            message: "boom".to_string(),
        });
        let text = msg.encode().unwrap();
        assert_eq!(text, r#"{"event":"simulated-error","data":{"message":"boom"}}"#);

        let text = r#"{"event":"volume-update","data":{"timestamp":1,"hourDisplay":"09:00","volume":3,"completionRate":91}}"#;
        match PushMessage::decode(text).unwrap() {
            PushMessage::VolumeUpdate(bucket) => {
                assert_eq!(bucket.hour_display, "09:00");
                assert_eq!(bucket.volume, 3);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn unknown_frame_kind_is_rejected() {
        let text = r#"{"event":"user-joined","data":{"id":1}}"#;
        assert!(PushMessage::decode(text).is_err());
    }

    #[test]
    fn event_record_uses_type_field() {
        let record = EventRecord {
            id: 7,
            kind: "Case Intake".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap(),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "Case Intake");
        assert_eq!(value["timestamp"], "2026-10-19T08:30:00Z");
    }

    #[test]
    fn severity_normalization_folds_critical() {
        assert_eq!(Severity::normalize("High"), Some(Severity::High));
        assert_eq!(Severity::normalize("CRITICAL"), Some(Severity::High));
        assert_eq!(Severity::normalize(" medium "), Some(Severity::Medium));
        assert_eq!(Severity::normalize("Low"), Some(Severity::Low));
        assert_eq!(Severity::normalize("urgent"), None);
    }

    #[test]
    fn metrics_merge_only_touches_present_fields() {
        let mut metrics = Metrics::default();
        metrics.merge(&StatsDelta {
            total_workflows_today: Some(146),
            ..Default::default()
        });
        assert_eq!(metrics.total_workflows, 146);
        assert_eq!(metrics.average_cycle_time, "0m 0s");
        assert_eq!(metrics.sla_compliance, 100.0);
        assert_eq!(metrics.system_health, 100.0);

        metrics.merge(&StatsDelta {
            average_cycle_time: Some(42.0),
            sla_compliance: Some(94.0),
            ..Default::default()
        });
        assert_eq!(metrics.total_workflows, 146);
        assert_eq!(metrics.average_cycle_time, "42m");
        assert_eq!(metrics.sla_compliance, 94.0);
    }

    #[test]
    fn stats_delta_accepts_partial_bodies() {
        let delta: StatsDelta = serde_json::from_str(r#"{"slaCompliance":97}"#).unwrap();
        assert_eq!(delta.sla_compliance, Some(97.0));
        assert_eq!(delta.total_workflows_today, None);
    }

    #[test]
    fn cycle_time_formatting() {
        assert_eq!(format_cycle_time(42.0), "42m");
        assert_eq!(format_cycle_time(12.5), "12.5m");
    }
}
