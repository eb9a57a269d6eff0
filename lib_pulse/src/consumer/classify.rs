//! Event classification and record-to-slice mapping.

use crate::models::{Anomaly, AnomalyRecord, EventRecord, EventStatus, Severity, TimelineEvent};

/// Classifies a timeline category by keyword, first match wins:
/// "error" or "breach" -> anomaly, then "review" or "intake" -> pending,
/// anything else -> completed. Case-insensitive.
pub fn map_status(category: &str) -> EventStatus {
    let lower = category.to_lowercase();
    if lower.contains("error") || lower.contains("breach") {
        EventStatus::Anomaly
    } else if lower.contains("review") || lower.contains("intake") {
        EventStatus::Pending
    } else {
        EventStatus::Completed
    }
}

/// Where an event entered the consumer; only changes the description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    Snapshot,
    Stream,
}

/// Normalizes a producer event. The title is the category verbatim.
pub fn timeline_event(record: &EventRecord, origin: EventOrigin) -> TimelineEvent {
    let description = match origin {
        EventOrigin::Snapshot => format!("Event type: {}", record.kind),
        EventOrigin::Stream => format!("Real-time event: {}", record.kind),
    };
    TimelineEvent {
        id: record.id,
        title: record.kind.clone(),
        timestamp: record.timestamp,
        status: map_status(&record.kind),
        description,
    }
}

/// Normalizes a producer anomaly. `None` when the severity label is outside
/// the known set.
pub fn anomaly(record: &AnomalyRecord) -> Option<Anomaly> {
    let severity = Severity::normalize(&record.severity)?;
    Some(Anomaly {
        id: record.id,
        severity,
        message: format!("{} detected", record.kind),
        timestamp: record.timestamp,
    })
}

/// Timeline entry shadowing a streamed anomaly.
pub fn companion_event(record: &AnomalyRecord) -> TimelineEvent {
    TimelineEvent {
        id: record.id,
        title: record.kind.clone(),
        timestamp: record.timestamp,
        status: EventStatus::Anomaly,
        description: format!("Anomaly detected: {}", record.kind),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn map_status_truth_table() {
        let cases = [
            ("Case Intake", EventStatus::Pending),
            ("Document Review", EventStatus::Pending),
            ("Approval", EventStatus::Completed),
            ("Case Closed", EventStatus::Completed),
            ("Finalize", EventStatus::Completed),
            ("Archive", EventStatus::Completed),
            ("SLA Breach", EventStatus::Anomaly),
            ("System Error", EventStatus::Anomaly),
            ("Unusual Delay", EventStatus::Completed),
            // anomaly keywords take precedence over pending ones
            ("SLA Breach Review", EventStatus::Anomaly),
            ("Intake Error", EventStatus::Anomaly),
            ("DOCUMENT REVIEW", EventStatus::Pending),
            ("", EventStatus::Completed),
        ];
        for (category, expected) in cases {
            assert_eq!(map_status(category), expected, "category {:?}", category);
        }
    }

    #[test]
    fn mapping_sets_descriptions_by_origin() {
        let record = EventRecord {
            id: 3,
            kind: "Approval".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap(),
        };
        assert_eq!(timeline_event(&record, EventOrigin::Snapshot).description, "Event type: Approval");
        let streamed = timeline_event(&record, EventOrigin::Stream);
        assert_eq!(streamed.description, "Real-time event: Approval");
        assert_eq!(streamed.title, "Approval");
        assert_eq!(streamed.status, EventStatus::Completed);
    }

    #[test]
    fn anomaly_mapping_normalizes_or_rejects() {
        let mut record = AnomalyRecord {
            id: 9,
            kind: "Unusual Delay".to_string(),
            severity: "Critical".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap(),
        };
        let mapped = anomaly(&record).unwrap();
        assert_eq!(mapped.severity, Severity::High);
        assert_eq!(mapped.message, "Unusual Delay detected");

        let companion = companion_event(&record);
        assert_eq!(companion.status, EventStatus::Anomaly);
        assert_eq!(companion.description, "Anomaly detected: Unusual Delay");

        record.severity = "Severe".to_string();
        assert!(anomaly(&record).is_none());
    }
}
