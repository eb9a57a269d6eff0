//! # Seed Generator
//!
//! Builds the producer's initial dataset. Randomness only picks values
//! (categories, severities, offsets, volumes); the structural counts are
//! fixed by `SeedCounts` and the 24-hour volume ring.

use chrono::{DateTime, Duration, Local, Timelike, Utc};
use rand::Rng;

use crate::models::{AnomalyRecord, EventRecord, VolumeBucket, VOLUME_RING_LEN};
use crate::producer::engine::{ProducerState, WorkflowStats};

/// Timeline categories the producer draws from.
pub const EVENT_TYPES: [&str; 6] = [
    "Case Intake",
    "Document Review",
    "Approval",
    "Case Closed",
    "Finalize",
    "Archive",
];

/// Anomaly types the producer draws from.
pub const ANOMALY_TYPES: [&str; 3] = ["SLA Breach", "Unusual Delay", "System Error"];

/// Severity labels the producer emits. "Critical" is outside the consumer's
/// domain and is folded into high on ingestion.
pub const SEVERITY_LABELS: [&str; 4] = ["Low", "Medium", "High", "Critical"];

/// How many events and anomalies to seed.
#[derive(Debug, Clone, Copy)]
pub struct SeedCounts {
    pub events: usize,
    pub anomalies: usize,
}

impl Default for SeedCounts {
    fn default() -> Self {
        Self {
            events: 20,
            anomalies: 2,
        }
    }
}

pub(crate) fn pick<'a, R: Rng + ?Sized>(rng: &mut R, items: &[&'a str]) -> &'a str {
    items[rng.random_range(0..items.len())]
}

/// Hour key of a local instant, e.g. "07:00".
pub fn hour_key(at: &DateTime<Local>) -> String {
    format!("{:02}:00", at.hour())
}

/// Completion rate for a freshly opened bucket, in [80, 100).
pub(crate) fn fresh_completion_rate<R: Rng + ?Sized>(rng: &mut R) -> u8 {
    rng.random_range(80..100)
}

/// Builds the initial producer state as of `now`.
///
/// - `counts.events` events with ids `0..n`, timestamps uniformly within the
///   last 24h, newest first.
/// - `counts.anomalies` anomalies with ids `0..m` within the last 10h.
/// - Exactly 24 volume buckets, one per hour walking back from `now`, oldest
///   first, volume in [10, 60) and completion rate in [80, 100].
pub fn seed_dataset<R: Rng + ?Sized>(
    now: DateTime<Local>,
    rng: &mut R,
    counts: SeedCounts,
) -> ProducerState {
    let now_utc = now.with_timezone(&Utc);

    let mut events: Vec<EventRecord> = (0..counts.events as u64)
        .map(|id| EventRecord {
            id,
            kind: pick(rng, &EVENT_TYPES).to_string(),
            timestamp: now_utc - Duration::minutes(rng.random_range(0..1440)),
        })
        .collect();
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    let anomalies: Vec<AnomalyRecord> = (0..counts.anomalies as u64)
        .map(|id| AnomalyRecord {
            id,
            kind: pick(rng, &ANOMALY_TYPES).to_string(),
            severity: pick(rng, &SEVERITY_LABELS).to_string(),
            timestamp: now_utc - Duration::minutes(rng.random_range(0..600)),
        })
        .collect();

    let volume: Vec<VolumeBucket> = (0..VOLUME_RING_LEN as i64)
        .rev()
        .map(|hours_ago| {
            let at = now - Duration::hours(hours_ago);
            VolumeBucket {
                timestamp: at.timestamp_millis(),
                hour_display: hour_key(&at),
                volume: rng.random_range(10..60),
                completion_rate: rng.random_range(80..=100),
            }
        })
        .collect();

    ProducerState {
        stats: WorkflowStats::default(),
        events: events.into(),
        anomalies: anomalies.into(),
        volume: volume.into(),
        last_id: 0,
    }
}
