//! # Pulse Engine
//!
//! The producer's single owned aggregate. All four slices (stats, timeline,
//! anomalies, volume ring) live in one `ProducerState` behind one mutex, and
//! the only ways in are `tick`/`apply` (mutation) and the snapshot readers.
//! A tick holds the lock for its whole mutation, so a snapshot read sees
//! either the state before a tick or after it, never in between.
//!
//! ## Tick state machine
//! 1. **Fault** (`fault_rate`): yields a `simulated-error` frame, mutates nothing.
//! 2. **Anomaly** (`anomaly_rate` of the remaining ticks): prepends a fresh
//!    anomaly, evicting the oldest past 50.
//! 3. **Event** (remainder): prepends a fresh event (cap 100), bumps the
//!    workflow counter, then upserts the current-hour volume bucket.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local, Utc};
use rand::Rng;

use crate::models::{
    AnomalyRecord, EventRecord, FaultAdvisory, PushMessage, StatsDelta, VolumeBucket,
    MAX_PRODUCER_ANOMALIES, MAX_PRODUCER_EVENTS, VOLUME_RING_LEN,
};
use crate::producer::seed::{
    fresh_completion_rate, hour_key, pick, ANOMALY_TYPES, EVENT_TYPES, SEVERITY_LABELS,
};

/// Message carried by every fault advisory.
pub const FAULT_MESSAGE: &str = "500 Internal Server Error (Simulated)";

const HOUR_MS: u64 = 3_600_000;

/// Workflow counters served by `/stats/overview`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStats {
    pub total_workflows_today: u64,
    /// Minutes.
    pub average_cycle_time: u64,
    /// Percent.
    pub sla_compliance: f64,
}

impl Default for WorkflowStats {
    fn default() -> Self {
        Self {
            total_workflows_today: 145,
            average_cycle_time: 42,
            sla_compliance: 94.0,
        }
    }
}

/// Everything the producer knows. Timeline and anomalies are newest first,
/// the volume ring oldest first.
#[derive(Debug, Clone)]
pub struct ProducerState {
    pub stats: WorkflowStats,
    pub events: VecDeque<EventRecord>,
    pub anomalies: VecDeque<AnomalyRecord>,
    pub volume: VecDeque<VolumeBucket>,
    /// Last identifier handed out by `next_id`.
    pub last_id: u64,
}

impl ProducerState {
    /// The overview body: current counters plus the live anomaly count.
    pub fn overview(&self) -> StatsDelta {
        StatsDelta {
            total_workflows_today: Some(self.stats.total_workflows_today),
            average_cycle_time: Some(self.stats.average_cycle_time as f64),
            sla_compliance: Some(self.stats.sla_compliance),
            active_anomalies_count: Some(self.anomalies.len() as u64),
        }
    }

    /// Strictly increasing identifier, at least the current epoch millis.
    fn next_id(&mut self, now: &DateTime<Local>) -> u64 {
        let now_ms = now.timestamp_millis().max(0) as u64;
        self.last_id = now_ms.max(self.last_id + 1);
        self.last_id
    }

    fn push_anomaly(&mut self, anomaly: AnomalyRecord) {
        self.anomalies.push_front(anomaly);
        self.anomalies.truncate(MAX_PRODUCER_ANOMALIES);
    }

    fn push_event(&mut self, event: EventRecord) {
        self.events.push_front(event);
        self.events.truncate(MAX_PRODUCER_EVENTS);
    }

    /// Counts one workflow into the bucket for `now`'s hour.
    ///
    /// A bucket with the same hour key that started less than an hour before
    /// `now` is the current bucket and is incremented in place. A same-key
    /// bucket older than that is a day-old leftover: it is dropped and a new
    /// bucket is appended, so hour keys stay unique. The ring is then cut
    /// back to 24 from the oldest end.
    fn upsert_current_hour<R: Rng + ?Sized>(
        &mut self,
        now: &DateTime<Local>,
        rng: &mut R,
    ) -> VolumeBucket {
        let key = hour_key(now);
        let now_ms = now.timestamp_millis();

        if let Some(pos) = self.volume.iter().position(|b| b.hour_display == key) {
            // abs_diff keeps far-off or corrupt timestamps from overflowing
            let current = now_ms.abs_diff(self.volume[pos].timestamp) < HOUR_MS;
            if current {
                let bucket = &mut self.volume[pos];
                bucket.volume = bucket.volume.saturating_add(1);
                return bucket.clone();
            }
            self.volume.remove(pos);
        }

        let bucket = VolumeBucket {
            timestamp: now_ms,
            hour_display: key,
            volume: 1,
            completion_rate: fresh_completion_rate(rng),
        };
        self.volume.push_back(bucket.clone());
        while self.volume.len() > VOLUME_RING_LEN {
            self.volume.pop_front();
        }
        bucket
    }
}

/// Branch taken by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickBranch {
    Fault,
    Anomaly,
    Event,
}

/// Branch probabilities. `anomaly` applies to the ticks that did not fault.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickRates {
    pub fault: f64,
    pub anomaly: f64,
}

impl TickRates {
    /// Rates are clamped into [0, 1].
    pub fn new(fault: f64, anomaly: f64) -> Self {
        Self {
            fault: fault.clamp(0.0, 1.0),
            anomaly: anomaly.clamp(0.0, 1.0),
        }
    }
}

impl Default for TickRates {
    fn default() -> Self {
        Self::new(0.05, 0.30)
    }
}

impl TickBranch {
    pub fn choose<R: Rng + ?Sized>(rng: &mut R, rates: TickRates) -> Self {
        if rng.random_bool(rates.fault) {
            TickBranch::Fault
        } else if rng.random_bool(rates.anomaly) {
            TickBranch::Anomaly
        } else {
            TickBranch::Event
        }
    }
}

/// The mutex-guarded producer aggregate.
pub struct PulseEngine {
    state: Mutex<ProducerState>,
    rates: TickRates,
}

impl PulseEngine {
    pub fn new(state: ProducerState, rates: TickRates) -> Self {
        Self {
            state: Mutex::new(state),
            rates,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProducerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn rates(&self) -> TickRates {
        self.rates
    }

    /// Runs one tick with a randomly chosen branch and returns the frames to
    /// publish, in order.
    pub fn tick<R: Rng + ?Sized>(&self, now: DateTime<Local>, rng: &mut R) -> Vec<PushMessage> {
        let branch = TickBranch::choose(rng, self.rates);
        self.apply(branch, now, rng)
    }

    /// Runs one tick on a given branch.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        branch: TickBranch,
        now: DateTime<Local>,
        rng: &mut R,
    ) -> Vec<PushMessage> {
        if branch == TickBranch::Fault {
            return vec![PushMessage::SimulatedError(FaultAdvisory {
                message: FAULT_MESSAGE.to_string(),
            })];
        }

        let mut state = self.lock();
        let id = state.next_id(&now);
        let timestamp = now.with_timezone(&Utc);

        match branch {
            TickBranch::Anomaly => {
                let anomaly = AnomalyRecord {
                    id,
                    kind: pick(rng, &ANOMALY_TYPES).to_string(),
                    severity: pick(rng, &SEVERITY_LABELS).to_string(),
                    timestamp,
                };
                state.push_anomaly(anomaly.clone());
                vec![PushMessage::NewAnomaly(anomaly)]
            }
            TickBranch::Event => {
                let event = EventRecord {
                    id,
                    kind: pick(rng, &EVENT_TYPES).to_string(),
                    timestamp,
                };
                state.push_event(event.clone());
                state.stats.total_workflows_today += 1;
                let stats = state.overview();
                let bucket = state.upsert_current_hour(&now, rng);
                vec![
                    PushMessage::NewEvent(event),
                    PushMessage::StatsUpdate(stats),
                    PushMessage::VolumeUpdate(bucket),
                ]
            }
            TickBranch::Fault => Vec::new(),
        }
    }

    // --- Snapshot reads ---

    pub fn overview(&self) -> StatsDelta {
        self.lock().overview()
    }

    pub fn timeline(&self) -> Vec<EventRecord> {
        self.lock().events.iter().cloned().collect()
    }

    pub fn anomalies(&self) -> Vec<AnomalyRecord> {
        self.lock().anomalies.iter().cloned().collect()
    }

    pub fn volume(&self) -> Vec<VolumeBucket> {
        self.lock().volume.iter().cloned().collect()
    }

    /// Runs `f` against a consistent view of the whole state.
    pub fn inspect<T>(&self, f: impl FnOnce(&ProducerState) -> T) -> T {
        f(&self.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::seed::{seed_dataset, SeedCounts};
    use chrono::{Duration, TimeZone};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    fn at(hour: u32, minute: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 19, hour, minute, 0).single().unwrap()
    }

    fn seeded_engine(now: DateTime<Local>, rng: &mut StdRng) -> PulseEngine {
        PulseEngine::new(seed_dataset(now, rng, SeedCounts::default()), TickRates::default())
    }

    #[test]
    fn fault_branch_mutates_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        let engine = seeded_engine(at(9, 0), &mut rng);
        let before = engine.inspect(|s| (s.events.clone(), s.anomalies.clone(), s.volume.clone()));

        let frames = engine.apply(TickBranch::Fault, at(9, 15), &mut rng);
        assert_eq!(
            frames,
            vec![PushMessage::SimulatedError(FaultAdvisory {
                message: FAULT_MESSAGE.to_string()
            })]
        );
        let after = engine.inspect(|s| (s.events.clone(), s.anomalies.clone(), s.volume.clone()));
        assert_eq!(before, after);
        assert_eq!(engine.overview().total_workflows_today, Some(145));
    }

    #[test]
    fn anomaly_list_keeps_latest_fifty() {
        let mut rng = StdRng::seed_from_u64(2);
        let now = at(10, 0);
        let engine = seeded_engine(now, &mut rng);

        let mut created = Vec::new();
        for _ in 0..1000 {
            for frame in engine.apply(TickBranch::Anomaly, now, &mut rng) {
                match frame {
                    PushMessage::NewAnomaly(a) => created.push(a.id),
                    other => panic!("unexpected frame {:?}", other),
                }
            }
        }

        let ids: Vec<u64> = engine.anomalies().iter().map(|a| a.id).collect();
        assert_eq!(ids.len(), MAX_PRODUCER_ANOMALIES);
        let expected: Vec<u64> = created.iter().rev().take(50).copied().collect();
        assert_eq!(ids, expected);
        assert_eq!(engine.overview().active_anomalies_count, Some(50));
    }

    #[test]
    fn event_branch_emits_event_stats_and_volume() {
        let mut rng = StdRng::seed_from_u64(3);
        let seeded_at = at(11, 0);
        let engine = seeded_engine(seeded_at, &mut rng);
        let before = engine.volume().last().cloned().unwrap();

        let frames = engine.apply(TickBranch::Event, at(11, 20), &mut rng);
        assert_eq!(frames.len(), 3);
        assert!(matches!(frames[0], PushMessage::NewEvent(_)));
        match &frames[1] {
            PushMessage::StatsUpdate(stats) => assert_eq!(stats.total_workflows_today, Some(146)),
            other => panic!("unexpected frame {:?}", other),
        }
        match &frames[2] {
            PushMessage::VolumeUpdate(bucket) => {
                assert_eq!(bucket.hour_display, "11:00");
                assert_eq!(bucket.volume, before.volume + 1);
                assert_eq!(bucket.timestamp, before.timestamp);
            }
            other => panic!("unexpected frame {:?}", other),
        }
        assert_eq!(engine.volume().len(), VOLUME_RING_LEN);
        assert_eq!(engine.timeline().len(), 21);
    }

    #[test]
    fn event_list_is_capped_at_one_hundred() {
        let mut rng = StdRng::seed_from_u64(4);
        let now = at(12, 0);
        let engine = seeded_engine(now, &mut rng);
        for i in 0..150 {
            engine.apply(TickBranch::Event, now + Duration::seconds(i), &mut rng);
        }
        let timeline = engine.timeline();
        assert_eq!(timeline.len(), MAX_PRODUCER_EVENTS);
        for pair in timeline.windows(2) {
            assert!(pair[0].id > pair[1].id, "newest first");
        }
        assert_eq!(engine.overview().total_workflows_today, Some(295));
    }

    #[test]
    fn new_hour_replaces_day_old_bucket_and_keeps_keys_unique() {
        let mut rng = StdRng::seed_from_u64(5);
        let seeded_at = at(12, 10);
        let engine = seeded_engine(seeded_at, &mut rng);

        // 13:05 reuses the key of the oldest seeded bucket (yesterday 13:00).
        let frames = engine.apply(TickBranch::Event, at(13, 5), &mut rng);
        match frames.last() {
            Some(PushMessage::VolumeUpdate(bucket)) => {
                assert_eq!(bucket.hour_display, "13:00");
                assert_eq!(bucket.volume, 1);
                assert!((80..100).contains(&bucket.completion_rate));
            }
            other => panic!("unexpected frame {:?}", other),
        }

        let volume = engine.volume();
        assert_eq!(volume.len(), VOLUME_RING_LEN);
        assert_eq!(volume.last().unwrap().hour_display, "13:00");
        let keys: HashSet<&str> = volume.iter().map(|b| b.hour_display.as_str()).collect();
        assert_eq!(keys.len(), VOLUME_RING_LEN);
    }

    #[test]
    fn extreme_bucket_timestamps_start_a_fresh_bucket() {
        for stored in [i64::MIN, i64::MAX] {
            let mut rng = StdRng::seed_from_u64(8);
            let now = at(9, 20);
            let mut state = seed_dataset(at(9, 0), &mut rng, SeedCounts::default());
            let pos = state.volume.iter().position(|b| b.hour_display == "09:00").unwrap();
            state.volume[pos].timestamp = stored;
            let engine = PulseEngine::new(state, TickRates::default());

            let frames = engine.apply(TickBranch::Event, now, &mut rng);
            match frames.last() {
                Some(PushMessage::VolumeUpdate(bucket)) => {
                    assert_eq!(bucket.hour_display, "09:00");
                    assert_eq!(bucket.volume, 1);
                    assert_eq!(bucket.timestamp, now.timestamp_millis());
                }
                other => panic!("unexpected frame {:?}", other),
            }
            let volume = engine.volume();
            assert_eq!(volume.len(), VOLUME_RING_LEN);
            assert_eq!(volume.iter().filter(|b| b.hour_display == "09:00").count(), 1);
        }
    }

    #[test]
    fn volume_ring_never_exceeds_capacity_over_many_hours() {
        let mut rng = StdRng::seed_from_u64(6);
        let start = at(0, 30);
        let engine = seeded_engine(start, &mut rng);
        for step in 0..200 {
            let now = start + Duration::minutes(step * 37);
            engine.apply(TickBranch::Event, now, &mut rng);
            let volume = engine.volume();
            assert!(volume.len() <= VOLUME_RING_LEN);
            let keys: HashSet<&str> = volume.iter().map(|b| b.hour_display.as_str()).collect();
            assert_eq!(keys.len(), volume.len());
        }
    }

    #[test]
    fn identifiers_are_strictly_increasing() {
        let mut rng = StdRng::seed_from_u64(8);
        let now = at(14, 0);
        let engine = seeded_engine(now, &mut rng);
        let mut last = 0;
        for _ in 0..20 {
            for frame in engine.tick(now, &mut rng) {
                let id = match frame {
                    PushMessage::NewEvent(e) => e.id,
                    PushMessage::NewAnomaly(a) => a.id,
                    _ => continue,
                };
                assert!(id > last);
                last = id;
            }
        }
    }

    #[test]
    fn branch_choice_honours_extreme_rates() {
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..100 {
            assert_eq!(TickBranch::choose(&mut rng, TickRates::new(1.0, 0.0)), TickBranch::Fault);
            assert_eq!(TickBranch::choose(&mut rng, TickRates::new(0.0, 1.0)), TickBranch::Anomaly);
            assert_eq!(TickBranch::choose(&mut rng, TickRates::new(0.0, 0.0)), TickBranch::Event);
        }
        assert_eq!(TickRates::new(3.0, -1.0), TickRates::new(1.0, 0.0));
    }
}
