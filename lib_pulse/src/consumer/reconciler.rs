//! # State Reconciler
//!
//! Owns the consumer's canonical `DashboardState` and is the only thing that
//! writes to it. Two inputs feed it:
//!
//! 1. **Bootstrap**: cache hydration, then the four snapshot fetches run
//!    concurrently. Each fetch that succeeds replaces (or, for metrics,
//!    merges into) its slice; each one that fails leaves what hydration gave.
//! 2. **Stream**: one `PushMessage` at a time through
//!    `apply_stream_message`, each applied under a single write section.
//!
//! While paused, stream messages are dropped outright. Bootstrap ignores the
//! pause flag.
//!
//! User-facing notices ("New Event: ...", "Anomaly Detected: ...", fault
//! advisories) go out on a broadcast channel from `subscribe_notices`.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use crate::consumer::cache::{CachedSlices, SliceCache};
use crate::consumer::classify::{anomaly, companion_event, timeline_event, EventOrigin};
use crate::consumer::snapshot_client::SnapshotSource;
use crate::models::{DashboardState, MessageKind, PushMessage, VolumeBucket, VOLUME_RING_LEN};

const HOUR_MS: u64 = 3_600_000;
const NOTICE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// A user-visible alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

/// What `apply_stream_message` did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A slice changed.
    Applied(MessageKind),
    /// Paused; the message was discarded.
    Dropped,
    /// Fault advisory surfaced as a notice; no slice changed.
    Alerted,
    /// Undecodable or outside the domain; no slice changed.
    Rejected(String),
}

/// Which snapshot fetches succeeded during a bootstrap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    pub overview: bool,
    pub timeline: bool,
    pub anomalies: bool,
    pub volume: bool,
}

impl BootstrapReport {
    pub fn all_succeeded(&self) -> bool {
        self.overview && self.timeline && self.anomalies && self.volume
    }
}

/// Upserts a bucket by hour key, keeping the history oldest first, at most
/// 24 long and free of duplicate keys.
///
/// A same-key bucket that started within an hour of the incoming one is the
/// same bucket and is replaced in place. A same-key bucket further away is a
/// day-old leftover: it is removed and the incoming bucket is appended.
pub fn upsert_volume(history: &mut Vec<VolumeBucket>, bucket: VolumeBucket) {
    if let Some(pos) = history
        .iter()
        .position(|b| b.hour_display == bucket.hour_display)
    {
        // abs_diff cannot overflow, whatever the producer sent
        if bucket.timestamp.abs_diff(history[pos].timestamp) < HOUR_MS {
            history[pos] = bucket;
            return;
        }
        history.remove(pos);
    }
    history.push(bucket);
    if history.len() > VOLUME_RING_LEN {
        let excess = history.len() - VOLUME_RING_LEN;
        history.drain(..excess);
    }
}

/// Canonical consumer state plus the snapshot source and cache feeding it.
pub struct Reconciler<S> {
    source: S,
    cache: SliceCache,
    state: RwLock<DashboardState>,
    notices: broadcast::Sender<Notice>,
}

impl<S: SnapshotSource> Reconciler<S> {
    /// Starts in the loading state with empty slices.
    ///
    /// # Arguments
    /// * `source` - Where bootstrap and refresh fetch snapshots from.
    /// * `cache` - Hydrated on bootstrap, written after each slice change.
    pub fn new(source: S, cache: SliceCache) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            source,
            cache,
            state: RwLock::new(DashboardState::default()),
            notices,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, DashboardState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, DashboardState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// A consistent copy of every slice.
    pub fn state(&self) -> DashboardState {
        self.read().clone()
    }

    /// Runs `f` under the read lock.
    pub fn with_state<T>(&self, f: impl FnOnce(&DashboardState) -> T) -> T {
        f(&self.read())
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    fn notify(&self, level: NoticeLevel, text: String) {
        match level {
            NoticeLevel::Info => tracing::info!(notice = %text),
            NoticeLevel::Error => tracing::warn!(notice = %text),
        }
        // Nobody listening is fine.
        let _ = self.notices.send(Notice { level, text });
    }

    /// Flips the pause flag and returns the new value.
    pub fn toggle_pause(&self) -> bool {
        let mut state = self.write();
        state.is_paused = !state.is_paused;
        tracing::info!(paused = state.is_paused, "Stream pause toggled");
        state.is_paused
    }

    pub fn is_paused(&self) -> bool {
        self.read().is_paused
    }

    /// Loads cached slices into state. Missing or unusable entries leave the
    /// slice as it is.
    fn apply_cached(&self, cached: CachedSlices) {
        let mut state = self.write();
        if let Some(events) = cached.events {
            tracing::debug!(count = events.len(), "Hydrated events from cache");
            state.events = events;
        }
        if let Some(anomalies) = cached.anomalies {
            tracing::debug!(count = anomalies.len(), "Hydrated anomalies from cache");
            state.anomalies = anomalies;
        }
        if let Some(volume) = cached.volume {
            tracing::debug!(count = volume.len(), "Hydrated volume history from cache");
            state.volume_history = volume;
        }
    }

    /// Hydrates from cache, then fetches all four snapshot resources
    /// concurrently and folds in whichever succeed.
    ///
    /// Meant for startup. To re-fetch a running dashboard use `refresh`,
    /// which never rolls live slices back to the cached copy.
    pub async fn bootstrap(&self) -> BootstrapReport {
        self.write().is_loading = true;
        let cached = self.cache.hydrate_async().await;
        self.apply_cached(cached);
        self.fetch_all().await
    }

    /// Re-fetches the four snapshot resources without touching the cache
    /// first. A failed fetch keeps the slice exactly as it was.
    pub async fn refresh(&self) -> BootstrapReport {
        self.write().is_loading = true;
        self.fetch_all().await
    }

    async fn fetch_all(&self) -> BootstrapReport {
        // 1. All four requests in flight at once
        let (overview, timeline, anomalies, volume) = tokio::join!(
            self.source.overview(),
            self.source.timeline(),
            self.source.anomalies(),
            self.source.volume(),
        );

        // 2. Fold the successes into state under one write section
        let mut report = BootstrapReport::default();
        let mut state = self.write();

        match overview {
            Ok(delta) => {
                state.metrics.merge(&delta);
                report.overview = true;
            }
            Err(e) => tracing::warn!(error = %e, "Overview fetch failed, keeping current metrics"),
        }

        match timeline {
            Ok(records) => {
                let mut events: Vec<_> = records
                    .iter()
                    .map(|r| timeline_event(r, EventOrigin::Snapshot))
                    .collect();
                events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
                state.events = events;
                report.timeline = true;
            }
            Err(e) => tracing::warn!(error = %e, "Timeline fetch failed, keeping current events"),
        }

        match anomalies {
            Ok(records) => {
                state.anomalies = records
                    .iter()
                    .filter_map(|r| {
                        let mapped = anomaly(r);
                        if mapped.is_none() {
                            tracing::warn!(id = r.id, severity = %r.severity, "Skipping anomaly with unknown severity");
                        }
                        mapped
                    })
                    .collect();
                report.anomalies = true;
            }
            Err(e) => tracing::warn!(error = %e, "Anomalies fetch failed, keeping current anomalies"),
        }

        match volume {
            Ok(mut buckets) => {
                if buckets.len() > VOLUME_RING_LEN {
                    buckets.drain(..buckets.len() - VOLUME_RING_LEN);
                }
                state.volume_history = buckets;
                report.volume = true;
            }
            Err(e) => tracing::warn!(error = %e, "Volume fetch failed, keeping current volume"),
        }

        state.is_loading = false;

        // 3. Persist copies of the fetched slices once the lock is released
        let events = report.timeline.then(|| state.events.clone());
        let anomalies = report.anomalies.then(|| state.anomalies.clone());
        let volume = report.volume.then(|| state.volume_history.clone());
        drop(state);

        if let Some(events) = events {
            self.cache.save_events(&events);
        }
        if let Some(anomalies) = anomalies {
            self.cache.save_anomalies(&anomalies);
        }
        if let Some(volume) = volume {
            self.cache.save_volume(&volume);
        }

        tracing::info!(?report, "Snapshot fetch settled");
        report
    }

    /// Decodes one push frame and applies it. Undecodable frames are rejected.
    pub fn apply_stream_text(&self, text: &str) -> ApplyOutcome {
        match PushMessage::decode(text) {
            Ok(msg) => self.apply_stream_message(msg),
            Err(e) => {
                tracing::warn!(error = %e, "Rejected push frame");
                ApplyOutcome::Rejected(e.to_string())
            }
        }
    }

    /// Applies one push message, unless paused.
    ///
    /// The slice change happens under a single write section. Cache writes
    /// and notices follow after the lock is released, so readers never wait
    /// on the cache store.
    pub fn apply_stream_message(&self, msg: PushMessage) -> ApplyOutcome {
        let kind = msg.kind();
        let mut state = self.write();
        if state.is_paused {
            tracing::debug!(?kind, "Paused, dropping push message");
            return ApplyOutcome::Dropped;
        }

        match msg {
            PushMessage::NewEvent(record) => {
                state
                    .events
                    .insert(0, timeline_event(&record, EventOrigin::Stream));
                let events = state.events.clone();
                drop(state);
                self.cache.save_events(&events);
                self.notify(NoticeLevel::Info, format!("New Event: {}", record.kind));
            }
            PushMessage::NewAnomaly(record) => {
                let Some(mapped) = anomaly(&record) else {
                    tracing::warn!(id = record.id, severity = %record.severity, "Rejected anomaly with unknown severity");
                    return ApplyOutcome::Rejected(format!("unknown severity {:?}", record.severity));
                };
                state.anomalies.insert(0, mapped);
                state.events.insert(0, companion_event(&record));
                let anomalies = state.anomalies.clone();
                let events = state.events.clone();
                drop(state);
                self.cache.save_anomalies(&anomalies);
                self.cache.save_events(&events);
                self.notify(NoticeLevel::Error, format!("Anomaly Detected: {}", record.kind));
            }
            PushMessage::StatsUpdate(delta) => {
                state.metrics.merge(&delta);
            }
            PushMessage::VolumeUpdate(bucket) => {
                upsert_volume(&mut state.volume_history, bucket);
                let volume = state.volume_history.clone();
                drop(state);
                self.cache.save_volume(&volume);
            }
            PushMessage::SimulatedError(advisory) => {
                drop(state);
                self.notify(NoticeLevel::Error, advisory.message);
                return ApplyOutcome::Alerted;
            }
        }

        ApplyOutcome::Applied(kind)
    }
}
