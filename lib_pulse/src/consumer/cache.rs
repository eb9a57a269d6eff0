//! # Slice Cache
//!
//! Best-effort persistence of the consumer's list slices so that a restart
//! (or a producer outage) still has something to show.
//!
//! `CacheStore` is a plain keyed string store with three backends:
//! - `FileCache`: one `<key>.json` file per key in a directory.
//! - `RedisCache`: redis string keys under a prefix, for `redis://` locations.
//! - `MemoryCache`: in-process map.
//!
//! `SliceCache` layers the three fixed slice keys and JSON on top. Nothing in
//! here is ever fatal to the caller: reads degrade to "no entry" and writes
//! only log.
//!
//! Stores that can block (file, redis) are written from tokio's blocking
//! pool when a runtime is present, so a slow disk or an unresponsive redis
//! never stalls the push listener. Only the latest pending value of each key
//! is written.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;

use redis::{Client, Commands};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CacheError;
use crate::models::{Anomaly, TimelineEvent, VolumeBucket, VOLUME_RING_LEN};

pub const EVENTS_KEY: &str = "dashboard.events";
pub const ANOMALIES_KEY: &str = "dashboard.anomalies";
pub const VOLUME_KEY: &str = "dashboard.volume";

/// Default key prefix for `RedisCache`.
pub const REDIS_KEY_PREFIX: &str = "opspulse:";

/// Keyed string blob store.
pub trait CacheStore: Send + Sync {
    /// Reads `key`. `Ok(None)` when the key has never been written.
    fn load(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Overwrites `key` with `value`.
    fn store(&self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Whether `store` may block on I/O. Blocking stores are written off the
    /// async executor.
    fn may_block(&self) -> bool {
        true
    }
}

/// Picks a store from a location string.
///
/// # Arguments
/// * `location` - `redis://` or `rediss://` URL for a `RedisCache`, `memory:`
///   for an in-process store, anything else is a `FileCache` directory.
///
/// # Errors
/// Returns a `CacheError` if a redis URL is malformed or the server does not
/// answer a PING within the connect timeout. Callers can fall back to memory.
pub fn open_store(location: &str) -> Result<Arc<dyn CacheStore>, CacheError> {
    if location.starts_with("redis://") || location.starts_with("rediss://") {
        Ok(Arc::new(RedisCache::connect(location, REDIS_KEY_PREFIX)?))
    } else if location == "memory:" {
        Ok(Arc::new(MemoryCache::default()))
    } else {
        Ok(Arc::new(FileCache::new(location)))
    }
}

// --- FileCache ---

/// One JSON file per key under a directory, created on first write.
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl CacheStore for FileCache {
    fn load(&self, key: &str) -> Result<Option<String>, CacheError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, key: &str, value: &str) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        // Write-then-rename so a crash never leaves a half-written entry.
        let tmp = self.dir.join(format!(".{}.tmp", key));
        fs::write(&tmp, value)?;
        fs::rename(&tmp, self.path_for(key))?;
        Ok(())
    }
}

// --- RedisCache ---

/// Synchronous redis store. Each call opens its own connection, bounded by
/// the same timeout for connect, read and write.
pub struct RedisCache {
    /// The internal Redis client instance.
    client: Client,
    /// Prepended to every slice key.
    prefix: String,
    timeout: Duration,
}

impl RedisCache {
    /// Default bound on connecting to and talking with redis.
    pub const TIMEOUT: Duration = Duration::from_secs(2);

    /// Creates a store without contacting the server.
    ///
    /// # Arguments
    /// * `url` - The redis URL (e.g., "redis://127.0.0.1/").
    /// * `prefix` - Namespace prepended to every key (e.g., "opspulse:").
    pub fn new(url: &str, prefix: &str) -> Result<Self, CacheError> {
        // Parse the URL only; no connection is made here
        let client = Client::open(url)?;
        Ok(Self {
            client,
            prefix: prefix.to_string(),
            timeout: Self::TIMEOUT,
        })
    }

    /// Creates a store and checks that the server answers a PING.
    ///
    /// # Errors
    /// Returns `CacheError::Redis` if the server refuses the connection or
    /// the PING, `CacheError::Unresponsive` if it stays silent.
    pub fn connect(url: &str, prefix: &str) -> Result<Self, CacheError> {
        let cache = Self::new(url, prefix)?;
        cache.ping()?;
        Ok(cache)
    }

    fn connection(&self) -> Result<redis::Connection, CacheError> {
        // Bound the connect, then every read and write on the socket
        let conn = self.client.get_connection_with_timeout(self.timeout)?;
        conn.set_read_timeout(Some(self.timeout))?;
        conn.set_write_timeout(Some(self.timeout))?;
        Ok(conn)
    }

    fn ping(&self) -> Result<(), CacheError> {
        // The connection handshake itself can stall on a silent peer, so the
        // whole exchange runs on its own thread against a deadline
        let (tx, rx) = std::sync::mpsc::channel();
        let checker = Self {
            client: self.client.clone(),
            prefix: self.prefix.clone(),
            timeout: self.timeout,
        };
        std::thread::spawn(move || {
            let result = checker.connection().and_then(|mut conn| {
                let _: String = redis::cmd("PING").query(&mut conn)?;
                Ok(())
            });
            let _ = tx.send(result);
        });
        rx.recv_timeout(self.timeout * 2)
            .unwrap_or(Err(CacheError::Unresponsive(self.timeout * 2)))
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl CacheStore for RedisCache {
    fn load(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection()?;
        // Perform the GET operation; a missing key comes back as nil
        let value: Option<String> = conn.get(self.key(key))?;
        Ok(value)
    }

    fn store(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.connection()?;
        // Perform the SET operation
        let _: () = conn.set(self.key(key), value)?;
        Ok(())
    }
}

// --- MemoryCache ---

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, String>>,
}

impl CacheStore for MemoryCache {
    fn load(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn may_block(&self) -> bool {
        false
    }
}

// --- SliceCache ---

/// Slices restored at startup. `None` means the entry was missing or unusable.
#[derive(Debug, Default)]
pub struct CachedSlices {
    pub events: Option<Vec<TimelineEvent>>,
    pub anomalies: Option<Vec<Anomaly>>,
    pub volume: Option<Vec<VolumeBucket>>,
}

/// Serialized slices waiting for the blocking pool, latest value per key.
#[derive(Default)]
struct PendingWrites {
    values: Mutex<HashMap<&'static str, String>>,
    /// Held for the whole take-then-store, so writes of a key never reorder.
    write_lock: Mutex<()>,
}

/// The consumer's view of a `CacheStore`.
#[derive(Clone)]
pub struct SliceCache {
    store: Arc<dyn CacheStore>,
    pending: Arc<PendingWrites>,
    events_cap: usize,
    anomalies_cap: usize,
}

impl SliceCache {
    /// Wraps `store` with the default caps (100 events, 50 anomalies).
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            pending: Arc::new(PendingWrites::default()),
            events_cap: 100,
            anomalies_cap: 50,
        }
    }

    /// Overrides how many of the newest events and anomalies are persisted.
    pub fn with_caps(mut self, events_cap: usize, anomalies_cap: usize) -> Self {
        self.events_cap = events_cap;
        self.anomalies_cap = anomalies_cap;
        self
    }

    /// In-process cache, mostly for tests.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::default()))
    }

    /// Reads all three slices. Volume history is cut back to the newest 24
    /// buckets. Blocks on the store; see `hydrate_async` for async callers.
    pub fn hydrate(&self) -> CachedSlices {
        CachedSlices {
            events: self.load_slice(EVENTS_KEY),
            anomalies: self.load_slice(ANOMALIES_KEY),
            volume: self.load_slice::<Vec<VolumeBucket>>(VOLUME_KEY).map(|mut volume| {
                if volume.len() > VOLUME_RING_LEN {
                    volume.drain(..volume.len() - VOLUME_RING_LEN);
                }
                volume
            }),
        }
    }

    /// `hydrate` on the blocking pool when the store may block.
    pub async fn hydrate_async(&self) -> CachedSlices {
        if !self.store.may_block() {
            return self.hydrate();
        }
        let cache = self.clone();
        match tokio::task::spawn_blocking(move || cache.hydrate()).await {
            Ok(slices) => slices,
            Err(e) => {
                tracing::warn!(error = %e, "Cache hydration task failed");
                CachedSlices::default()
            }
        }
    }

    /// Persists the newest `events_cap` events.
    pub fn save_events(&self, events: &[TimelineEvent]) {
        let cap = events.len().min(self.events_cap);
        self.save_slice(EVENTS_KEY, &events[..cap]);
    }

    /// Persists the newest `anomalies_cap` anomalies.
    pub fn save_anomalies(&self, anomalies: &[Anomaly]) {
        let cap = anomalies.len().min(self.anomalies_cap);
        self.save_slice(ANOMALIES_KEY, &anomalies[..cap]);
    }

    pub fn save_volume(&self, volume: &[VolumeBucket]) {
        self.save_slice(VOLUME_KEY, volume);
    }

    fn load_slice<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let text = match self.store.load(key) {
            Ok(Some(text)) => text,
            Ok(None) => {
                tracing::debug!(key, "No cached slice");
                return None;
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Cache read failed, skipping slice");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(value) => Some(value),
            Err(source) => {
                let e = CacheError::Malformed {
                    key: key.to_string(),
                    source,
                };
                tracing::warn!(key, error = %e, "Discarding cached slice");
                None
            }
        }
    }

    fn save_slice<T: Serialize + ?Sized>(&self, key: &'static str, value: &T) {
        let text = match serde_json::to_string(value) {
            Ok(text) => text,
            Err(source) => {
                let e = CacheError::Serialize {
                    key: key.to_string(),
                    source,
                };
                tracing::warn!(key, error = %e, "Cache write failed");
                return;
            }
        };

        // Non-blocking stores, and callers outside a runtime, write inline
        let handle = match Handle::try_current() {
            Ok(handle) if self.store.may_block() => handle,
            _ => {
                write_logged(self.store.as_ref(), key, &text);
                return;
            }
        };

        // Park the value, then let the blocking pool write whatever is latest
        self.pending
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, text);
        let store = self.store.clone();
        let pending = self.pending.clone();
        handle.spawn_blocking(move || {
            let _order = pending.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
            let latest = pending
                .values
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(key);
            // An earlier task already wrote this key's latest value
            if let Some(text) = latest {
                write_logged(store.as_ref(), key, &text);
            }
        });
    }
}

fn write_logged(store: &dyn CacheStore, key: &str, text: &str) {
    if let Err(e) = store.store(key, text) {
        tracing::warn!(key, error = %e, "Cache write failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventStatus, Severity};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};

    fn events(n: u64) -> Vec<TimelineEvent> {
        let base = Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap();
        (0..n)
            .map(|i| TimelineEvent {
                id: n - i,
                title: "Approval".to_string(),
                timestamp: base - ChronoDuration::minutes(i as i64),
                status: EventStatus::Completed,
                description: "Event type: Approval".to_string(),
            })
            .collect()
    }

    #[test]
    fn file_cache_round_trips_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCache::new(dir.path().join("nested"));
        assert!(store.load(EVENTS_KEY).unwrap().is_none());

        store.store(EVENTS_KEY, "[]").unwrap();
        assert_eq!(store.load(EVENTS_KEY).unwrap().as_deref(), Some("[]"));
        assert!(dir.path().join("nested").join("dashboard.events.json").exists());
    }

    #[test]
    fn hydrate_skips_malformed_entries() {
        let store = Arc::new(MemoryCache::default());
        store.store(EVENTS_KEY, "{not json").unwrap();
        store
            .store(
                ANOMALIES_KEY,
                r#"[{"id":1,"severity":"high","message":"SLA Breach detected","timestamp":"2026-10-19T10:00:00Z"}]"#,
            )
            .unwrap();

        let slices = SliceCache::new(store).hydrate();
        assert!(slices.events.is_none());
        assert!(slices.volume.is_none());
        let anomalies = slices.anomalies.unwrap();
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].severity, Severity::High);
    }

    #[test]
    fn saves_are_capped_to_newest_entries() {
        let cache = SliceCache::in_memory().with_caps(5, 2);
        let all = events(12);
        cache.save_events(&all);

        let restored = cache.hydrate().events.unwrap();
        assert_eq!(restored, all[..5].to_vec());
    }

    #[test]
    fn volume_over_capacity_keeps_latest_buckets() {
        let cache = SliceCache::in_memory();
        let buckets: Vec<VolumeBucket> = (0..30)
            .map(|i| VolumeBucket {
                timestamp: i * 3_600_000,
                hour_display: format!("{:02}:00", i % 24),
                volume: i as u32,
                completion_rate: 90,
            })
            .collect();
        cache.save_volume(&buckets);

        let restored = cache.hydrate().volume.unwrap();
        assert_eq!(restored.len(), VOLUME_RING_LEN);
        assert_eq!(restored.first().unwrap().volume, 6);
        assert_eq!(restored.last().unwrap().volume, 29);
    }

    /// Store whose writes take a while, recording every value it is given.
    #[derive(Default)]
    struct SlowStore {
        delay: Duration,
        writes: Mutex<Vec<(String, String)>>,
    }

    impl CacheStore for SlowStore {
        fn load(&self, key: &str) -> Result<Option<String>, CacheError> {
            let writes = self.writes.lock().unwrap();
            Ok(writes.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.clone()))
        }

        fn store(&self, key: &str, value: &str) -> Result<(), CacheError> {
            std::thread::sleep(self.delay);
            self.writes.lock().unwrap().push((key.to_string(), value.to_string()));
            Ok(())
        }
    }

    async fn wait_for_writes(store: &SlowStore, count: usize) {
        for _ in 0..200 {
            if store.writes.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("cache writes did not land");
    }

    #[test]
    fn unreachable_redis_fails_to_open() {
        assert!(open_store("redis://127.0.0.1:1/").is_err());

        let store = RedisCache::new("redis://127.0.0.1:1/", REDIS_KEY_PREFIX).unwrap();
        assert!(store.load(EVENTS_KEY).is_err());
        let cache = SliceCache::new(Arc::new(store));
        cache.save_events(&events(1));
        assert!(cache.hydrate().events.is_none());
    }

    #[test]
    fn silent_redis_fails_to_open_within_timeout() {
        // Accepts connections and never answers
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming().flatten() {
                held.push(stream);
            }
        });

        let started = std::time::Instant::now();
        let result = open_store(&format!("redis://{addr}/"));
        assert!(result.is_err());
        assert!(started.elapsed() < RedisCache::TIMEOUT * 3);
    }

    #[tokio::test]
    async fn blocking_store_is_written_off_the_caller() {
        let store = Arc::new(SlowStore {
            delay: Duration::from_millis(300),
            ..Default::default()
        });
        let cache = SliceCache::new(store.clone());

        let started = std::time::Instant::now();
        cache.save_events(&events(3));
        assert!(started.elapsed() < Duration::from_millis(100));

        wait_for_writes(&store, 1).await;
        let restored = cache.hydrate_async().await.events.unwrap();
        assert_eq!(restored, events(3));
    }

    #[tokio::test]
    async fn queued_writes_keep_the_latest_value() {
        let store = Arc::new(SlowStore {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let cache = SliceCache::new(store.clone());
        for n in 1..=5 {
            cache.save_events(&events(n));
        }

        wait_for_writes(&store, 1).await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        let writes = store.writes.lock().unwrap().clone();
        assert!(writes.len() <= 5);
        let (key, last) = writes.last().unwrap();
        assert_eq!(key, EVENTS_KEY);
        assert_eq!(last, &serde_json::to_string(&events(5)).unwrap());
    }

    #[test]
    fn open_store_picks_backend_from_location() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(dir.path().to_str().unwrap()).unwrap();
        store.store(VOLUME_KEY, "[]").unwrap();
        assert!(dir.path().join("dashboard.volume.json").exists());

        let memory = open_store("memory:").unwrap();
        memory.store(VOLUME_KEY, "[]").unwrap();
        assert_eq!(memory.load(VOLUME_KEY).unwrap().as_deref(), Some("[]"));
    }
}
