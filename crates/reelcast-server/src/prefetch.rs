//! Per-client read-ahead cache.
//!
//! While a client is being streamed, a background task reads the next
//! `prefetch_size` bytes of the file into memory. The stream loop serves from
//! that window when its offset falls inside it and falls back to the file
//! otherwise, so cache state never changes the bytes on the wire.
//!
//! Entries are keyed by the client's socket address. A published window is an
//! immutable snapshot behind an `Arc`; readers clone the `Arc` and never see a
//! half-written buffer. At most one background read runs per key.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use reelcast_core::Metrics;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cache key: one entry per client socket.
pub type CacheKey = SocketAddr;

// ---------------------------------------------------------------------------
// PrefetchWindow
// ---------------------------------------------------------------------------

/// A contiguous slice of a file held in memory.
#[derive(Debug, Clone)]
pub struct PrefetchWindow {
    source: PathBuf,
    start: u64,
    data: Bytes,
}

impl PrefetchWindow {
    pub fn new(source: PathBuf, start: u64, data: Bytes) -> Self {
        Self {
            source,
            start,
            data,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// File offset of the first buffered byte.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// File offset one past the last buffered byte.
    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether this window holds bytes of `source` starting at `offset`.
    pub fn covers(&self, source: &Path, offset: u64) -> bool {
        self.source == source && offset >= self.start && offset < self.end()
    }

    /// Up to `max` buffered bytes of `source` beginning at `offset`.
    pub fn slice_from(&self, source: &Path, offset: u64, max: u64) -> Option<Bytes> {
        if !self.covers(source, offset) {
            return None;
        }
        let rel = usize::try_from(offset - self.start).ok()?;
        let available = self.data.len() - rel;
        let take = usize::try_from(max).map_or(available, |m| m.min(available));
        if take == 0 {
            return None;
        }
        Some(self.data.slice(rel..rel + take))
    }
}

// ---------------------------------------------------------------------------
// PrefetchCache
// ---------------------------------------------------------------------------

struct InFlight {
    id: u64,
    handle: JoinHandle<()>,
}

struct Entry {
    window: Option<Arc<PrefetchWindow>>,
    last_access: Mutex<Instant>,
    in_flight: Option<InFlight>,
}

impl Entry {
    fn new(now: Instant) -> Self {
        Self {
            window: None,
            last_access: Mutex::new(now),
            in_flight: None,
        }
    }

    fn abort(&mut self) {
        if let Some(task) = self.in_flight.take() {
            task.handle.abort();
        }
    }
}

/// Map from client key to its most recent prefetch window.
pub struct PrefetchCache {
    entries: RwLock<HashMap<CacheKey, Entry>>,
    prefetch_size: usize,
    idle_timeout: Duration,
    next_task_id: AtomicU64,
    closed: AtomicBool,
}

impl PrefetchCache {
    /// `idle_timeout` is how long an entry may go untouched before
    /// [`PrefetchCache::sweep`] drops it.
    pub fn new(prefetch_size: usize, idle_timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            prefetch_size,
            idle_timeout,
            next_task_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn prefetch_size(&self) -> usize {
        self.prefetch_size
    }

    /// Current window for `key`, refreshing its access time.
    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<PrefetchWindow>> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        *entry.last_access.lock() = Instant::now();
        entry.window.clone()
    }

    /// Start a background read of `prefetch_size` bytes of `source` from
    /// `offset`, unless one is already running for `key`.
    ///
    /// Returns `true` if a new read was started.
    pub fn trigger(self: &Arc<Self>, key: CacheKey, source: &Path, offset: u64) -> bool {
        if self.closed.load(Ordering::Acquire) || self.is_prefetching(&key) {
            return false;
        }

        // Re-checked under the write lock; another stream may have won the race.
        let mut entries = self.entries.write();
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let entry = entries
            .entry(key)
            .or_insert_with(|| Entry::new(Instant::now()));
        if entry.in_flight.is_some() {
            return false;
        }

        let id = self.next_task_id.fetch_add(1, Ordering::Relaxed);
        let cache = Arc::clone(self);
        let source = source.to_path_buf();
        let size = self.prefetch_size;
        let handle = tokio::spawn(async move {
            let result = read_window(&source, offset, size).await;
            cache.publish(key, id, source, offset, result);
        });
        entry.in_flight = Some(InFlight { id, handle });
        *entry.last_access.get_mut() = Instant::now();
        true
    }

    fn publish(
        &self,
        key: CacheKey,
        id: u64,
        source: PathBuf,
        offset: u64,
        result: io::Result<Bytes>,
    ) {
        let mut entries = self.entries.write();
        // The entry may have been swept or evicted while the read ran.
        let Some(entry) = entries.get_mut(&key) else {
            return;
        };
        if entry.in_flight.as_ref().map(|t| t.id) != Some(id) {
            return;
        }
        entry.in_flight = None;

        match result {
            Ok(data) => {
                tracing::trace!(
                    "Prefetched {} bytes of {} at {offset} for {key}",
                    data.len(),
                    source.display()
                );
                entry.window = Some(Arc::new(PrefetchWindow::new(source, offset, data)));
                *entry.last_access.get_mut() = Instant::now();
            }
            Err(e) => {
                tracing::debug!("Prefetch of {} failed for {key}: {e}", source.display());
            }
        }
    }

    /// Whether a background read is running for `key`.
    pub fn is_prefetching(&self, key: &CacheKey) -> bool {
        self.entries
            .read()
            .get(key)
            .is_some_and(|e| e.in_flight.is_some())
    }

    /// Drop the entry for `key`, cancelling any running read.
    pub fn evict(&self, key: &CacheKey) {
        if let Some(mut entry) = self.entries.write().remove(key) {
            entry.abort();
        }
    }

    /// Drop every entry idle for longer than the timeout. Returns how many
    /// were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| {
            let idle = now.saturating_duration_since(*entry.last_access.get_mut());
            if idle > self.idle_timeout {
                entry.abort();
                false
            } else {
                true
            }
        });
        before - entries.len()
    }

    /// Abort all running reads, drop all entries, and refuse new triggers.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut entries = self.entries.write();
        for (_, mut entry) in entries.drain() {
            entry.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for PrefetchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefetchCache")
            .field("entries", &self.len())
            .field("prefetch_size", &self.prefetch_size)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

/// Read up to `size` bytes of `path` starting at `offset`.
async fn read_window(path: &Path, offset: u64, size: usize) -> io::Result<Bytes> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(io::SeekFrom::Start(offset)).await?;
    let mut data = Vec::with_capacity(size);
    file.take(size as u64).read_to_end(&mut data).await?;
    Ok(Bytes::from(data))
}

/// Run [`PrefetchCache::sweep`] every `interval` until `cancel` fires.
pub async fn run_sweeper(
    cache: Arc<PrefetchCache>,
    metrics: Arc<Metrics>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let removed = cache.sweep();
                let snapshot = metrics.snapshot();
                tracing::debug!(
                    removed,
                    remaining = cache.len(),
                    active_connections = snapshot.active_connections,
                    bytes_transferred = snapshot.bytes_transferred,
                    requests = snapshot.requests,
                    errors = snapshot.errors,
                    prefetch_hits = snapshot.prefetch_hits,
                    prefetch_misses = snapshot.prefetch_misses,
                    "Prefetch sweep"
                );
            }
        }
    }
}
