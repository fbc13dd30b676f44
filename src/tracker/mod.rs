//! Ping-coalescing tracker
//!
//! Owns one ping queue per category and turns queued pings into persisted
//! time entries. A flush runs synchronously on the submitting thread, under
//! that category's lock, inside a single store transaction.
//!
//! # Architecture
//!
//! ```text
//! submit(ping)
//!     │
//!     └──→ PingBuffer[category] (Mutex)
//!             │  len >= flush_threshold
//!             ▼
//!          flush_locked
//!             ├──→ IntervalTx::get_last ──→ coalesce::order_batch
//!             ├──→ coalesce::candidates ──→ coalesce::reconcile
//!             ├──→ IntervalTx (update tail, append rows) ──→ commit
//!             └──→ queue.clear() ──→ FlushObserver events
//! ```
//!
//! A failed flush rolls back and leaves the queue as it was, so the same
//! pings are retried by the next submit or explicit flush.
//!
//! # Generations
//!
//! Each daemon run has a generation number persisted in the store. An
//! unclean prior shutdown bumps it; rows left open by an earlier generation
//! are never extended, only closed.

pub mod buffer;
pub mod coalesce;
pub mod observer;

pub use buffer::{PingBuffer, DEFAULT_FLUSH_THRESHOLD};
pub use observer::{CloseReason, FlushEvent, FlushObserver, LoggingObserver};

use crate::liveness::PriorShutdown;
use crate::model::{now_millis, Category, Ping, TimeEntry, UnknownCategory};
use crate::store::{IntervalStore, IntervalTx, StoreError};
use coalesce::{Plan, ReconcileContext, TailUpdate};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Default largest gap (ms) across which a closed interval is still extended
pub const DEFAULT_MERGE_GAP_MS: i64 = 5000;

/// Rejections and failures surfaced to ping submitters
#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error(transparent)]
    UnknownCategory(#[from] UnknownCategory),

    #[error("{0} ping has an empty origin")]
    EmptyOrigin(Category),

    #[error("flush failed: {0}")]
    Store(#[from] StoreError),
}

/// Tracker tuning
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Queued pings per category that trigger a flush
    pub flush_threshold: usize,
    /// Largest gap across which a closed interval of the same origin is extended
    pub merge_gap_ms: i64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            merge_gap_ms: DEFAULT_MERGE_GAP_MS,
        }
    }
}

/// Whether a flush leaves the trailing interval open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Regular flush; the newest interval stays open for later pings
    Rolling,
    /// Shutdown flush; every interval is closed at `now` at the latest
    Final { now: i64 },
}

/// What a single flush wrote
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub category: Option<Category>,
    /// Pings consumed from the queue
    pub pings: usize,
    /// Pings dropped for being older than the persisted floor
    pub discarded: usize,
    pub merged: bool,
    pub closed: bool,
    pub inserted: usize,
}

/// Result of a successful submit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Ping queued; `pending` pings now wait in its category
    Buffered { pending: usize },
    /// Ping completed a batch that was flushed
    Flushed(FlushReport),
}

/// Counters for observability of the tracker itself
#[derive(Debug, Default)]
pub struct TrackerMetrics {
    pub pings_accepted: AtomicU64,
    pub pings_discarded: AtomicU64,
    pub flushes: AtomicU64,
    pub flushes_failed: AtomicU64,
    pub entries_inserted: AtomicU64,
    pub entries_merged: AtomicU64,
    pub entries_closed: AtomicU64,
    /// Total flush latency (for averaging)
    pub flush_latency_us: AtomicU64,
}

impl TrackerMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        let flushes = self.flushes.load(Ordering::Relaxed);
        MetricsSnapshot {
            pings_accepted: self.pings_accepted.load(Ordering::Relaxed),
            pings_discarded: self.pings_discarded.load(Ordering::Relaxed),
            flushes,
            flushes_failed: self.flushes_failed.load(Ordering::Relaxed),
            entries_inserted: self.entries_inserted.load(Ordering::Relaxed),
            entries_merged: self.entries_merged.load(Ordering::Relaxed),
            entries_closed: self.entries_closed.load(Ordering::Relaxed),
            avg_flush_latency_us: if flushes > 0 {
                self.flush_latency_us.load(Ordering::Relaxed) / flushes
            } else {
                0
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub pings_accepted: u64,
    pub pings_discarded: u64,
    pub flushes: u64,
    pub flushes_failed: u64,
    pub entries_inserted: u64,
    pub entries_merged: u64,
    pub entries_closed: u64,
    pub avg_flush_latency_us: u64,
}

/// The coalescing engine
pub struct Tracker {
    store: IntervalStore,
    buffer: PingBuffer,
    merge_gap_ms: i64,
    generation: i64,
    prior_heartbeat: Option<i64>,
    observers: Vec<Arc<dyn FlushObserver>>,
    metrics: Arc<TrackerMetrics>,
}

impl Tracker {
    /// Create a tracker over `store`
    ///
    /// Reads the persisted generation and, if `prior` reports an unclean
    /// shutdown, starts a new one.
    pub fn new(
        store: IntervalStore,
        config: TrackerConfig,
        prior: PriorShutdown,
    ) -> Result<Self, TrackError> {
        let tx = store.transaction()?;
        let mut generation = tx.generation()?;
        if !prior.is_clean() {
            generation += 1;
            tx.set_generation(generation)?;
        }
        tx.commit()?;

        tracing::info!(
            generation,
            clean_restart = prior.is_clean(),
            flush_threshold = config.flush_threshold,
            "Tracker ready"
        );

        Ok(Self {
            store,
            buffer: PingBuffer::new(config.flush_threshold),
            merge_gap_ms: config.merge_gap_ms,
            generation,
            prior_heartbeat: prior.last_heartbeat(),
            observers: Vec::new(),
            metrics: Arc::new(TrackerMetrics::default()),
        })
    }

    /// Register an observer
    ///
    /// Observers are called in registration order.
    pub fn register(&mut self, observer: Arc<dyn FlushObserver>) {
        tracing::debug!(observer = observer.name(), "Registered flush observer");
        self.observers.push(observer);
    }

    pub fn store(&self) -> &IntervalStore {
        &self.store
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn flush_threshold(&self) -> usize {
        self.buffer.threshold()
    }

    pub fn pending(&self, category: Category) -> usize {
        self.buffer.pending(category)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ingestion
    // ─────────────────────────────────────────────────────────────────────────

    /// Parse and submit a ping from untyped input
    pub fn submit_raw(
        &self,
        category: &str,
        origin: &str,
        timestamp: i64,
    ) -> Result<SubmitOutcome, TrackError> {
        let category: Category = category.parse()?;
        self.submit(Ping::new(category, origin, timestamp))
    }

    /// Queue a ping, flushing its category once the threshold is reached
    ///
    /// If the flush fails the ping stays queued and the store error is
    /// returned.
    pub fn submit(&self, ping: Ping) -> Result<SubmitOutcome, TrackError> {
        if ping.origin.trim().is_empty() {
            return Err(TrackError::EmptyOrigin(ping.category));
        }

        let category = ping.category;
        let mut queue = self.buffer.lock(category);
        tracing::trace!("Queued {}", ping);
        queue.push(ping);
        self.metrics.pings_accepted.fetch_add(1, Ordering::Relaxed);

        if !self.buffer.is_full(&queue) {
            return Ok(SubmitOutcome::Buffered {
                pending: queue.len(),
            });
        }

        let report = self.flush_locked(category, &mut queue, FlushMode::Rolling)?;
        Ok(SubmitOutcome::Flushed(report))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Flushing
    // ─────────────────────────────────────────────────────────────────────────

    /// Flush whatever is queued for `category`, leaving the newest interval open
    pub fn flush(&self, category: Category) -> Result<FlushReport, TrackError> {
        let mut queue = self.buffer.lock(category);
        self.flush_locked(category, &mut queue, FlushMode::Rolling)
    }

    /// Flush every category
    ///
    /// All categories are attempted; the first error is returned.
    pub fn flush_all(&self) -> Result<Vec<FlushReport>, TrackError> {
        self.for_each_category(|category| self.flush(category))
    }

    /// Final flush: close every interval at `now` at the latest
    ///
    /// Categories with nothing queued still get their open tail closed.
    pub fn shutdown_at(&self, now: i64) -> Result<Vec<FlushReport>, TrackError> {
        self.for_each_category(|category| {
            let mut queue = self.buffer.lock(category);
            self.flush_locked(category, &mut queue, FlushMode::Final { now })
        })
    }

    pub fn shutdown(&self) -> Result<Vec<FlushReport>, TrackError> {
        self.shutdown_at(now_millis())
    }

    fn for_each_category(
        &self,
        mut f: impl FnMut(Category) -> Result<FlushReport, TrackError>,
    ) -> Result<Vec<FlushReport>, TrackError> {
        let mut reports = Vec::with_capacity(Category::ALL.len());
        let mut first_error = None;
        for category in Category::ALL {
            match f(category) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }

    fn flush_locked(
        &self,
        category: Category,
        queue: &mut Vec<Ping>,
        mode: FlushMode,
    ) -> Result<FlushReport, TrackError> {
        if queue.is_empty() && mode == FlushMode::Rolling {
            return Ok(FlushReport {
                category: Some(category),
                ..Default::default()
            });
        }

        let start = Instant::now();
        let (report, events) = match self.write_flush(category, queue, mode) {
            Ok(done) => done,
            Err(e) => {
                self.metrics.flushes_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    category = %category,
                    pending = queue.len(),
                    "Flush failed, keeping queue for retry: {}",
                    e
                );
                return Err(e.into());
            }
        };
        queue.clear();

        let latency = start.elapsed().as_micros() as u64;
        let m = &self.metrics;
        m.flushes.fetch_add(1, Ordering::Relaxed);
        m.flush_latency_us.fetch_add(latency, Ordering::Relaxed);
        m.pings_discarded
            .fetch_add(report.discarded as u64, Ordering::Relaxed);
        m.entries_inserted
            .fetch_add(report.inserted as u64, Ordering::Relaxed);
        m.entries_merged
            .fetch_add(report.merged as u64, Ordering::Relaxed);
        m.entries_closed
            .fetch_add(report.closed as u64, Ordering::Relaxed);

        tracing::trace!(
            category = %category,
            pings = report.pings,
            inserted = report.inserted,
            "Flushed in {}µs",
            latency
        );

        for event in &events {
            for observer in &self.observers {
                observer.on_event(event);
            }
        }

        Ok(report)
    }

    /// Compute and apply one flush inside a single transaction
    fn write_flush(
        &self,
        category: Category,
        queue: &[Ping],
        mode: FlushMode,
    ) -> Result<(FlushReport, Vec<FlushEvent>), StoreError> {
        let tx = self.store.transaction()?;
        let last: Option<TimeEntry> = tx.get_last(category)?.map(|stored| stored.entry);

        let floor = last.as_ref().map(coalesce::persisted_floor);
        let batch = coalesce::order_batch(queue.to_vec(), floor);
        let mut candidates = coalesce::candidates(&batch.pings);

        let ctx = ReconcileContext {
            generation: self.generation,
            merge_gap_ms: self.merge_gap_ms,
            prior_heartbeat: self.prior_heartbeat,
        };
        let plan = match mode {
            FlushMode::Final { now } if candidates.is_empty() => {
                coalesce::close_open_tail(last.as_ref(), now, &ctx)
            }
            FlushMode::Final { now } => {
                coalesce::close_trailing(&mut candidates, now);
                coalesce::reconcile(category, last.as_ref(), candidates, &ctx)
            }
            FlushMode::Rolling => coalesce::reconcile(category, last.as_ref(), candidates, &ctx),
        };

        if plan.is_empty() {
            tracing::trace!(category = %category, "Flush leaves the store unchanged");
        }

        let mut report = FlushReport {
            category: Some(category),
            pings: queue.len(),
            discarded: batch.discarded,
            ..Default::default()
        };
        let mut events = Vec::new();

        if batch.discarded > 0 {
            events.push(FlushEvent::Discarded {
                category,
                count: batch.discarded,
                floor: floor.unwrap_or_default(),
            });
        }

        self.apply_plan(&tx, category, last.as_ref(), plan, &mut report, &mut events)?;
        tx.commit()?;

        Ok((report, events))
    }

    fn apply_plan(
        &self,
        tx: &IntervalTx,
        category: Category,
        last: Option<&TimeEntry>,
        plan: Plan,
        report: &mut FlushReport,
        events: &mut Vec<FlushEvent>,
    ) -> Result<(), StoreError> {
        if let (Some(update), Some(last)) = (plan.tail, last) {
            match update {
                TailUpdate::Extend { to } => {
                    tx.update_last_to_timestamp(category, to)?;
                    report.merged = true;
                    events.push(FlushEvent::Merged {
                        category,
                        origin: last.origin.clone(),
                        from: last.from_timestamp,
                        to,
                    });
                }
                TailUpdate::Close { at, reason } => {
                    tx.update_last_to_timestamp(category, at)?;
                    report.closed = true;
                    events.push(FlushEvent::Closed {
                        category,
                        origin: last.origin.clone(),
                        from: last.from_timestamp,
                        at,
                        reason,
                    });
                }
            }
        }

        for entry in plan.inserts {
            tx.append(&entry)?;
            report.inserted += 1;
            events.push(FlushEvent::Inserted { entry });
        }

        Ok(())
    }
}
