//! Ping coalescing and boundary reconciliation
//!
//! Pure functions, no I/O. A flush runs them in three steps:
//!
//! ```text
//! queued pings ──→ order_batch ──→ candidates ──→ reconcile(last row) ──→ Plan
//!                  (sort, drop      (one per        (merge / close /
//!                   stale pings)     origin run)      insert)
//! ```
//!
//! The resulting `Plan` is applied by the tracker inside one store
//! transaction.

use super::observer::CloseReason;
use crate::model::{Category, Ping, TimeEntry, OPEN_END};

/// An interval built from one run of same-origin pings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub origin: String,
    pub from: i64,
    /// Start of the next run, or `OPEN_END` for the trailing candidate
    pub to: i64,
}

/// Pings ready for coalescing, plus how many were dropped as stale
#[derive(Debug, Default)]
pub struct OrderedBatch {
    pub pings: Vec<Ping>,
    pub discarded: usize,
}

/// Change to the last persisted row of a category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailUpdate {
    /// Same origin continues: move the row's end to `to`
    Extend { to: i64 },
    /// Open row ends at `at` before new rows are appended
    Close { at: i64, reason: CloseReason },
}

/// Everything a flush writes, in application order
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub tail: Option<TailUpdate>,
    pub inserts: Vec<TimeEntry>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.tail.is_none() && self.inserts.is_empty()
    }
}

/// Inputs to boundary reconciliation that do not come from the batch
#[derive(Debug, Clone, Copy)]
pub struct ReconcileContext {
    /// Generation of the running daemon
    pub generation: i64,
    /// Largest gap across which a closed row may still be extended
    pub merge_gap_ms: i64,
    /// Last heartbeat recorded by the previous run, if it died uncleanly
    pub prior_heartbeat: Option<i64>,
}

/// Earliest timestamp a new ping may carry without overlapping `last`
pub fn persisted_floor(last: &TimeEntry) -> i64 {
    if last.is_open() {
        last.from_timestamp
    } else {
        last.to_timestamp
    }
}

/// Stable-sort a batch by timestamp and drop pings below `floor`
pub fn order_batch(mut pings: Vec<Ping>, floor: Option<i64>) -> OrderedBatch {
    pings.sort_by_key(|p| p.timestamp);

    let before = pings.len();
    if let Some(floor) = floor {
        pings.retain(|p| p.timestamp >= floor);
    }

    OrderedBatch {
        discarded: before - pings.len(),
        pings,
    }
}

/// Collapse sorted pings into one candidate per run of equal origin
///
/// Each candidate ends where the next one begins; the last stays open.
pub fn candidates(pings: &[Ping]) -> Vec<Candidate> {
    let mut out: Vec<Candidate> = Vec::new();

    for ping in pings {
        if let Some(current) = out.last_mut() {
            if current.origin == ping.origin {
                continue;
            }
            current.to = ping.timestamp;
        }
        out.push(Candidate {
            origin: ping.origin.clone(),
            from: ping.timestamp,
            to: OPEN_END,
        });
    }

    out
}

/// Close the trailing candidate at `now` (never before its own start)
pub fn close_trailing(candidates: &mut [Candidate], now: i64) {
    if let Some(last) = candidates.last_mut() {
        last.to = now.max(last.from);
    }
}

/// Plan for a final flush with nothing buffered: close an open tail row
///
/// A row left open by an earlier generation ends at that run's last
/// heartbeat, not at `now`.
pub fn close_open_tail(last: Option<&TimeEntry>, now: i64, ctx: &ReconcileContext) -> Plan {
    let tail = last.filter(|e| e.is_open()).map(|e| {
        let lo = e.from_timestamp;
        if e.generation != ctx.generation {
            TailUpdate::Close {
                at: stale_end(ctx, lo, now.max(lo)),
                reason: CloseReason::GenerationBoundary,
            }
        } else {
            TailUpdate::Close {
                at: now.max(lo),
                reason: CloseReason::Shutdown,
            }
        }
    });
    Plan {
        tail,
        inserts: Vec::new(),
    }
}

/// Reconcile candidates against the last persisted row of `category`
pub fn reconcile(
    category: Category,
    last: Option<&TimeEntry>,
    candidates: Vec<Candidate>,
    ctx: &ReconcileContext,
) -> Plan {
    let to_entry = |c: Candidate| TimeEntry {
        category,
        origin: c.origin,
        from_timestamp: c.from,
        to_timestamp: c.to,
        generation: ctx.generation,
    };

    let Some(last) = last else {
        return Plan {
            tail: None,
            inserts: candidates.into_iter().map(to_entry).collect(),
        };
    };

    let mut candidates = candidates.into_iter();
    let Some(first) = candidates.next() else {
        return Plan::default();
    };

    if can_merge(last, &first, ctx) {
        return Plan {
            tail: Some(TailUpdate::Extend { to: first.to }),
            inserts: candidates.map(to_entry).collect(),
        };
    }

    let tail = last.is_open().then(|| close_boundary(last, &first, ctx));
    Plan {
        tail,
        inserts: std::iter::once(first).chain(candidates).map(to_entry).collect(),
    }
}

fn can_merge(last: &TimeEntry, first: &Candidate, ctx: &ReconcileContext) -> bool {
    if last.generation != ctx.generation || last.origin != first.origin {
        return false;
    }
    last.is_open() || first.from - last.to_timestamp <= ctx.merge_gap_ms
}

/// Where and why an open `last` row ends when it cannot be merged
fn close_boundary(last: &TimeEntry, first: &Candidate, ctx: &ReconcileContext) -> TailUpdate {
    let lo = last.from_timestamp;
    let hi = first.from.max(lo);

    if last.generation != ctx.generation {
        return TailUpdate::Close {
            at: stale_end(ctx, lo, hi),
            reason: CloseReason::GenerationBoundary,
        };
    }

    // Same generation and open: only an origin change prevents a merge
    TailUpdate::Close {
        at: hi,
        reason: CloseReason::OriginChanged,
    }
}

/// End of a row left open by a previous run: its last heartbeat within `[lo, hi]`
fn stale_end(ctx: &ReconcileContext, lo: i64, hi: i64) -> i64 {
    ctx.prior_heartbeat
        .map(|hb| hb.clamp(lo, hi))
        .unwrap_or(lo)
}
