//! Pipeline state shared between the poller's fetch tasks and presentation layers.

use super::reconciler::{PipelineView, Reconciler};
use crate::model::{CacheStats, Lead, Phase, PollTrack, StatusSnapshot};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// An equal or newer response for the same track was already applied.
    Stale,
    /// The polling session that issued this tick was stopped or replaced.
    Stopped,
}

/// A poll tick issued by the gate: the polling session it belongs to and its position
/// in the sequence shared by every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    epoch: u64,
    seq: u64,
}

impl Tick {
    pub fn seq(self) -> u64 {
        self.seq
    }
}

/// Issues ticks and admits their responses.
///
/// Sequence numbers never restart, so a late response from an earlier polling session
/// can never outrank a newer one. Each `open` starts a new epoch; responses and
/// `close` calls from an older epoch are ignored.
#[derive(Debug, Default)]
struct SequenceGate {
    epoch: u64,
    issued: u64,
    status: Option<u64>,
    cache: Option<u64>,
    stopped: bool,
}

impl SequenceGate {
    fn open(&mut self) -> u64 {
        self.epoch += 1;
        self.stopped = false;
        self.epoch
    }

    fn close(&mut self, epoch: u64) {
        if epoch == self.epoch {
            self.stopped = true;
        }
    }

    fn issue(&mut self, epoch: u64) -> Option<Tick> {
        if self.stopped || epoch != self.epoch {
            return None;
        }
        self.issued += 1;
        Some(Tick {
            epoch,
            seq: self.issued,
        })
    }

    fn admit(&mut self, track: PollTrack, tick: Tick) -> ApplyOutcome {
        if self.stopped || tick.epoch != self.epoch {
            return ApplyOutcome::Stopped;
        }
        let slot = match track {
            PollTrack::Status => &mut self.status,
            PollTrack::Cache => &mut self.cache,
        };
        match *slot {
            Some(last) if tick.seq <= last => ApplyOutcome::Stale,
            _ => {
                *slot = Some(tick.seq);
                ApplyOutcome::Applied
            }
        }
    }

    /// Mark every tick issued so far as older than a value fetched just now.
    fn supersede(&mut self, track: PollTrack) {
        let slot = match track {
            PollTrack::Status => &mut self.status,
            PollTrack::Cache => &mut self.cache,
        };
        *slot = Some(slot.map_or(self.issued, |last| last.max(self.issued)));
    }
}

#[derive(Debug, Default)]
struct Inner {
    reconciler: Reconciler,
    cache_stats: Option<CacheStats>,
    gate: SequenceGate,
}

/// Cloneable handle to the single owned pipeline state.
///
/// The mutex is held only for the duration of an apply or a view copy, never across
/// an `.await`.
#[derive(Debug, Clone, Default)]
pub struct SharedPipeline {
    inner: Arc<Mutex<Inner>>,
}

impl SharedPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Writes under the lock are whole-object assignments, so a poisoned lock
        // still guards a consistent state.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a polling session. Returns its epoch.
    pub(crate) fn open(&self) -> u64 {
        self.lock().gate.open()
    }

    /// Stop the session `epoch`: every later apply of its ticks reports `Stopped`.
    /// A no-op once a newer session has been opened.
    pub(crate) fn close(&self, epoch: u64) {
        self.lock().gate.close(epoch);
    }

    /// Next tick for session `epoch`, or `None` once that session is closed or replaced.
    pub(crate) fn issue_tick(&self, epoch: u64) -> Option<Tick> {
        self.lock().gate.issue(epoch)
    }

    /// Apply a status response for `tick`.
    pub fn apply_status(&self, tick: Tick, snapshot: &StatusSnapshot, now: Instant) -> ApplyOutcome {
        let mut inner = self.lock();
        let outcome = inner.gate.admit(PollTrack::Status, tick);
        if outcome == ApplyOutcome::Applied {
            inner.reconciler.apply(snapshot, now);
        }
        outcome
    }

    /// Apply a cache-stats response for `tick`.
    pub fn apply_cache_stats(&self, tick: Tick, stats: CacheStats) -> ApplyOutcome {
        let mut inner = self.lock();
        let outcome = inner.gate.admit(PollTrack::Cache, tick);
        if outcome == ApplyOutcome::Applied {
            inner.cache_stats = Some(stats);
        }
        outcome
    }

    /// Apply a snapshot fetched outside the polling loop (one-shot commands).
    pub fn apply_untracked(&self, snapshot: &StatusSnapshot, now: Instant) {
        self.lock().reconciler.apply(snapshot, now);
    }

    /// Replace cache stats with values fetched outside the polling loop, e.g. right
    /// after a cache clear. Responses to ticks issued before this call are stale.
    pub fn refresh_cache_stats(&self, stats: CacheStats) {
        let mut inner = self.lock();
        inner.gate.supersede(PollTrack::Cache);
        inner.cache_stats = Some(stats);
    }

    pub fn mark_pending(&self, phase: Phase, now: Instant) {
        self.lock().reconciler.mark_pending(phase, now);
    }

    pub fn view(&self) -> PipelineView {
        self.lock().reconciler.view()
    }

    /// Current result set, cloned out from under the lock.
    pub fn results(&self) -> Vec<Lead> {
        self.lock().reconciler.results().to_vec()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.lock().cache_stats
    }
}
