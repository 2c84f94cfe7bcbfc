//! Recurring status and cache-stats polling.
//!
//! Every tick spawns two independent fetches. Each one applies its own response as
//! soon as it lands, tagged with its tick so late responses from an earlier tick (or an
//! earlier polling session) are dropped instead of overwriting newer state.

use super::state::{ApplyOutcome, SharedPipeline, Tick};
use crate::backend::{BackendClient, BackendError};
use crate::model::{PollEvent, PollTrack};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A single failed poll fetch. Contained to its tick and track.
#[derive(Debug, thiserror::Error)]
#[error("{track} poll failed: {source}")]
pub struct PollError {
    pub track: PollTrack,
    #[source]
    pub source: BackendError,
}

pub struct StatusPoller {
    client: BackendClient,
    shared: SharedPipeline,
    event_tx: UnboundedSender<PollEvent>,
}

impl StatusPoller {
    pub fn new(
        client: BackendClient,
        shared: SharedPipeline,
        event_tx: UnboundedSender<PollEvent>,
    ) -> Self {
        Self {
            client,
            shared,
            event_tx,
        }
    }

    /// Start polling at `interval`. The first tick fires immediately.
    pub fn start(self, interval: Duration) -> PollHandle {
        let epoch = self.shared.open();
        let cancel = CancellationToken::new();
        let shared = self.shared.clone();
        let task = tokio::spawn(poll_loop(self, epoch, interval, cancel.clone()));
        PollHandle {
            shared,
            epoch,
            cancel,
            task,
        }
    }
}

/// Owner of a running poll loop. Dropping the handle stops the loop.
pub struct PollHandle {
    shared: SharedPipeline,
    epoch: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Stop polling. Once this returns, no further tick fires and no in-flight response
    /// is applied. Safe to call more than once.
    pub fn stop(&self) {
        self.shared.close(self.epoch);
        self.cancel.cancel();
        self.task.abort();
    }

    #[cfg(test)]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(
    poller: StatusPoller,
    epoch: u64,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut ticks = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(tick) = poller.shared.issue_tick(epoch) else {
                    break;
                };
                ticks += 1;
                // Not awaited: a slow response must not delay the next tick.
                tokio::spawn(fetch_status(
                    poller.client.clone(),
                    poller.shared.clone(),
                    poller.event_tx.clone(),
                    cancel.clone(),
                    tick,
                ));
                tokio::spawn(fetch_cache_stats(
                    poller.client.clone(),
                    poller.shared.clone(),
                    poller.event_tx.clone(),
                    cancel.clone(),
                    tick,
                ));
            }
        }
    }
    debug!(epoch, ticks, "poll loop stopped");
}

async fn fetch_status(
    client: BackendClient,
    shared: SharedPipeline,
    event_tx: UnboundedSender<PollEvent>,
    cancel: CancellationToken,
    tick: Tick,
) {
    let res = tokio::select! {
        _ = cancel.cancelled() => return,
        r = client.status() => r,
    };
    match res {
        Ok(snapshot) => {
            let outcome = shared.apply_status(tick, &snapshot, Instant::now());
            report(&event_tx, PollTrack::Status, tick.seq(), outcome);
        }
        Err(source) => fail(&event_tx, PollTrack::Status, tick.seq(), source),
    }
}

async fn fetch_cache_stats(
    client: BackendClient,
    shared: SharedPipeline,
    event_tx: UnboundedSender<PollEvent>,
    cancel: CancellationToken,
    tick: Tick,
) {
    let res = tokio::select! {
        _ = cancel.cancelled() => return,
        r = client.cache_stats() => r,
    };
    match res {
        Ok(stats) => {
            let outcome = shared.apply_cache_stats(tick, stats);
            report(&event_tx, PollTrack::Cache, tick.seq(), outcome);
        }
        Err(source) => fail(&event_tx, PollTrack::Cache, tick.seq(), source),
    }
}

fn report(event_tx: &UnboundedSender<PollEvent>, track: PollTrack, seq: u64, outcome: ApplyOutcome) {
    let ev = match outcome {
        ApplyOutcome::Applied => {
            debug!(%track, seq, "applied poll response");
            match track {
                PollTrack::Status => PollEvent::StatusApplied,
                PollTrack::Cache => PollEvent::CacheApplied,
            }
        }
        ApplyOutcome::Stale => {
            debug!(%track, seq, "discarding out-of-order poll response");
            PollEvent::StaleDiscarded
        }
        ApplyOutcome::Stopped => return,
    };
    let _ = event_tx.send(ev);
}

fn fail(event_tx: &UnboundedSender<PollEvent>, track: PollTrack, seq: u64, source: BackendError) {
    let timed_out = source.is_timeout();
    let err = PollError { track, source };
    warn!(seq, timed_out, "{err}");
    let _ = event_tx.send(PollEvent::TickFailed {
        track,
        message: err.to_string(),
    });
}
