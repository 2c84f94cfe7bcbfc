//! Authoritative client-side view of the pipeline.
//!
//! The reconciler is the only writer of phase states, the result set and run timers.
//! Snapshots are applied last-write-wins on whole objects, so re-applying a snapshot
//! never changes anything.

use crate::model::{Lead, Phase, PhaseState, StatusSnapshot};
use std::time::{Duration, Instant};
use tracing::info;

/// How long a triggered-but-unconfirmed phase may stay pending while snapshots keep
/// reporting it idle.
pub const PENDING_GRACE: Duration = Duration::from_secs(5);

/// Local lifecycle of one phase, layered over the backend-reported state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    /// A trigger was accepted but no snapshot has confirmed the run yet.
    Pending { since: Instant },
    /// Confirmed running; `started` is the run timer.
    Running { started: Instant },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseView {
    pub phase: Phase,
    pub state: PhaseState,
    pub activity: Activity,
}

impl PhaseView {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            state: PhaseState::default(),
            activity: Activity::Idle,
        }
    }

    /// The run timer, present only while the backend confirms the phase running.
    pub fn started_at(&self) -> Option<Instant> {
        match self.activity {
            Activity::Running { started } => Some(started),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.activity, Activity::Pending { .. })
    }
}

/// Read-only copy of the reconciler state handed to presentation layers.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineView {
    pub phases: [PhaseView; 3],
    pub results: Vec<Lead>,
    pub snapshots_applied: u64,
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    phases: [PhaseView; 3],
    results: Vec<Lead>,
    snapshots_applied: u64,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            phases: Phase::ALL.map(PhaseView::new),
            results: Vec::new(),
            snapshots_applied: 0,
        }
    }

    /// Fold one backend snapshot into local state.
    pub fn apply(&mut self, snapshot: &StatusSnapshot, now: Instant) {
        for phase in Phase::ALL {
            let incoming = snapshot.phase(phase);
            let view = &mut self.phases[phase.index()];

            view.activity = match (view.activity, incoming.is_running) {
                (Activity::Running { started }, true) => Activity::Running { started },
                (_, true) => {
                    info!(%phase, "phase confirmed running");
                    Activity::Running { started: now }
                }
                (Activity::Running { .. }, false) => {
                    info!(%phase, progress = incoming.progress, total = incoming.total, "phase finished");
                    Activity::Idle
                }
                (Activity::Pending { since }, false) => {
                    if now.saturating_duration_since(since) > PENDING_GRACE {
                        info!(%phase, "trigger was not confirmed by the backend");
                        Activity::Idle
                    } else {
                        Activity::Pending { since }
                    }
                }
                (Activity::Idle, false) => Activity::Idle,
            };

            view.state = incoming.clone();
        }

        if !snapshot.scraping.results.is_empty() {
            self.results = snapshot.scraping.results.clone();
        }
        self.snapshots_applied += 1;
    }

    /// Record that a trigger for `phase` was accepted by the backend.
    ///
    /// Has no effect on a phase that is already confirmed running.
    pub fn mark_pending(&mut self, phase: Phase, now: Instant) {
        let view = &mut self.phases[phase.index()];
        if let Activity::Idle = view.activity {
            view.activity = Activity::Pending { since: now };
        }
    }

    #[cfg(test)]
    pub fn phase(&self, phase: Phase) -> &PhaseView {
        &self.phases[phase.index()]
    }

    pub fn results(&self) -> &[Lead] {
        &self.results
    }

    pub fn view(&self) -> PipelineView {
        PipelineView {
            phases: self.phases.clone(),
            results: self.results.clone(),
            snapshots_applied: self.snapshots_applied,
        }
    }
}
