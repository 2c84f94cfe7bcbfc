//! Display-ready values derived from the pipeline view. Recomputed on demand.

use crate::estimate::{estimate, format_eta};
use crate::model::{CacheStats, Lead, Phase, PhaseState};
use crate::orchestrator::{PhaseView, PipelineView};
use serde::Serialize;
use std::time::{Duration, Instant};

/// Completion percentage in `[0, 100]`; zero while the total is unknown.
pub fn percent(state: &PhaseState) -> f64 {
    if state.total == 0 {
        return 0.0;
    }
    (100.0 * state.progress as f64 / state.total as f64).clamp(0.0, 100.0)
}

/// Remaining time for a phase, only once the backend has confirmed it running.
pub fn estimated_time_remaining(view: &PhaseView, now: Instant) -> Option<Duration> {
    if !view.state.is_running {
        return None;
    }
    estimate(view.state.progress, view.state.total, view.started_at(), now)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SummaryCounts {
    pub total: usize,
    pub with_contacts: usize,
    pub verified_on_finder: usize,
}

pub fn summary_counts(results: &[Lead]) -> SummaryCounts {
    results.iter().fold(
        SummaryCounts {
            total: results.len(),
            ..Default::default()
        },
        |mut acc, lead| {
            if lead.has_contacts() {
                acc.with_contacts += 1;
            }
            if lead.verified_on_finder() {
                acc.verified_on_finder += 1;
            }
            acc
        },
    )
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseProjection {
    pub phase: Phase,
    pub running: bool,
    pub pending: bool,
    pub progress: u64,
    pub total: u64,
    pub percent: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_item: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validated: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub phases: Vec<PhaseProjection>,
    pub results: SummaryCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
}

impl Projection {
    pub fn phase(&self, phase: Phase) -> Option<&PhaseProjection> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn any_active(&self) -> bool {
        self.phases.iter().any(|p| p.running || p.pending)
    }
}

pub fn project_phase(view: &PhaseView, now: Instant) -> PhaseProjection {
    let state = &view.state;
    let is_validate = view.phase == Phase::Validate;
    PhaseProjection {
        phase: view.phase,
        running: state.is_running,
        pending: view.is_pending(),
        progress: state.progress,
        total: state.total,
        percent: percent(state),
        eta: estimated_time_remaining(view, now).map(format_eta),
        current_item: state.current_item.clone().filter(|_| state.is_running),
        validated: is_validate.then_some(state.validated_count),
        removed: is_validate.then_some(state.removed_count),
        error: state.error.clone(),
    }
}

pub fn project(view: &PipelineView, cache: Option<CacheStats>, now: Instant) -> Projection {
    Projection {
        phases: view.phases.iter().map(|p| project_phase(p, now)).collect(),
        results: summary_counts(&view.results),
        cache,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ScrapeStatus, StatusSnapshot};
    use crate::orchestrator::Reconciler;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn percent_guards_zero_total_and_clamps() {
        let mut s = PhaseState {
            progress: 3,
            total: 0,
            ..Default::default()
        };
        assert_eq!(percent(&s), 0.0);
        s.total = 15;
        assert_eq!(percent(&s), 20.0);
        s.progress = 20;
        assert_eq!(percent(&s), 100.0);
    }

    #[test]
    fn scraping_scenario_twenty_percent_and_48s() {
        let t0 = Instant::now();
        let mut r = Reconciler::new();
        let snap = StatusSnapshot {
            scraping: ScrapeStatus {
                state: PhaseState {
                    is_running: true,
                    progress: 3,
                    total: 15,
                    current_item: Some("Acme Oy".into()),
                    ..Default::default()
                },
                results: Vec::new(),
            },
            ..Default::default()
        };
        r.apply(&snap, t0);
        let p = project(&r.view(), None, t0 + Duration::from_secs(12));
        let scrape = p.phase(Phase::Scrape).unwrap();
        assert_eq!(scrape.percent, 20.0);
        assert_eq!(scrape.eta.as_deref(), Some("0m 48s"));
        assert_eq!(scrape.current_item.as_deref(), Some("Acme Oy"));
        assert!(p.any_active());
    }

    #[test]
    fn validation_scenario_complete() {
        let t0 = Instant::now();
        let mut r = Reconciler::new();
        let snap = StatusSnapshot {
            validation: PhaseState {
                is_running: true,
                progress: 10,
                total: 10,
                validated_count: 8,
                removed_count: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        r.apply(&snap, t0);
        let p = project(&r.view(), None, t0 + Duration::from_secs(30));
        let v = p.phase(Phase::Validate).unwrap();
        assert_eq!(v.percent, 100.0);
        assert_eq!(v.eta.as_deref(), Some("0m 0s"));
        assert_eq!((v.validated, v.removed), (Some(8), Some(2)));
        assert_eq!(p.phase(Phase::Scrape).unwrap().validated, None);
    }

    #[test]
    fn pending_phase_has_no_eta() {
        let t0 = Instant::now();
        let mut r = Reconciler::new();
        r.mark_pending(Phase::Scrape, t0);
        let p = project(&r.view(), None, t0 + Duration::from_secs(2));
        let scrape = p.phase(Phase::Scrape).unwrap();
        assert!(scrape.pending);
        assert_eq!(scrape.eta, None);
        assert!(p.any_active());
    }

    #[test]
    fn counts_contacts_and_verified() {
        let leads: Vec<Lead> = serde_json::from_value(json!([
            {"business_id": "1", "name": "A", "contact_info": {"emails": ["a@a.fi"]}},
            {"business_id": "2", "name": "B", "contact_info": {"contacts": [{"name": "X"}]},
             "finder_data": {"verified_on_finder": true}},
            {"business_id": "3", "name": "C", "finder_data": {"verified_on_finder": false}},
            {"business_id": "4", "name": "D"}
        ]))
        .unwrap();
        assert_eq!(
            summary_counts(&leads),
            SummaryCounts {
                total: 4,
                with_contacts: 2,
                verified_on_finder: 1,
            }
        );
    }
}
