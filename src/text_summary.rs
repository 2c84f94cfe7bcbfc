//! Text rendering of a projection for CLI output.

use crate::model::{BusinessLine, CacheStats, Phase};
use crate::projection::{PhaseProjection, Projection};
use anyhow::Result;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Scrape => "Scrape",
        Phase::Enrich => "Enrich",
        Phase::Validate => "Validate",
    }
}

pub(crate) fn phase_line(p: &PhaseProjection) -> String {
    let state = if p.running {
        "running"
    } else if p.pending {
        "starting"
    } else {
        "idle"
    };
    let mut line = format!(
        "{:<9}{:<9}{:>4} / {:<4}{:>4.0}%",
        phase_label(p.phase),
        state,
        p.progress,
        p.total,
        p.percent
    );
    if let (Some(kept), Some(removed)) = (p.validated, p.removed) {
        if p.running || kept + removed > 0 {
            line.push_str(&format!("  kept {kept} removed {removed}"));
        }
    }
    if let Some(eta) = p.eta.as_deref() {
        line.push_str(&format!("  eta {eta}"));
    }
    if let Some(item) = p.current_item.as_deref() {
        line.push_str(&format!("  {item}"));
    }
    if let Some(err) = p.error.as_deref() {
        line.push_str(&format!("  error: {err}"));
    }
    line
}

pub(crate) fn cache_line(stats: &CacheStats) -> String {
    format!("Cache: {} entries ({:.1} KB)", stats.entries, stats.size_kb)
}

/// Pre-formatted lines describing the whole pipeline.
pub(crate) fn build_status_lines(p: &Projection) -> Vec<String> {
    let mut lines: Vec<String> = p.phases.iter().map(phase_line).collect();
    lines.push(format!(
        "Results: {} leads, {} with contacts, {} verified on Finder",
        p.results.total, p.results.with_contacts, p.results.verified_on_finder
    ));
    if let Some(cache) = p.cache.as_ref().filter(|c| c.entries > 0) {
        lines.push(cache_line(cache));
    }
    lines
}

#[derive(Serialize)]
struct Stamped<'a> {
    observed_at: String,
    #[serde(flatten)]
    projection: &'a Projection,
}

/// One compact JSON object per projection, stamped with the wall-clock time it was taken.
pub(crate) fn json_line(p: &Projection, observed_at: OffsetDateTime) -> Result<String> {
    let stamped = Stamped {
        observed_at: observed_at.format(&Rfc3339)?,
        projection: p,
    };
    Ok(serde_json::to_string(&stamped)?)
}

pub(crate) fn business_line_lines(lines: &[BusinessLine]) -> Vec<String> {
    lines
        .iter()
        .map(|bl| format!("{:<6} {}", bl.code, bl.name))
        .collect()
}
