//! Remaining-time extrapolation from partial progress.

use std::time::{Duration, Instant};

/// Linearly extrapolate the time left for a phase.
///
/// Returns `None` when there is nothing to extrapolate from: no start instant, no
/// completed items, or an unknown total. A `progress` above `total` (a stale total
/// racing a fresh progress count) yields zero rather than a negative duration.
pub fn estimate(
    progress: u64,
    total: u64,
    start: Option<Instant>,
    now: Instant,
) -> Option<Duration> {
    let start = start?;
    if progress == 0 || total == 0 {
        return None;
    }
    // Whole nanoseconds: exact results must floor to themselves.
    let elapsed = now.saturating_duration_since(start).as_nanos();
    let left = u128::from(total.saturating_sub(progress));
    let remaining = elapsed * left / u128::from(progress);
    let secs = u64::try_from(remaining / 1_000_000_000).unwrap_or(u64::MAX);
    Some(Duration::from_secs(secs))
}

/// Render a duration as `"{minutes}m {seconds}s"`.
pub fn format_eta(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}m {}s", secs / 60, secs % 60)
}
