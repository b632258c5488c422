//! CostTracker (§4.10): enforces the per-Run hard budget ceiling.
//!
//! Costs are tracked as fixed-point micro-dollars in an `AtomicU64` so the
//! Runner's concurrent per-question tasks can record spend without a mutex,
//! mirroring the teacher's atomic-counter idiom for concurrent progress state
//! (`embedding`'s pending-count style, generalized from a count to a total).

use std::sync::atomic::{AtomicU64, Ordering};

const MICROS_PER_USD: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct CostSnapshot {
    pub baseline_usd: f64,
    pub enhanced_usd: f64,
    pub total_usd: f64,
}

/// Tracks baseline/enhanced spend for a single Run and rejects further
/// spending once `ceiling_usd` would be exceeded.
pub struct CostTracker {
    ceiling_usd: f64,
    baseline_micros: AtomicU64,
    enhanced_micros: AtomicU64,
}

impl CostTracker {
    pub fn new(ceiling_usd: f64) -> Self {
        CostTracker {
            ceiling_usd,
            baseline_micros: AtomicU64::new(0),
            enhanced_micros: AtomicU64::new(0),
        }
    }

    /// Record `cost_usd` spent on the baseline mode. The cost is always
    /// recorded, regardless of whether it crosses the ceiling, so the
    /// overage is visible in the final rollups. Returns `true` once the
    /// running total has crossed the ceiling; the caller decides what to do
    /// with that (§4.10, §4.11 — the Run's own terminal-state logic is the
    /// only place that turns this into `status=failed`).
    pub fn record_baseline(&self, cost_usd: f64) -> bool {
        let new_total = self.add(&self.baseline_micros, cost_usd);
        new_total > self.ceiling_usd
    }

    pub fn record_enhanced(&self, cost_usd: f64) -> bool {
        let new_total = self.add(&self.enhanced_micros, cost_usd);
        new_total > self.ceiling_usd
    }

    fn add(&self, counter: &AtomicU64, cost_usd: f64) -> f64 {
        let micros = (cost_usd.max(0.0) * MICROS_PER_USD).round() as u64;
        counter.fetch_add(micros, Ordering::SeqCst);
        self.total_usd()
    }

    pub fn total_usd(&self) -> f64 {
        self.baseline_usd() + self.enhanced_usd()
    }

    pub fn baseline_usd(&self) -> f64 {
        self.baseline_micros.load(Ordering::SeqCst) as f64 / MICROS_PER_USD
    }

    pub fn enhanced_usd(&self) -> f64 {
        self.enhanced_micros.load(Ordering::SeqCst) as f64 / MICROS_PER_USD
    }

    pub fn snapshot(&self) -> CostSnapshot {
        CostSnapshot {
            baseline_usd: self.baseline_usd(),
            enhanced_usd: self.enhanced_usd(),
            total_usd: self.total_usd(),
        }
    }

    /// Whether the ceiling has already been crossed, for a cheap pre-check
    /// before the Runner starts the next question (§4.10, §5).
    pub fn is_over_budget(&self) -> bool {
        self.total_usd() > self.ceiling_usd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_across_both_modes() {
        let tracker = CostTracker::new(10.0);
        assert!(!tracker.record_baseline(1.5));
        assert!(!tracker.record_enhanced(2.25));
        let snapshot = tracker.snapshot();
        assert!((snapshot.baseline_usd - 1.5).abs() < 1e-9);
        assert!((snapshot.enhanced_usd - 2.25).abs() < 1e-9);
        assert!((snapshot.total_usd - 3.75).abs() < 1e-9);
    }

    #[test]
    fn reports_ceiling_crossed_but_still_records_the_overage() {
        let tracker = CostTracker::new(1.0);
        assert!(!tracker.record_baseline(0.9));
        assert!(tracker.record_enhanced(0.2));
        // the overage itself is still recorded
        assert!((tracker.total_usd() - 1.1).abs() < 1e-9);
    }

    #[test]
    fn is_over_budget_reflects_ceiling_state() {
        let tracker = CostTracker::new(1.0);
        assert!(!tracker.is_over_budget());
        let _ = tracker.record_baseline(1.5);
        assert!(tracker.is_over_budget());
    }
}
