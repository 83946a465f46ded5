// ============================================================
// Layer 3 — Best Model State
// ============================================================
// Tracks the best validation metric seen in a run. Owned by the
// epoch loop and updated exactly once per epoch; the returned
// flag tags that epoch's checkpoint as "best".
//
// Starts at -inf so the first epoch always produces a best
// checkpoint, even for metrics that can be negative (MCC).

#[derive(Debug, Clone)]
pub struct BestModelState {
    best:    f64,
    best_at: Option<usize>,
}

impl Default for BestModelState {
    fn default() -> Self {
        Self { best: f64::NEG_INFINITY, best_at: None }
    }
}

impl BestModelState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the metric for `epoch`. Returns true when it is strictly
    /// greater than everything seen before. NaN never wins.
    pub fn observe(&mut self, epoch: usize, metric: f64) -> bool {
        let improved = metric > self.best;
        if improved {
            self.best    = metric;
            self.best_at = Some(epoch);
        }
        improved
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_at
    }
}
