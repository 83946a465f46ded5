// ============================================================
// Layer 3 — Running Average
// ============================================================
// Weighted running mean of a scalar across steps. Each call to
// `update(value, n)` counts `value` n times, so a batch of 32
// weighs four times as much as a trailing batch of 8.
//
// One meter per phase (train or validate), reset each epoch
// simply by building a new one.

#[derive(Debug, Clone, Default)]
pub struct AverageMeter {
    sum:   f64,
    count: usize,
    last:  f64,
}

impl AverageMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64, n: usize) {
        self.last   = value;
        self.sum   += value * n as f64;
        self.count += n;
    }

    /// Mean so far, NaN before the first update.
    pub fn avg(&self) -> f64 {
        if self.count == 0 { f64::NAN } else { self.sum / self.count as f64 }
    }

    pub fn last(&self) -> f64 {
        self.last
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_mean() {
        let mut m = AverageMeter::new();
        m.update(1.0, 3);
        m.update(5.0, 1);
        assert_eq!(m.avg(), 2.0);
        assert_eq!(m.last(), 5.0);
        assert_eq!(m.count(), 4);
    }

    #[test]
    fn test_empty_meter_is_nan() {
        assert!(AverageMeter::new().avg().is_nan());
    }
}
