use std::f64::consts::PI;

/// Per-epoch cosine annealing:
///
///   lr(e) = min + (base - min) · (1 + cos(π · e / T_max)) / 2
///
/// Past T_max the cosine keeps going, so the rate climbs back toward
/// `base_lr` over the second half of a run with T_max = epochs / 2.
#[derive(Debug, Clone, Copy)]
pub struct CosineAnnealing {
    pub base_lr: f64,
    pub min_lr:  f64,
    /// Half-period in epochs; fractional for odd run lengths
    pub t_max:   f64,
}

impl CosineAnnealing {
    pub fn new(base_lr: f64, min_lr: f64, t_max: f64) -> Self {
        Self { base_lr, min_lr, t_max: if t_max > 0.0 { t_max } else { 1.0 } }
    }

    /// Schedule over a whole run: half-period of `epochs / 2`, so a
    /// 5-epoch run has T_max = 2.5.
    pub fn for_run(base_lr: f64, min_lr: f64, epochs: usize) -> Self {
        Self::new(base_lr, min_lr, epochs as f64 / 2.0)
    }

    /// Rate for zero-based epoch index `epoch`.
    pub fn lr_at(&self, epoch: usize) -> f64 {
        let phase = PI * epoch as f64 / self.t_max;
        self.min_lr + (self.base_lr - self.min_lr) * (1.0 + phase.cos()) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        let sched = CosineAnnealing::for_run(0.1, 0.001, 10);
        assert!((sched.lr_at(0) - 0.1).abs() < 1e-12);
        assert!((sched.lr_at(5) - 0.001).abs() < 1e-12);
        assert!((sched.lr_at(10) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_midpoint_and_monotone_first_half() {
        let sched = CosineAnnealing::new(1.0, 0.0, 4.0);
        assert!((sched.lr_at(2) - 0.5).abs() < 1e-12);
        let rates: Vec<f64> = (0..=4).map(|e| sched.lr_at(e)).collect();
        assert!(rates.windows(2).all(|w| w[1] < w[0]));
    }

    #[test]
    fn test_single_epoch_run_does_not_divide_by_zero() {
        let sched = CosineAnnealing::for_run(0.05, 0.0, 1);
        assert!(sched.lr_at(0).is_finite());
    }

    #[test]
    fn test_odd_epoch_count_uses_fractional_period() {
        let sched = CosineAnnealing::for_run(0.025, 0.001, 5);
        let expected = [0.025, 0.016708, 0.003292, 0.003292, 0.016708];
        for (epoch, want) in expected.iter().enumerate() {
            let got = sched.lr_at(epoch);
            assert!((got - want).abs() < 1e-6, "epoch {epoch}: {got} vs {want}");
        }
    }
}
