use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Warmup + cosine learning-rate schedule.
///
/// A pure function of the iteration counter: linear ramp from 0 to `peak_lr`
/// over `warmup_iters`, cosine decay to `min_lr` over
/// `[warmup_iters, decay_iters]`, clamped to `min_lr` afterwards. Because it
/// depends on nothing but the counter, a resumed run recomputes the exact
/// same sequence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LearningRateSchedule {
    pub peak_lr: f64,
    pub min_lr: f64,
    pub warmup_iters: u64,
    pub decay_iters: u64,
}

impl LearningRateSchedule {
    pub fn lr(&self, iteration: u64) -> f64 {
        if self.warmup_iters > 0 && iteration < self.warmup_iters {
            return self.peak_lr * iteration as f64 / self.warmup_iters as f64;
        }
        if iteration > self.decay_iters {
            return self.min_lr;
        }
        let span = self.decay_iters.saturating_sub(self.warmup_iters);
        let progress = if span == 0 {
            1.0
        } else {
            ((iteration - self.warmup_iters) as f64 / span as f64).clamp(0.0, 1.0)
        };
        let coeff = 0.5 * (1.0 + (PI * progress).cos());
        self.min_lr + coeff * (self.peak_lr - self.min_lr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> LearningRateSchedule {
        LearningRateSchedule {
            peak_lr: 4e-4,
            min_lr: 4e-5,
            warmup_iters: 2_000,
            decay_iters: 100_000,
        }
    }

    #[test]
    fn starts_at_zero() {
        assert_eq!(schedule().lr(0), 0.0);
    }

    #[test]
    fn peaks_at_end_of_warmup() {
        let s = schedule();
        assert!((s.lr(s.warmup_iters) - s.peak_lr).abs() < 1e-12);
    }

    #[test]
    fn clamps_to_min_after_decay() {
        let s = schedule();
        assert!((s.lr(s.decay_iters) - s.min_lr).abs() < 1e-12);
        assert_eq!(s.lr(s.decay_iters + 1), s.min_lr);
        assert_eq!(s.lr(u64::MAX), s.min_lr);
    }

    #[test]
    fn cosine_midpoint() {
        let s = schedule();
        let mid = s.warmup_iters + (s.decay_iters - s.warmup_iters) / 2;
        let expected = s.min_lr + 0.5 * (s.peak_lr - s.min_lr);
        assert!((s.lr(mid) - expected).abs() < 1e-9);
    }

    #[test]
    fn non_increasing_after_warmup() {
        let s = schedule();
        let mut prev = s.lr(s.warmup_iters);
        for it in (s.warmup_iters..s.decay_iters + 10).step_by(97) {
            let lr = s.lr(it);
            assert!(lr <= prev + 1e-15, "lr increased at iteration {it}");
            prev = lr;
        }
    }

    #[test]
    fn warmup_is_linear() {
        let s = schedule();
        assert!((s.lr(500) - s.peak_lr * 0.25).abs() < 1e-12);
        assert!((s.lr(1_000) - s.peak_lr * 0.5).abs() < 1e-12);
    }
}
