/// Linear schedule from training progress to rollout horizon.
///
/// Progress below `progress_range.0` maps to `horizon_range.0`, progress above `progress_range.1`
/// maps to `horizon_range.1` and everything in between is interpolated, then rounded to the
/// nearest integer with ties going away from zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizonSchedule {
    pub horizon_range: (usize, usize),
    pub progress_range: (f64, f64),
}

impl HorizonSchedule {
    pub fn new(horizon_range: (usize, usize), progress_range: (f64, f64)) -> Self {
        Self {
            horizon_range,
            progress_range,
        }
    }

    fn fraction(&self, progress: f64) -> f64 {
        let (start, end) = self.progress_range;
        if end <= start {
            return if progress >= end { 1. } else { 0. };
        }
        ((progress - start) / (end - start)).clamp(0., 1.)
    }

    pub fn horizon_at(&self, progress: f64) -> usize {
        let (min_horizon, max_horizon) = self.horizon_range;
        let horizon =
            min_horizon as f64 + self.fraction(progress) * (max_horizon as f64 - min_horizon as f64);
        (horizon.round() as usize).max(min_horizon).max(1)
    }
}
