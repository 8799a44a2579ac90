use std::collections::VecDeque;
use std::time::Duration;

use super::config::SessionConfig;

/// Adapts the number of local steps per command frame to what the slowest
/// peer has recently needed.
///
/// Each flushed frame contributes the largest `steps_taken` any faction
/// reported for it. The target becomes `ceil(mean + 2 * stddev)` over the
/// samples covering the last pacing window, clamped to the configured
/// bounds.
#[derive(Debug, Clone)]
pub struct FramePacer {
    samples: VecDeque<u32>,
    target: u32,
    min_steps: u32,
    max_steps: u32,
    steps_per_second: u32,
    window: Duration,
}

impl FramePacer {
    pub fn new(config: &SessionConfig) -> Self {
        let min_steps = config.min_steps_per_frame.max(1);
        let max_steps = config.max_steps_per_frame.max(min_steps);
        Self {
            samples: VecDeque::new(),
            target: config.initial_steps_per_frame.clamp(min_steps, max_steps),
            min_steps,
            max_steps,
            steps_per_second: config.steps_per_second.max(1),
            window: config.pacing_window,
        }
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Number of frames that fit in the pacing window at the current target.
    pub fn capacity(&self) -> usize {
        let window_steps = self.window.as_secs_f64() * self.steps_per_second as f64;
        ((window_steps / self.target as f64).ceil() as usize).max(1)
    }

    pub fn record(&mut self, max_steps_taken: u32) -> u32 {
        self.samples.push_back(max_steps_taken);
        let capacity = self.capacity();
        while self.samples.len() > capacity {
            self.samples.pop_front();
        }

        let count = self.samples.len() as f64;
        let mean = self.samples.iter().map(|&s| s as f64).sum::<f64>() / count;
        let variance = self
            .samples
            .iter()
            .map(|&s| {
                let d = s as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / count;

        let target = (mean + 2.0 * variance.sqrt()).ceil() as u32;
        let target = target.clamp(self.min_steps, self.max_steps);
        if target != self.target {
            log::debug!(
                "Steps per frame {} -> {} (mean {:.2}, {} samples)",
                self.target,
                target,
                mean,
                self.samples.len()
            );
        }
        self.target = target;
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacer() -> FramePacer {
        FramePacer::new(&SessionConfig::default())
    }

    #[test]
    fn test_steady_samples_converge() {
        let mut pacer = pacer();
        assert_eq!(pacer.target(), 4);

        for _ in 0..10 {
            pacer.record(2);
        }
        assert_eq!(pacer.target(), 2);
    }

    #[test]
    fn test_jitter_widens_target() {
        let mut pacer = pacer();
        pacer.record(0);
        // mean 2, stddev 2
        assert_eq!(pacer.record(4), 6);
    }

    #[test]
    fn test_target_is_clamped() {
        let mut pacer = pacer();
        assert_eq!(pacer.record(0), 1);
        for _ in 0..50 {
            pacer.record(500);
        }
        assert_eq!(pacer.target(), 32);
    }

    #[test]
    fn test_window_forgets_outliers() {
        let mut pacer = pacer();
        pacer.record(30);
        for _ in 0..200 {
            pacer.record(3);
        }
        assert_eq!(pacer.target(), 3);
        assert!(pacer.sample_count() <= pacer.capacity());
    }
}
