use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

pub const DEFAULT_RTT_CAPACITY: usize = 50;
pub const DEFAULT_AVERAGE_PING: Duration = Duration::from_millis(100);
pub const DEFAULT_PING_DEVIATION: Duration = Duration::ZERO;

/// Bounded window of round-trip samples. The oldest sample is evicted once
/// the window is full.
#[derive(Debug, Clone)]
pub struct RttWindow {
    samples: VecDeque<Duration>,
    capacity: usize,
}

impl Default for RttWindow {
    fn default() -> Self {
        Self::new(DEFAULT_RTT_CAPACITY)
    }
}

impl RttWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, rtt: Duration) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return DEFAULT_AVERAGE_PING;
        }
        self.mean()
    }

    /// Mean absolute deviation around [`RttWindow::average`].
    pub fn deviation(&self) -> Duration {
        if self.samples.is_empty() {
            return DEFAULT_PING_DEVIATION;
        }
        let mean = self.mean();
        let total: Duration = self
            .samples
            .iter()
            .map(|&s| if s > mean { s - mean } else { mean - s })
            .sum();
        total / self.samples.len() as u32
    }

    fn mean(&self) -> Duration {
        self.samples.iter().sum::<Duration>() / self.samples.len() as u32
    }
}

/// Remembers which sequence numbers a peer has already handed us.
///
/// Senders number messages from zero without gaps, so everything below
/// `watermark` is known to have arrived and only the out-of-order tail above
/// it needs to be stored.
#[derive(Debug, Default)]
pub struct ReceiveTracker {
    watermark: u32,
    above_watermark: BTreeSet<u32>,
}

impl ReceiveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if `sequence` was seen before.
    pub fn record_received(&mut self, sequence: u32) -> bool {
        if self.contains(sequence) {
            return false;
        }

        if sequence == self.watermark {
            self.watermark = self.watermark.wrapping_add(1);
            while self.above_watermark.remove(&self.watermark) {
                self.watermark = self.watermark.wrapping_add(1);
            }
        } else {
            self.above_watermark.insert(sequence);
        }

        true
    }

    pub fn contains(&self, sequence: u32) -> bool {
        sequence < self.watermark || self.above_watermark.contains(&sequence)
    }

    pub fn watermark(&self) -> u32 {
        self.watermark
    }

    pub fn gap_count(&self) -> usize {
        self.above_watermark.len()
    }

    pub fn clear(&mut self) {
        self.above_watermark.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtt_defaults_without_samples() {
        let window = RttWindow::default();
        assert_eq!(window.average(), DEFAULT_AVERAGE_PING);
        assert_eq!(window.deviation(), DEFAULT_PING_DEVIATION);
    }

    #[test]
    fn test_rtt_average_and_deviation() {
        let mut window = RttWindow::new(8);
        window.record(Duration::from_millis(10));
        window.record(Duration::from_millis(30));

        assert_eq!(window.average().as_millis(), 20);
        assert_eq!(window.deviation().as_millis(), 10);
    }

    #[test]
    fn test_rtt_window_is_bounded() {
        let mut window = RttWindow::new(3);
        for ms in [500, 10, 10, 10] {
            window.record(Duration::from_millis(ms));
        }

        assert_eq!(window.len(), 3);
        assert_eq!(window.average().as_millis(), 10);
        assert_eq!(window.deviation(), Duration::ZERO);
    }

    #[test]
    fn test_receive_tracker_in_order() {
        let mut tracker = ReceiveTracker::new();

        assert!(tracker.record_received(0));
        assert!(tracker.record_received(1));
        assert!(tracker.record_received(2));

        assert_eq!(tracker.watermark(), 3);
        assert_eq!(tracker.gap_count(), 0);
    }

    #[test]
    fn test_receive_tracker_out_of_order() {
        let mut tracker = ReceiveTracker::new();

        assert!(tracker.record_received(3));
        assert!(tracker.record_received(1));
        assert_eq!(tracker.watermark(), 0);
        assert_eq!(tracker.gap_count(), 2);

        assert!(tracker.record_received(0));
        assert!(tracker.record_received(2));
        assert_eq!(tracker.watermark(), 4);
        assert_eq!(tracker.gap_count(), 0);
    }

    #[test]
    fn test_duplicate_detection() {
        let mut tracker = ReceiveTracker::new();

        assert!(tracker.record_received(0));
        assert!(!tracker.record_received(0));
        assert!(tracker.record_received(5));
        assert!(!tracker.record_received(5));
        assert!(tracker.contains(5));
        assert!(!tracker.contains(4));
    }
}
