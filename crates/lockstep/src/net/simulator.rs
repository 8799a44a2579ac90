use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::endpoint::Endpoint;

/// Degrades outgoing traffic so retransmission can be exercised on a clean
/// network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl PacketLossSimulation {
    pub fn lossy(loss_percent: f32) -> Self {
        Self {
            enabled: true,
            loss_percent,
            ..Default::default()
        }
    }

    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand::thread_rng().gen_range(0.0..100.0) < self.loss_percent
    }

    pub fn delay_ms(&self) -> u32 {
        if !self.enabled || self.max_latency_ms == 0 {
            return 0;
        }
        let mut rng = rand::thread_rng();
        let base = self.min_latency_ms.min(self.max_latency_ms);
        let spread = rng.gen_range(0..=self.max_latency_ms - base);
        let jitter = if self.jitter_ms > 0 {
            rng.gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        base + spread + jitter
    }
}

#[derive(Debug)]
struct DelayedDatagram {
    release_time: Instant,
    data: Vec<u8>,
    to: Endpoint,
}

impl PartialEq for DelayedDatagram {
    fn eq(&self, other: &Self) -> bool {
        self.release_time == other.release_time
    }
}

impl Eq for DelayedDatagram {}

impl PartialOrd for DelayedDatagram {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedDatagram {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap
        other.release_time.cmp(&self.release_time)
    }
}

pub enum Verdict {
    Send(Vec<u8>),
    Dropped,
    Delayed,
}

#[derive(Debug, Default)]
pub struct NetworkSimulator {
    config: PacketLossSimulation,
    queue: BinaryHeap<DelayedDatagram>,
}

impl NetworkSimulator {
    pub fn new(config: PacketLossSimulation) -> Self {
        Self {
            config,
            queue: BinaryHeap::new(),
        }
    }

    pub fn set_config(&mut self, config: PacketLossSimulation) {
        self.config = config;
    }

    pub fn is_active(&self) -> bool {
        self.config.enabled
    }

    pub fn submit(&mut self, data: Vec<u8>, to: Endpoint, now: Instant) -> Verdict {
        if self.config.should_drop() {
            return Verdict::Dropped;
        }

        let delay = Duration::from_millis(self.config.delay_ms() as u64);
        if delay.is_zero() {
            return Verdict::Send(data);
        }

        self.queue.push(DelayedDatagram {
            release_time: now + delay,
            data,
            to,
        });
        Verdict::Delayed
    }

    pub fn take_due(&mut self, now: Instant) -> Vec<(Vec<u8>, Endpoint)> {
        let mut due = Vec::new();
        while self.queue.peek().is_some_and(|d| d.release_time <= now) {
            if let Some(delayed) = self.queue.pop() {
                due.push((delayed.data, delayed.to));
            }
        }
        due
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_simulation_passes_through() {
        let mut sim = NetworkSimulator::default();
        let verdict = sim.submit(vec![1, 2, 3], Endpoint::localhost(1), Instant::now());
        assert!(matches!(verdict, Verdict::Send(data) if data == vec![1, 2, 3]));
    }

    #[test]
    fn test_full_loss_drops_everything() {
        let mut sim = NetworkSimulator::new(PacketLossSimulation::lossy(100.0));
        for _ in 0..50 {
            let verdict = sim.submit(vec![0], Endpoint::localhost(1), Instant::now());
            assert!(matches!(verdict, Verdict::Dropped));
        }
    }

    #[test]
    fn test_delayed_datagrams_release_in_time_order() {
        let mut sim = NetworkSimulator::new(PacketLossSimulation {
            enabled: true,
            loss_percent: 0.0,
            min_latency_ms: 20,
            max_latency_ms: 20,
            jitter_ms: 0,
        });
        let start = Instant::now();

        assert!(matches!(
            sim.submit(vec![1], Endpoint::localhost(1), start),
            Verdict::Delayed
        ));
        assert!(matches!(
            sim.submit(vec![2], Endpoint::localhost(2), start + Duration::from_millis(5)),
            Verdict::Delayed
        ));

        assert!(sim.take_due(start + Duration::from_millis(10)).is_empty());

        let due = sim.take_due(start + Duration::from_millis(30));
        assert_eq!(due.len(), 2);
        assert_eq!(due[0], (vec![1], Endpoint::localhost(1)));
        assert_eq!(due[1], (vec![2], Endpoint::localhost(2)));
        assert_eq!(sim.queued(), 0);
    }
}
