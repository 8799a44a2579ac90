use std::time::Duration;

/// Largest frame delta folded into the accumulator. A stalled process
/// catches up over several frames instead of running a burst of steps.
const MAX_FRAME_DELTA: Duration = Duration::from_millis(250);

/// Turns wall-clock time into whole simulation steps at a fixed rate.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    tick_rate: u32,
    dt: Duration,
    accumulator: Duration,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_rate,
            dt: Duration::from_secs(1) / tick_rate,
            accumulator: Duration::ZERO,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn accumulate(&mut self, delta: Duration) {
        self.accumulator += delta.min(MAX_FRAME_DELTA);
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    /// Time until the next step is due.
    pub fn remaining(&self) -> Duration {
        self.dt.saturating_sub(self.accumulator)
    }
}
