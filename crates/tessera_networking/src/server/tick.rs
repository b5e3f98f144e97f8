//! Fixed-timestep driver for the realm workers.
//!
//! Accumulator-based: the loop asks `should_tick` until the accumulated
//! wall time is spent, then sleeps to the next deadline. Ticks never run
//! mid-suspend; network reads happen between them.

use std::time::{Duration, Instant};

/// Fixed-timestep controller.
pub struct TickLoop {
    tick_duration: Duration,
    last_tick: Instant,
    accumulator: Duration,
    tick_count: u64,
    stats: TickStats,
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickStats {
    /// Shortest observed tick body.
    pub min_tick_us: u64,
    /// Longest observed tick body.
    pub max_tick_us: u64,
    /// Rolling average tick body.
    pub avg_tick_us: u64,
    /// Ticks whose body overran the budget.
    pub late_ticks: u64,
    /// Ticks measured.
    pub total_ticks: u64,
}

impl TickLoop {
    /// Creates a controller for a tick rate in Hz.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));
        Self {
            tick_duration,
            last_tick: Instant::now(),
            accumulator: Duration::ZERO,
            tick_count: 0,
            stats: TickStats { min_tick_us: u64::MAX, ..TickStats::default() },
        }
    }

    /// The fixed step in seconds.
    #[must_use]
    pub fn dt(&self) -> f32 {
        self.tick_duration.as_secs_f32()
    }

    /// True when accumulated time covers another tick. Call in a loop.
    #[must_use]
    pub fn should_tick(&mut self) -> bool {
        let now = Instant::now();
        self.accumulator += now.duration_since(self.last_tick);
        self.last_tick = now;
        self.accumulator >= self.tick_duration
    }

    /// Marks a tick's start; returns its start instant.
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        self.accumulator = self.accumulator.saturating_sub(self.tick_duration);
        self.tick_count += 1;
        Instant::now()
    }

    /// Marks a tick's end and records stats.
    pub fn end_tick(&mut self, start: Instant) {
        let duration_us = start.elapsed().as_micros() as u64;
        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(duration_us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(duration_us);
        self.stats.avg_tick_us = (self.stats.avg_tick_us * 15 + duration_us) / 16;
        if start.elapsed() > self.tick_duration {
            self.stats.late_ticks += 1;
        }
    }

    /// Sleeps until the next tick is due (coarse sleep; the accumulator
    /// absorbs the jitter).
    pub fn wait_for_next_tick(&self) {
        let elapsed = Instant::now().duration_since(self.last_tick);
        if elapsed < self.tick_duration {
            let remaining = self.tick_duration - elapsed;
            if remaining > Duration::from_micros(500) {
                std::thread::sleep(remaining - Duration::from_micros(250));
            }
        }
    }

    /// Ticks executed so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dt_matches_rate() {
        let ticks = TickLoop::new(30);
        assert!((ticks.dt() - 1.0 / 30.0).abs() < 1e-4);
    }

    #[test]
    fn test_accumulated_time_produces_ticks() {
        let mut ticks = TickLoop::new(1000);
        std::thread::sleep(Duration::from_millis(5));
        assert!(ticks.should_tick());
        let start = ticks.begin_tick();
        ticks.end_tick(start);
        assert_eq!(ticks.tick_count(), 1);
        assert_eq!(ticks.stats().total_ticks, 1);
    }
}
