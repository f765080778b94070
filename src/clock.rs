// src/clock.rs - fixed-step logical tick accumulator with catch-up cap,
// pause and fast-forward. Grounded on the teacher's use of `Res<Time>`
// inside a `GameMode.paused`-gated system (no dedicated clock resource
// exists in the teacher; this generalizes that ad-hoc pattern into the
// owned fixed-step accumulator `spec.md` 4.6 specifies).
use bevy::prelude::*;

#[derive(Resource)]
pub struct SimulationClock {
    tick_rate: u32,
    frame_tick_catchup: u32,
    accumulator: f32,
    paused: bool,
    speed: f32,
    pub tick: u64,
}

impl SimulationClock {
    pub fn new(tick_rate: u32, frame_tick_catchup: u32) -> Self {
        Self {
            tick_rate,
            frame_tick_catchup,
            accumulator: 0.0,
            paused: false,
            speed: 1.0,
            tick: 0,
        }
    }

    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_rate as f32
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Fast-forward multiplies the number of ticks allowed per frame, not
    /// the tick's own `dt` (per `spec.md` 4.6: "All duration semantics... are
    /// specified per-tick", so a tick always represents `1/tick_rate` of
    /// simulated time regardless of speed).
    pub fn set_speed(&mut self, multiplier: f32) {
        self.speed = multiplier.max(0.0);
    }

    /// Accumulates `real_dt` of wall-clock time and returns how many whole
    /// ticks the caller should advance this frame, capped at
    /// `frame_tick_catchup` to avoid a spiral of death. Each call mutates
    /// `self.tick` by the number of ticks returned.
    pub fn advance(&mut self, real_dt: f32) -> u32 {
        if self.paused {
            return 0;
        }
        self.accumulator += real_dt * self.speed;
        let dt = self.tick_dt();
        let mut ticks = 0u32;
        while self.accumulator >= dt && ticks < self.frame_tick_catchup {
            self.accumulator -= dt;
            ticks += 1;
        }
        // Excess accumulated time beyond the catch-up cap is dropped, not
        // carried indefinitely, matching "cap on catch-up... to avoid
        // spiral-of-death" rather than an unbounded backlog.
        if ticks == self.frame_tick_catchup {
            self.accumulator = self.accumulator.min(dt);
        }
        self.tick += ticks as u64;
        ticks
    }
}

impl Default for SimulationClock {
    fn default() -> Self {
        Self::new(30, 5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_whole_ticks_only() {
        let mut clock = SimulationClock::new(30, 5);
        let ticks = clock.advance(1.0 / 30.0);
        assert_eq!(ticks, 1);
        assert_eq!(clock.tick, 1);
    }

    #[test]
    fn partial_tick_time_carries_over() {
        let mut clock = SimulationClock::new(30, 5);
        clock.advance(1.0 / 60.0);
        assert_eq!(clock.tick, 0);
        let ticks = clock.advance(1.0 / 60.0);
        assert_eq!(ticks, 1);
    }

    #[test]
    fn catch_up_is_capped() {
        let mut clock = SimulationClock::new(30, 5);
        let ticks = clock.advance(10.0);
        assert_eq!(ticks, 5);
    }

    #[test]
    fn paused_clock_does_not_advance() {
        let mut clock = SimulationClock::new(30, 5);
        clock.set_paused(true);
        assert_eq!(clock.advance(10.0), 0);
        assert_eq!(clock.tick, 0);
    }

    #[test]
    fn speed_multiplier_scales_accumulated_time() {
        let mut clock = SimulationClock::new(30, 5);
        clock.set_speed(2.0);
        let ticks = clock.advance(1.0 / 30.0);
        assert_eq!(ticks, 2);
    }
}
