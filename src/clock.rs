//! Animation time for the filters.
//!
//! The clock only accumulates. Filters are periodic functions of `time`, so
//! nothing here ever wraps or resets.

use crate::filters::LoopDuration;
use std::time::Instant;

/// Output frame rate of a capture.
pub const CAPTURE_FPS: u32 = 30;

/// Synthetic step of the gallery cycler, a nominal 60 steps per second.
pub const GALLERY_STEP: f64 = 0.016666;

/// Fixed step between captured frames.
pub fn capture_step() -> f64 {
    1.0 / CAPTURE_FPS as f64
}

pub fn tick(current: f64, step: f64) -> f64 {
    current + step
}

#[derive(Debug, Clone, Copy)]
enum ClockMode {
    /// Wall clock; remembers the previous callback instant.
    Live { last: Option<Instant> },
    /// Fixed step per advance.
    Synthetic { step: f64 },
}

#[derive(Debug, Clone)]
pub struct AnimationClock {
    time: f64,
    period: LoopDuration,
    mode: ClockMode,
}

impl AnimationClock {
    pub fn live(period: LoopDuration) -> Self {
        Self {
            time: 0.0,
            period,
            mode: ClockMode::Live { last: None },
        }
    }

    pub fn synthetic(period: LoopDuration, step: f64) -> Self {
        Self {
            time: 0.0,
            period,
            mode: ClockMode::Synthetic { step },
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn is_live(&self) -> bool {
        matches!(self.mode, ClockMode::Live { .. })
    }

    /// Loop duration of the filter currently driven by this clock.
    pub fn period(&self) -> LoopDuration {
        self.period
    }

    /// Switches the period when another filter takes over. Time continues.
    pub fn set_period(&mut self, period: LoopDuration) {
        self.period = period;
    }

    /// Position inside the current loop. Only for display and logging;
    /// shaders always receive the unwrapped time.
    pub fn phase(&self) -> f64 {
        self.time.rem_euclid(self.period.as_secs())
    }

    /// Advances for a display callback at `now`.
    ///
    /// Live clocks add the wall-clock delta since the previous callback (zero
    /// on the first one). Synthetic clocks ignore `now` and add their step.
    pub fn advance_to(&mut self, now: Instant) -> f64 {
        let elapsed = match &mut self.mode {
            ClockMode::Live { last } => {
                let elapsed = last
                    .map(|previous| now.saturating_duration_since(previous).as_secs_f64())
                    .unwrap_or(0.0);
                *last = Some(now);
                elapsed
            }
            ClockMode::Synthetic { step } => *step,
        };
        self.time = tick(self.time, elapsed);
        self.time
    }

    /// Advances by one step, reading the wall clock in live mode.
    pub fn advance(&mut self) -> f64 {
        self.advance_to(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn period(secs: f64) -> LoopDuration {
        LoopDuration::new(secs).unwrap()
    }

    #[test]
    fn test_tick_adds_step() {
        assert_eq!(tick(1.0, 0.5), 1.5);
        assert_eq!(tick(0.0, capture_step()), 1.0 / 30.0);
    }

    #[test]
    fn test_synthetic_clock_is_deterministic() {
        let mut clock = AnimationClock::synthetic(period(1.0), 0.25);
        let start = Instant::now();
        for i in 1..=10 {
            // Wall clock instants are irrelevant in synthetic mode.
            let t = clock.advance_to(start + Duration::from_secs(i * 100));
            assert_eq!(t, i as f64 * 0.25);
        }
        assert!(!clock.is_live());
    }

    #[test]
    fn test_live_clock_accumulates_wall_time() {
        let mut clock = AnimationClock::live(period(1.7));
        let start = Instant::now();
        assert_eq!(clock.advance_to(start), 0.0);
        assert!((clock.advance_to(start + Duration::from_millis(500)) - 0.5).abs() < 1e-9);
        assert!((clock.advance_to(start + Duration::from_millis(2500)) - 2.5).abs() < 1e-9);
        // Never wraps, even past the period.
        assert!(clock.time() > clock.period().as_secs());
        assert!((clock.phase() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_live_clock_ignores_time_going_backwards() {
        let mut clock = AnimationClock::live(period(1.0));
        let start = Instant::now() + Duration::from_secs(10);
        clock.advance_to(start);
        assert_eq!(clock.advance_to(start - Duration::from_secs(5)), 0.0);
    }

    #[test]
    fn test_period_switch_keeps_time() {
        let mut clock = AnimationClock::synthetic(period(1.0), GALLERY_STEP);
        for _ in 0..100 {
            clock.advance();
        }
        let before = clock.time();
        clock.set_period(period(0.25));
        assert_eq!(clock.time(), before);
        assert!((before - 1.6666).abs() < 1e-9);
    }
}
