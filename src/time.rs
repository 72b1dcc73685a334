// src/time.rs
//! Frame timing for the render scheduler.
//!
//! The host reports each display refresh with a timestamp; a [`FrameDriver`] turns the elapsed
//! time into the steps the frame callback runs.
//!
//! - [`DisplayDriver`]: one variable step per refresh, clamped to 0.25 s so a backgrounded tab
//!   or a debugger pause doesn't fling the camera.
//! - [`FixedStepDriver`]: accumulator with fixed steps and a catch-up limit, for hosts that want
//!   identical motion regardless of refresh rate.

use std::time::Instant;

/// Largest step a refresh may report (seconds).
pub const MAX_DELTA: f32 = 0.25;

/// Steps to run for one refresh. Yields `dt` (seconds) `count` times.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FrameSteps {
    pub dt: f32,
    pub count: u32,
}

impl FrameSteps {
    pub const NONE: Self = Self { dt: 0.0, count: 0 };

    pub fn single(dt: f32) -> Self {
        Self { dt, count: 1 }
    }
}

impl Iterator for FrameSteps {
    type Item = f32;

    #[inline(always)]
    fn next(&mut self) -> Option<f32> {
        if self.count > 0 {
            self.count -= 1;
            Some(self.dt)
        } else {
            None
        }
    }
}

/// Source of frame steps. Swappable per scheduler.
pub trait FrameDriver {
    /// Steps for a refresh observed at `now`.
    fn advance(&mut self, now: Instant) -> FrameSteps;

    /// Forget the previous timestamp (next refresh starts fresh).
    fn reset(&mut self);
}

/// One step per display refresh.
#[derive(Debug, Clone)]
pub struct DisplayDriver {
    last: Option<Instant>,
    max_delta: f32,
    smoothing: f32,
    smoothed_delta: f32,
    frame: u64,
}

impl Default for DisplayDriver {
    fn default() -> Self {
        Self { last: None, max_delta: MAX_DELTA, smoothing: 0.2, smoothed_delta: 1.0 / 60.0, frame: 0 }
    }
}

impl DisplayDriver {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Smoothed frames per second.
    pub fn fps(&self) -> f32 {
        if self.smoothed_delta > 0.0 {
            1.0 / self.smoothed_delta
        } else {
            0.0
        }
    }
}

impl FrameDriver for DisplayDriver {
    fn advance(&mut self, now: Instant) -> FrameSteps {
        let dt = match self.last {
            // The first refresh draws immediately with nothing to integrate.
            None => 0.0,
            Some(last) => now.saturating_duration_since(last).as_secs_f32().min(self.max_delta),
        };
        self.last = Some(now);
        self.frame += 1;
        if dt > 0.0 {
            self.smoothed_delta = self.smoothed_delta * (1.0 - self.smoothing) + dt * self.smoothing;
        }
        FrameSteps::single(dt)
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

/// Fixed-size steps out of an accumulator, at most `max_steps` per refresh.
#[derive(Debug, Clone)]
pub struct FixedStepDriver {
    last: Option<Instant>,
    fixed_dt: f32,
    accumulator: f32,
    max_steps: u32,
}

impl FixedStepDriver {
    pub fn new(fixed_dt: f32) -> Self {
        let fixed_dt = if fixed_dt.is_finite() && fixed_dt > 0.0 { fixed_dt } else { 1.0 / 60.0 };
        Self { last: None, fixed_dt, accumulator: 0.0, max_steps: 5 }
    }

    pub fn with_max_steps(mut self, max_steps: u32) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    /// Leftover time not yet consumed by a step.
    pub fn remainder(&self) -> f32 {
        self.accumulator
    }
}

impl FrameDriver for FixedStepDriver {
    fn advance(&mut self, now: Instant) -> FrameSteps {
        if let Some(last) = self.last {
            self.accumulator += now.saturating_duration_since(last).as_secs_f32().min(MAX_DELTA);
        }
        self.last = Some(now);

        let mut count = 0;
        while self.accumulator >= self.fixed_dt && count < self.max_steps {
            self.accumulator -= self.fixed_dt;
            count += 1;
        }
        // Past the catch-up limit the backlog is dropped rather than carried forever.
        if count == self.max_steps {
            self.accumulator = self.accumulator.min(self.fixed_dt);
        }
        FrameSteps { dt: self.fixed_dt, count }
    }

    fn reset(&mut self) {
        self.last = None;
        self.accumulator = 0.0;
    }
}
