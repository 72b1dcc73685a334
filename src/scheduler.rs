// src/scheduler.rs
// Per-frame callback driver. The host calls `tick` on every display refresh; the scheduler asks
// its FrameDriver how many steps that refresh is worth and runs the armed callback once per
// step. It knows nothing about scenes or cameras.

use std::time::Instant;

use crate::error::{Result, ViewerError};
use crate::time::{DisplayDriver, FrameDriver};

pub type RenderFn<Ctx> = Box<dyn FnMut(&mut Ctx, f32)>;

pub struct RenderScheduler<Ctx> {
    driver: Box<dyn FrameDriver>,
    callback: Option<RenderFn<Ctx>>,
    ticks: u64,
}

impl<Ctx> Default for RenderScheduler<Ctx> {
    fn default() -> Self {
        Self::new(Box::new(DisplayDriver::new()))
    }
}

impl<Ctx> RenderScheduler<Ctx> {
    pub fn new(driver: Box<dyn FrameDriver>) -> Self {
        Self { driver, callback: None, ticks: 0 }
    }

    /// Arm the scheduler. Fails with `InvalidState` while already running.
    pub fn start<F>(&mut self, render: F) -> Result<()>
    where
        F: FnMut(&mut Ctx, f32) + 'static,
    {
        if self.callback.is_some() {
            return Err(ViewerError::invalid_state("render scheduler already started"));
        }
        self.driver.reset();
        self.callback = Some(Box::new(render));
        log::debug!("render scheduler started");
        Ok(())
    }

    /// Drop the callback. Returns whether it was running.
    pub fn stop(&mut self) -> bool {
        let was_running = self.callback.take().is_some();
        if was_running {
            log::debug!("render scheduler stopped after {} tick(s)", self.ticks);
        }
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.callback.is_some()
    }

    /// Display refresh at `now`. Returns how many steps ran (0 when stopped).
    pub fn tick(&mut self, ctx: &mut Ctx, now: Instant) -> u32 {
        let Some(callback) = self.callback.as_mut() else { return 0 };
        self.ticks += 1;
        let mut ran = 0;
        for dt in self.driver.advance(now) {
            callback(ctx, dt);
            ran += 1;
        }
        ran
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::FixedStepDriver;
    use std::time::Duration;

    #[test]
    fn second_start_is_rejected() {
        let mut s: RenderScheduler<u32> = RenderScheduler::default();
        s.start(|n, _| *n += 1).unwrap();
        let err = s.start(|n, _| *n += 100).unwrap_err();
        assert!(matches!(err, ViewerError::InvalidState(_)));

        let mut count = 0;
        s.tick(&mut count, Instant::now());
        assert_eq!(count, 1);
    }

    #[test]
    fn stop_prevents_further_calls() {
        let mut s: RenderScheduler<Vec<f32>> = RenderScheduler::default();
        let mut calls = Vec::new();
        let t0 = Instant::now();
        s.start(|log: &mut Vec<f32>, dt| log.push(dt)).unwrap();
        s.tick(&mut calls, t0);
        assert!(s.stop());
        assert_eq!(s.tick(&mut calls, t0 + Duration::from_millis(16)), 0);
        assert_eq!(calls.len(), 1);
        assert!(!s.stop());
        // Restart after stop is allowed.
        s.start(|log: &mut Vec<f32>, dt| log.push(dt)).unwrap();
        s.tick(&mut calls, t0 + Duration::from_millis(32));
        assert_eq!(calls.len(), 2);
    }

    #[test]
    fn fixed_driver_runs_multiple_steps() {
        let mut s: RenderScheduler<u32> = RenderScheduler::new(Box::new(FixedStepDriver::new(0.01)));
        s.start(|n, _| *n += 1).unwrap();
        let t0 = Instant::now();
        let mut count = 0;
        s.tick(&mut count, t0);
        assert_eq!(s.tick(&mut count, t0 + Duration::from_millis(35)), 3);
        assert_eq!(count, 3);
    }
}
