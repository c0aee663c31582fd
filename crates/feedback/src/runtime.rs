use std::time::{Duration, Instant};

use tracing::trace;

use crate::computer::FeedbackComputer;
use crate::error::Result;
use crate::gpu::ParamScope;
use crate::types::FLOAT;

/// Built-in param fed with elapsed seconds when a step declares it.
pub const TIME_PARAM: &str = "time";
/// Built-in param fed with the frame counter (as a float) when declared.
pub const FRAME_PARAM: &str = "frame";

/// How the outer loop advances the clock.
#[derive(Debug, Clone, PartialEq)]
pub enum RunPolicy {
    /// Follow the wall clock, optionally capping the frame rate.
    Animate {
        /// Requested frames-per-second cap.
        target_fps: Option<f32>,
    },
    /// Advance simulated time by a fixed delta per frame.
    Fixed {
        /// Seconds added to the clock on every frame.
        frame_seconds: f32,
    },
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self::Animate { target_fps: None }
    }
}

impl RunPolicy {
    pub fn target_fps(&self) -> Option<f32> {
        match self {
            RunPolicy::Animate { target_fps } => *target_fps,
            RunPolicy::Fixed { .. } => None,
        }
    }
}

/// Time values handed to the steps for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeSample {
    /// Elapsed wall-clock or simulated time in seconds.
    pub seconds: f32,
    /// Monotonic frame counter for the running session.
    pub frame_index: u64,
}

impl TimeSample {
    pub fn new(seconds: f32, frame_index: u64) -> Self {
        Self {
            seconds,
            frame_index,
        }
    }
}

/// Where frame times come from.
pub trait TimeSource: Send {
    /// Resets the source to its initial state.
    fn reset(&mut self);
    /// Produces a time sample for the next frame.
    fn sample(&mut self) -> TimeSample;
}

/// Time source backed by the monotonic clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemTimeSource {
    origin: Instant,
    frame: u64,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
            frame: 0,
        }
    }
}

impl TimeSource for SystemTimeSource {
    fn reset(&mut self) {
        self.origin = Instant::now();
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let sample = TimeSample::new(self.origin.elapsed().as_secs_f32(), self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

/// Deterministic clock: frame `n` reports `n * frame_seconds`.
#[derive(Debug, Clone, Copy)]
pub struct FixedTimeSource {
    frame_seconds: f32,
    frame: u64,
}

impl FixedTimeSource {
    pub fn new(frame_seconds: f32) -> Self {
        Self {
            frame_seconds,
            frame: 0,
        }
    }

    pub fn frame_seconds(&self) -> f32 {
        self.frame_seconds
    }
}

impl TimeSource for FixedTimeSource {
    fn reset(&mut self) {
        self.frame = 0;
    }

    fn sample(&mut self) -> TimeSample {
        let sample = TimeSample::new(self.frame as f32 * self.frame_seconds, self.frame);
        self.frame = self.frame.saturating_add(1);
        sample
    }
}

pub type BoxedTimeSource = Box<dyn TimeSource + Send>;

/// Builds a time source suited to the requested policy.
pub fn time_source_for_policy(policy: &RunPolicy) -> BoxedTimeSource {
    match policy {
        RunPolicy::Animate { .. } => Box::new(SystemTimeSource::new()),
        RunPolicy::Fixed { frame_seconds } => Box::new(FixedTimeSource::new(*frame_seconds)),
    }
}

/// Per-frame driver: feeds the clock into the steps and calls
/// [`FeedbackComputer::step`] exactly once per tick.
///
/// Stopping calls to [`tick`](Self::tick) is the only way to stop the loop.
pub struct LoopDriver {
    clock: BoxedTimeSource,
    frame_interval: Option<Duration>,
    last_frame: Option<Instant>,
}

impl LoopDriver {
    pub fn new(policy: &RunPolicy) -> Self {
        Self::with_clock(time_source_for_policy(policy), policy.target_fps())
    }

    pub fn with_clock(clock: BoxedTimeSource, target_fps: Option<f32>) -> Self {
        let frame_interval = target_fps
            .filter(|fps| fps.is_finite() && *fps > 0.0)
            .map(|fps| Duration::from_secs_f32(1.0 / fps));
        Self {
            clock,
            frame_interval,
            last_frame: None,
        }
    }

    /// Whether enough time has passed since the last tick to honour the cap.
    pub fn should_render(&self, now: Instant) -> bool {
        match (self.frame_interval, self.last_frame) {
            (Some(interval), Some(last)) => now.duration_since(last) >= interval,
            _ => true,
        }
    }

    /// Earliest instant the next frame may render, if a cap is active.
    pub fn next_deadline(&self) -> Option<Instant> {
        Some(self.last_frame? + self.frame_interval?)
    }

    /// Advances `computer` by one step into `target`.
    pub fn tick(
        &mut self,
        computer: &mut FeedbackComputer,
        target: &wgpu::TextureView,
    ) -> Result<TimeSample> {
        self.last_frame = Some(Instant::now());
        let sample = self.clock.sample();
        apply_builtin_params(computer, sample)?;
        computer.step(target)?;
        trace!(frame = sample.frame_index, seconds = sample.seconds, "tick");
        Ok(sample)
    }

    pub fn reset(&mut self) {
        self.clock.reset();
        self.last_frame = None;
    }
}

/// Built-ins are only fed to params declared as `float`; a `time` or `frame`
/// param of any other type belongs to the caller.
fn apply_builtin_params(computer: &mut FeedbackComputer, sample: TimeSample) -> Result<()> {
    for scope in [ParamScope::Update, ParamScope::Render] {
        if computer.param_type(scope, TIME_PARAM) == Some(FLOAT) {
            computer.set_param(scope, TIME_PARAM, &sample.seconds)?;
        }
        if computer.param_type(scope, FRAME_PARAM) == Some(FLOAT) {
            computer.set_param(scope, FRAME_PARAM, &(sample.frame_index as f32))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_source_advances_by_delta() {
        let mut clock = FixedTimeSource::new(0.5);
        let samples: Vec<_> = (0..3).map(|_| clock.sample()).collect();
        assert_eq!(samples[0], TimeSample::new(0.0, 0));
        assert_eq!(samples[2], TimeSample::new(1.0, 2));
        clock.reset();
        assert_eq!(clock.sample().frame_index, 0);
    }

    #[test]
    fn system_source_counts_frames() {
        let mut clock = SystemTimeSource::new();
        assert_eq!(clock.sample().frame_index, 0);
        assert_eq!(clock.sample().frame_index, 1);
        assert!(clock.sample().seconds >= 0.0);
    }

    #[test]
    fn uncapped_driver_always_renders() {
        let driver = LoopDriver::new(&RunPolicy::default());
        assert!(driver.should_render(Instant::now()));
        assert!(driver.next_deadline().is_none());
    }

    #[test]
    fn capped_driver_waits_for_interval() {
        let mut driver = LoopDriver::new(&RunPolicy::Animate {
            target_fps: Some(4.0),
        });
        let start = Instant::now();
        driver.last_frame = Some(start);
        assert!(!driver.should_render(start + Duration::from_millis(100)));
        assert!(driver.should_render(start + Duration::from_millis(250)));
        assert_eq!(driver.next_deadline(), Some(start + Duration::from_millis(250)));
    }

    #[test]
    fn invalid_fps_disables_cap() {
        for fps in [0.0, -5.0, f32::NAN] {
            let driver = LoopDriver::with_clock(Box::new(FixedTimeSource::new(0.1)), Some(fps));
            assert!(driver.frame_interval.is_none());
        }
    }
}
