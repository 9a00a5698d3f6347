use web_time::{Duration, Instant};

/// Weight of the newest sample in the moving averages.
const SMOOTHING: f32 = 0.05;

/// Frame pacing plus smoothed frame rate and per-step cost.
pub struct FrameTiming {
    /// Target FPS (0 = unlimited)
    target_fps: u32,
    min_frame_duration: Duration,
    last_frame: Instant,
    smoothed_fps: f32,
    /// Milliseconds per simulation step, averaged like the FPS.
    smoothed_step_ms: f32,
}

fn blend(old: f32, sample: f32) -> f32 {
    old * (1.0 - SMOOTHING) + sample * SMOOTHING
}

impl FrameTiming {
    /// Create a new frame timer with the given FPS target (0 = unlimited).
    pub fn new(target_fps: u32) -> Self {
        let min_frame_duration = if target_fps > 0 {
            Duration::from_secs_f64(1.0 / target_fps as f64)
        } else {
            Duration::ZERO
        };

        Self {
            target_fps,
            min_frame_duration,
            last_frame: Instant::now(),
            smoothed_fps: 60.0,
            smoothed_step_ms: 0.0,
        }
    }

    /// True once enough time has passed since the last frame.
    pub fn should_render(&self) -> bool {
        if self.target_fps == 0 {
            return true;
        }
        self.last_frame.elapsed() >= self.min_frame_duration
    }

    /// Call after presenting a frame.
    pub fn end_frame(&mut self) {
        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        if frame_time > 0.0 {
            self.smoothed_fps = blend(self.smoothed_fps, 1.0 / frame_time);
        }
    }

    /// Fold in `steps` simulation steps that took `elapsed` in total.
    pub fn record_steps(&mut self, steps: u32, elapsed: Duration) {
        if steps == 0 {
            return;
        }
        let per_step = elapsed.as_secs_f32() * 1000.0 / steps as f32;
        self.smoothed_step_ms = if self.smoothed_step_ms == 0.0 {
            per_step
        } else {
            blend(self.smoothed_step_ms, per_step)
        };
    }

    /// Get the current FPS (smoothed)
    pub fn fps(&self) -> f32 {
        self.smoothed_fps
    }

    /// Smoothed milliseconds per frame.
    pub fn frame_ms(&self) -> f32 {
        1000.0 / self.smoothed_fps.max(f32::EPSILON)
    }

    /// Smoothed milliseconds per simulation step.
    pub fn step_ms(&self) -> f32 {
        self.smoothed_step_ms
    }

    /// Title-bar readout.
    pub fn summary(&self) -> String {
        format!(
            "{:.0} fps, {:.2} ms/frame, {:.3} ms/step",
            self.fps(),
            self.frame_ms(),
            self.step_ms()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_target_always_renders() {
        assert!(FrameTiming::new(0).should_render());
    }

    #[test]
    fn first_step_sample_is_taken_as_is() {
        let mut timing = FrameTiming::new(60);
        timing.record_steps(10, Duration::from_millis(5));
        assert!((timing.step_ms() - 0.5).abs() < 1e-6);
        timing.record_steps(0, Duration::from_secs(1));
        assert!((timing.step_ms() - 0.5).abs() < 1e-6);
        timing.record_steps(1, Duration::from_millis(1));
        assert!(timing.step_ms() > 0.5 && timing.step_ms() < 1.0);
    }

    #[test]
    fn frame_ms_inverts_fps() {
        let timing = FrameTiming::new(0);
        assert!((timing.frame_ms() - 1000.0 / 60.0).abs() < 1e-3);
        assert!(timing.summary().starts_with("60 fps"));
    }
}
