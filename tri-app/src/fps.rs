use std::time::{Duration, Instant};

const MEASURE_WINDOW: Duration = Duration::from_secs(1);

/// Counts presented frames and reports a frame rate roughly once a second.
#[derive(Debug)]
pub struct FrameCounter {
    frames: u32,
    window_start: Instant,
    frame_time_ms: f64,
}

impl FrameCounter {
    pub fn new(now: Instant) -> Self {
        Self {
            frames: 0,
            window_start: now,
            frame_time_ms: 0.0,
        }
    }

    /// Count one frame. Returns the measured fps when at least a second has
    /// passed since the window started, and starts a new window.
    pub fn frame(&mut self, now: Instant) -> Option<u32> {
        self.frames += 1;
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < MEASURE_WINDOW {
            return None;
        }

        let fps = ((self.frames as f64 / elapsed.as_secs_f64()) as u32).max(1);
        self.frame_time_ms = 1000.0 / fps as f64;
        self.frames = 0;
        self.window_start = now;
        Some(fps)
    }

    /// Milliseconds per frame from the last completed window.
    pub fn frame_time_ms(&self) -> f64 {
        self.frame_time_ms
    }
}

pub fn fps_title(fps: u32) -> String {
    format!("Running at {fps} fps.")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_report_inside_first_second() {
        let start = Instant::now();
        let mut counter = FrameCounter::new(start);

        for i in 1..=10 {
            assert_eq!(counter.frame(start + Duration::from_millis(i * 16)), None);
        }
        assert_eq!(counter.frame_time_ms(), 0.0);
    }

    #[test]
    fn reports_frames_per_elapsed_second() {
        let start = Instant::now();
        let mut counter = FrameCounter::new(start);

        for _ in 0..119 {
            counter.frame(start + Duration::from_millis(500));
        }
        let fps = counter.frame(start + Duration::from_secs(2));

        assert_eq!(fps, Some(60));
        assert!((counter.frame_time_ms() - 1000.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn window_restarts_after_report() {
        let start = Instant::now();
        let mut counter = FrameCounter::new(start);

        assert_eq!(counter.frame(start + Duration::from_secs(1)), Some(1));
        // Only half a second into the new window.
        assert_eq!(counter.frame(start + Duration::from_millis(1500)), None);
        assert_eq!(counter.frame(start + Duration::from_secs(2)), Some(2));
    }

    #[test]
    fn slow_frames_report_at_least_one() {
        let start = Instant::now();
        let mut counter = FrameCounter::new(start);

        assert_eq!(counter.frame(start + Duration::from_secs(5)), Some(1));
        assert_eq!(counter.frame_time_ms(), 1000.0);
    }

    #[test]
    fn title_includes_fps() {
        assert_eq!(fps_title(144), "Running at 144 fps.");
    }
}
