//! Frame clock.
//!
//! Tracks elapsed and delta time for [`FrameParams`](crate::FrameParams)
//! and computes a frame rate over a fixed reporting interval.

use std::time::{Duration, Instant};

/// How often the frame rate is recomputed.
pub const FPS_REPORT_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct Time {
    start: Instant,
    last_frame: Instant,
    elapsed_secs: f32,
    delta_secs: f32,
    frame_count: u64,
    fps: f32,
    fps_frame_count: u64,
    fps_update_time: Instant,
    fps_update_interval: Duration,
    /// Set by the `update` call that recomputed the frame rate.
    fps_updated: bool,
}

impl Time {
    pub fn new() -> Self {
        Self::with_report_interval(FPS_REPORT_INTERVAL)
    }

    pub fn with_report_interval(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_frame: now,
            elapsed_secs: 0.0,
            delta_secs: 0.0,
            frame_count: 0,
            fps: 0.0,
            fps_frame_count: 0,
            fps_update_time: now,
            fps_update_interval: interval,
            fps_updated: false,
        }
    }

    /// Update timing values. Call once per frame.
    ///
    /// Returns `(elapsed_time, delta_time)` in seconds.
    pub fn update(&mut self) -> (f32, f32) {
        self.update_at(Instant::now())
    }

    fn update_at(&mut self, now: Instant) -> (f32, f32) {
        self.delta_secs = now.duration_since(self.last_frame).as_secs_f32();
        self.last_frame = now;
        self.elapsed_secs = now.duration_since(self.start).as_secs_f32();
        self.frame_count += 1;

        let fps_elapsed = now.duration_since(self.fps_update_time);
        self.fps_updated = fps_elapsed >= self.fps_update_interval;
        if self.fps_updated {
            let frames_since = self.frame_count - self.fps_frame_count;
            self.fps = frames_since as f32 / fps_elapsed.as_secs_f32();
            self.fps_frame_count = self.frame_count;
            self.fps_update_time = now;
        }

        (self.elapsed_secs, self.delta_secs)
    }

    /// Seconds since start.
    #[inline]
    pub fn elapsed(&self) -> f32 {
        self.elapsed_secs
    }

    /// Seconds since the previous frame.
    #[inline]
    pub fn delta(&self) -> f32 {
        self.delta_secs
    }

    #[inline]
    pub fn frame(&self) -> u64 {
        self.frame_count
    }

    /// Frames per second over the last reporting interval.
    #[inline]
    pub fn fps(&self) -> f32 {
        self.fps
    }

    /// Whether the last `update` recomputed [`fps`](Self::fps).
    #[inline]
    pub fn fps_updated(&self) -> bool {
        self.fps_updated
    }
}

impl Default for Time {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_advances_clock() {
        let mut time = Time::new();
        let start = time.start;
        let (elapsed, delta) = time.update_at(start + Duration::from_millis(100));
        assert!((elapsed - 0.1).abs() < 1e-6);
        assert!((delta - 0.1).abs() < 1e-6);
        assert_eq!(time.frame(), 1);

        let (elapsed, delta) = time.update_at(start + Duration::from_millis(150));
        assert!((elapsed - 0.15).abs() < 1e-6);
        assert!((delta - 0.05).abs() < 1e-6);
        assert_eq!(time.frame(), 2);
    }

    #[test]
    fn test_fps_reported_per_interval() {
        let mut time = Time::with_report_interval(Duration::from_secs(1));
        let start = time.start;
        for i in 1..60 {
            time.update_at(start + Duration::from_millis(i * 16));
            assert!(!time.fps_updated());
        }
        time.update_at(start + Duration::from_secs(1));
        assert!(time.fps_updated());
        assert!((time.fps() - 60.0).abs() < 1e-3);

        time.update_at(start + Duration::from_millis(1016));
        assert!(!time.fps_updated());
    }
}
