use std::time::{Duration, Instant};

/// Frame timing snapshot returned by each paced present.
#[derive(Debug, Copy, Clone)]
pub struct FrameTime {
    /// Time elapsed since the previous paced frame, in seconds (clamped).
    pub dt: f32,

    /// Monotonic timestamp taken once the frame period elapsed.
    pub now: Instant,

    /// Monotonic frame counter.
    pub frame_index: u64,
}

/// Minimal frame-rate cap.
///
/// `pace` spins until at least `min_period` has elapsed since the previous call.
/// This is a cap, not vsync: the spin does not align with display refresh.
///
/// The reported delta time is clamped so a stall (debugger, minimized window)
/// does not hand the simulation a huge step.
#[derive(Debug, Clone)]
pub struct FramePacer {
    last: Instant,
    frame_index: u64,
    min_period: Duration,
    dt_min: Duration,
    dt_max: Duration,
}

impl FramePacer {
    pub fn new(min_period: Duration) -> Self {
        Self {
            last: Instant::now(),
            frame_index: 0,
            min_period,
            dt_min: Duration::from_micros(100),
            dt_max: Duration::from_millis(250),
        }
    }

    pub fn min_period(&self) -> Duration {
        self.min_period
    }

    /// Resets the pacing baseline, e.g. after the window was restored.
    pub fn reset(&mut self) {
        self.last = Instant::now();
    }

    /// Waits out the remainder of the frame period and advances the frame.
    pub fn pace(&mut self) -> FrameTime {
        let deadline = self.last + self.min_period;
        let mut now = Instant::now();
        while now < deadline {
            std::hint::spin_loop();
            now = Instant::now();
        }

        let dt = now
            .saturating_duration_since(self.last)
            .clamp(self.dt_min, self.dt_max);
        self.last = now;

        let ft = FrameTime {
            dt: dt.as_secs_f32(),
            now,
            frame_index: self.frame_index,
        };
        self.frame_index = self.frame_index.wrapping_add(1);
        ft
    }
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new(Duration::from_secs_f64(1.0 / 60.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pace_waits_for_min_period() {
        let mut pacer = FramePacer::new(Duration::from_millis(5));
        pacer.reset();
        let start = Instant::now();
        pacer.pace();
        assert!(start.elapsed() >= Duration::from_millis(4));
    }

    #[test]
    fn pace_counts_frames() {
        let mut pacer = FramePacer::new(Duration::ZERO);
        assert_eq!(pacer.pace().frame_index, 0);
        assert_eq!(pacer.pace().frame_index, 1);
    }

    #[test]
    fn dt_is_clamped_after_stall() {
        let mut pacer = FramePacer::new(Duration::ZERO);
        pacer.last = Instant::now() - Duration::from_secs(3);
        let ft = pacer.pace();
        assert!((ft.dt - 0.25).abs() < 1e-6);
    }

    #[test]
    fn dt_has_a_floor() {
        let mut pacer = FramePacer::new(Duration::ZERO);
        pacer.pace();
        let ft = pacer.pace();
        assert!(ft.dt >= 0.0001 - 1e-7);
    }
}
