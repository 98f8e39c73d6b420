use std::time::{Duration, Instant};

/// Timing for one rendered frame.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FrameTime {
    /// Seconds between the start of the previous frame and the start of this one.
    /// Zero for the first frame.
    pub interval: f32,

    /// CPU time spent between `begin` and `end` (pre-render through present).
    pub render_time: Duration,

    pub frame_index: u64,
}

/// Measures frame intervals and per-frame render time.
///
/// `begin` is called from pre-render and `end` from post-render. Intervals
/// are clamped so a debugger pause does not report a multi-second frame.
#[derive(Debug, Clone)]
pub struct FrameClock {
    previous_begin: Option<Instant>,
    current_begin: Option<Instant>,
    frame_index: u64,
    interval_max: Duration,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::with_interval_cap(Duration::from_millis(250))
    }

    pub fn with_interval_cap(interval_max: Duration) -> Self {
        Self {
            previous_begin: None,
            current_begin: None,
            frame_index: 0,
            interval_max,
        }
    }

    /// Marks the start of a frame.
    pub fn begin(&mut self) {
        let now = Instant::now();
        self.previous_begin = self.current_begin.replace(now);
    }

    /// Marks the end of the frame started by `begin` and returns its timing.
    ///
    /// Calling `end` without `begin` reports a zero render time.
    pub fn end(&mut self) -> FrameTime {
        let now = Instant::now();
        let begin = self.current_begin.unwrap_or(now);

        let interval = match self.previous_begin {
            Some(prev) => begin.saturating_duration_since(prev).min(self.interval_max),
            None => Duration::ZERO,
        };

        let ft = FrameTime {
            interval: interval.as_secs_f32(),
            render_time: now.saturating_duration_since(begin),
            frame_index: self.frame_index,
        };
        self.frame_index = self.frame_index.wrapping_add(1);
        ft
    }

    #[inline]
    pub fn frames(&self) -> u64 {
        self.frame_index
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_frame_has_zero_interval() {
        let mut c = FrameClock::new();
        c.begin();
        let ft = c.end();
        assert_eq!(ft.interval, 0.0);
        assert_eq!(ft.frame_index, 0);
    }

    #[test]
    fn frame_index_increments_per_end() {
        let mut c = FrameClock::new();
        for expected in 0..3 {
            c.begin();
            assert_eq!(c.end().frame_index, expected);
        }
        assert_eq!(c.frames(), 3);
    }

    #[test]
    fn interval_is_clamped() {
        let mut c = FrameClock::with_interval_cap(Duration::from_millis(1));
        c.begin();
        c.end();
        std::thread::sleep(Duration::from_millis(5));
        c.begin();
        let ft = c.end();
        assert!(ft.interval <= 0.001 + f32::EPSILON);
        assert!(ft.interval > 0.0);
    }

    #[test]
    fn end_without_begin_is_zero_render_time() {
        let mut c = FrameClock::new();
        assert_eq!(c.end().render_time, Duration::ZERO);
    }
}
