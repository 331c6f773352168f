use std::time::{Duration, Instant};

/// Counts presented frames and reports the rate once per interval.
pub struct FpsCounter {
    frame_count: u32,
    last_time: Instant,
    interval: Duration,
}

impl FpsCounter {
    pub fn new(interval: Duration) -> Self {
        Self {
            frame_count: 0,
            last_time: Instant::now(),
            interval,
        }
    }

    /// Records a frame presented at `now`. Returns the rate when the
    /// interval has passed.
    pub fn update(&mut self, now: Instant) -> Option<f32> {
        self.frame_count += 1;
        let elapsed = now.saturating_duration_since(self.last_time);
        if elapsed < self.interval {
            return None;
        }
        let fps = self.frame_count as f32 / elapsed.as_secs_f32();
        self.frame_count = 0;
        self.last_time = now;
        Some(fps)
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

/// Window title for the current filter and export progress.
pub fn window_title(filter: &str, export_progress: Option<f32>) -> String {
    match export_progress {
        Some(p) => format!("emotefx - {} - exporting {:.0}%", filter, p * 100.0),
        None => format!("emotefx - {}", filter),
    }
}
