// Frame rate counter for published frames
use std::time::{Duration, Instant};

/// Frames-per-second over fixed reporting windows
pub struct FpsCounter {
    /// Start of the current window
    last_report: Instant,
    /// Frames in the current window
    frame_count: u32,
    report_interval: Duration,
}

impl FpsCounter {
    pub fn new(report_interval: Duration) -> Self {
        Self {
            last_report: Instant::now(),
            frame_count: 0,
            report_interval,
        }
    }

    /// Call this after each published frame
    /// Returns Some(fps) once per report interval
    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> Option<f64> {
        self.frame_count += 1;

        let elapsed = now.saturating_duration_since(self.last_report);
        if elapsed >= self.report_interval && !elapsed.is_zero() {
            let fps = self.frame_count as f64 / elapsed.as_secs_f64();
            self.frame_count = 0;
            self.last_report = now;
            Some(fps)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_once_per_interval() {
        let start = Instant::now();
        let mut fps = FpsCounter {
            last_report: start,
            frame_count: 0,
            report_interval: Duration::from_secs(1),
        };

        for i in 1..30 {
            assert_eq!(fps.tick_at(start + Duration::from_millis(i * 10)), None);
        }
        let rate = fps.tick_at(start + Duration::from_secs(1)).unwrap();
        assert!((rate - 30.0).abs() < 1e-9);
        assert_eq!(fps.tick_at(start + Duration::from_millis(1010)), None);
    }
}
