// Stage progress payload and helpers

use std::time::Duration;

use serde::Serialize;

use crate::constants::PROGRESS_LOG_EVERY;

/// Progress of a long-running loop inside a stage (chunks extracted, chunks screened, ...).
#[derive(Debug, Clone, Serialize)]
pub struct StageProgress {
    pub video: String,
    pub stage: String,
    pub current: u64,
    pub total: u64,
    pub percent: f64,
    pub message: String,
    pub eta_seconds: Option<f64>,
}

impl StageProgress {
    pub fn new(video: impl Into<String>, stage: impl Into<String>, current: u64, total: u64) -> Self {
        let total_safe = total.max(1);
        let percent = (current as f64 / total_safe as f64) * 100.0;
        Self {
            video: video.into(),
            stage: stage.into(),
            current,
            total,
            percent: percent.min(100.0),
            message: String::new(),
            eta_seconds: None,
        }
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = msg.into();
        self
    }

    /// Linear ETA from the time spent on the items done so far
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        if self.current > 0 && self.total >= self.current {
            let per_item = elapsed.as_secs_f64() / self.current as f64;
            self.eta_seconds = Some(per_item * (self.total - self.current) as f64);
        }
        self
    }

    /// Throttle: first, every Nth and last item
    pub fn should_log(current: u64, total: u64) -> bool {
        current == 1 || current == total || current % PROGRESS_LOG_EVERY == 0
    }

    pub fn log(&self) {
        match self.eta_seconds {
            Some(eta) => log::info!(
                "[{}] {} {}/{} ({:.0}%) eta {:.0}s {}",
                self.video, self.stage, self.current, self.total, self.percent, eta, self.message
            ),
            None => log::info!(
                "[{}] {} {}/{} ({:.0}%) {}",
                self.video, self.stage, self.current, self.total, self.percent, self.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_and_eta() {
        let p = StageProgress::new("a.dav", "chunking", 2, 8).with_elapsed(Duration::from_secs(10));
        assert_eq!(p.percent, 25.0);
        assert_eq!(p.eta_seconds, Some(30.0));

        let empty = StageProgress::new("a.dav", "filtering", 0, 0);
        assert_eq!(empty.percent, 0.0);
        assert_eq!(empty.eta_seconds, None);
    }

    #[test]
    fn test_should_log_throttles() {
        assert!(StageProgress::should_log(1, 95));
        assert!(!StageProgress::should_log(7, 95));
        assert!(StageProgress::should_log(20, 95));
        assert!(StageProgress::should_log(95, 95));
    }
}
