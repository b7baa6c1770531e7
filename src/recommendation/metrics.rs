//! Stage timing for recommendation and feed runs
//!
//! A [`PerformanceTimer`] records the wall time of one stage into the
//! `playfeed_stage_duration_ms` histogram and logs it when dropped.

use std::time::Instant;

/// Performance timer for tracking stage duration
pub struct PerformanceTimer {
    start: Instant,
    stage: &'static str,
}

impl PerformanceTimer {
    pub fn new(stage: &'static str) -> Self {
        Self {
            start: Instant::now(),
            stage,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Warn when the stage has run past `threshold_ms`; returns whether it did
    pub fn log_if_slow(&self, threshold_ms: u64) -> bool {
        let elapsed = self.elapsed_ms();
        let slow = elapsed > threshold_ms;
        if slow {
            metrics::counter!("playfeed_slow_stages_total", "stage" => self.stage).increment(1);
            tracing::warn!(
                "Slow stage: {} took {}ms (threshold: {}ms)",
                self.stage,
                elapsed,
                threshold_ms
            );
        }
        slow
    }
}

impl Drop for PerformanceTimer {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_secs_f64() * 1_000.0;
        metrics::histogram!("playfeed_stage_duration_ms", "stage" => self.stage).record(elapsed);
        tracing::debug!("{} completed in {:.1}ms", self.stage, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_reports_stage_and_elapsed() {
        let timer = PerformanceTimer::new("normalize");
        assert_eq!(timer.stage(), "normalize");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_ms() >= 5);
    }

    #[test]
    fn test_log_if_slow_compares_against_threshold() {
        let timer = PerformanceTimer::new("commit");
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.log_if_slow(0));
        assert!(!timer.log_if_slow(60_000));
    }
}
