//! Step timer for the compiler pipeline.

use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Records the duration of consecutive pipeline steps.
///
/// Each call to [`TicToc::step`] attributes the time since the previous call
/// to the named step and logs it at `debug` level.
#[derive(Debug)]
pub struct TicToc {
    name: &'static str,
    last: Instant,
    steps: Vec<(&'static str, Duration)>,
}

impl TicToc {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            last: Instant::now(),
            steps: Vec::new(),
        }
    }

    /// Close the current step under `label`
    pub fn step(&mut self, label: &'static str) {
        let now = Instant::now();
        let elapsed = now - self.last;
        self.last = now;
        debug!(
            timer = self.name,
            step = label,
            elapsed_us = elapsed.as_micros() as u64,
            "step done"
        );
        self.steps.push((label, elapsed));
    }

    pub fn total(&self) -> Duration {
        self.steps.iter().map(|(_, d)| *d).sum()
    }

    /// Finish timing; with `report` set, log the profile at `info` level
    pub fn finish(self, report: bool) -> Vec<(&'static str, Duration)> {
        if report {
            let total = self.total();
            info!(
                timer = self.name,
                total_us = total.as_micros() as u64,
                "profile"
            );
            for (label, elapsed) in &self.steps {
                info!(
                    timer = self.name,
                    step = *label,
                    elapsed_us = elapsed.as_micros() as u64,
                    "  step"
                );
            }
        }
        self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_are_recorded_in_order() {
        let mut tt = TicToc::new("test");
        tt.step("first");
        tt.step("second");
        let steps = tt.finish(false);
        let labels: Vec<_> = steps.iter().map(|(l, _)| *l).collect();
        assert_eq!(labels, vec!["first", "second"]);
    }
}
