/* Performance budgeter: samples this process's CPU%/RSS via `sysinfo` and
 * turns them, together with the caller-reported fps, into a recommended
 * poll interval and transmission mode. Pure advice — it never touches the
 * controller's state directly. */
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::models::{BudgetStatus, PerformanceTargets};

const MIN_POLL_MS: u32 = 200;
const MAX_POLL_MS: u32 = 2000;

pub struct PerformanceBudgeter {
    targets: PerformanceTargets,
    system: System,
    pid: Pid,
}

impl PerformanceBudgeter {
    /// Construct a budgeter and take the priming sample `sysinfo` (like
    /// `psutil`) needs before `cpu_usage()` returns a meaningful value.
    pub fn new(targets: PerformanceTargets) -> Self {
        let pid = sysinfo::get_current_pid().unwrap_or(Pid::from(0usize));
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        Self { targets, system, pid }
    }

    pub fn targets(&self) -> PerformanceTargets {
        self.targets
    }

    /// Sample current resource usage and recommend a `poll_ms`/mode given
    /// the caller's last observed `fps`.
    pub fn sample(&mut self, fps: f64, poll_ms: u32, current_mode: &str) -> BudgetStatus {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);
        let (cpu_percent, rss_mb) = match self.system.process(self.pid) {
            Some(process) => (process.cpu_usage() as f64, process.memory() as f64 / (1024.0 * 1024.0)),
            None => (0.0, 0.0),
        };

        let targets = self.targets;

        if cpu_percent > targets.cpu_percent_max || rss_mb > targets.rss_mb_max {
            let recommended_poll_ms = (((poll_ms as f64 * 1.25) as u32) + 25).min(MAX_POLL_MS);
            return BudgetStatus {
                cpu_percent,
                rss_mb,
                fps,
                overloaded: true,
                warning: Some("resource_overload".to_string()),
                recommended_poll_ms,
                recommended_mode: "adaptive".to_string(),
            };
        }

        if fps < targets.fps_min {
            return BudgetStatus {
                cpu_percent,
                rss_mb,
                fps,
                overloaded: false,
                warning: Some("below_fps_target".to_string()),
                recommended_poll_ms: poll_ms.saturating_sub(50).max(MIN_POLL_MS),
                recommended_mode: current_mode.to_string(),
            };
        }

        if fps > targets.fps_max {
            return BudgetStatus {
                cpu_percent,
                rss_mb,
                fps,
                overloaded: false,
                warning: Some("above_fps_target".to_string()),
                recommended_poll_ms: (poll_ms + 50).min(MAX_POLL_MS),
                recommended_mode: current_mode.to_string(),
            };
        }

        BudgetStatus {
            cpu_percent,
            rss_mb,
            fps,
            overloaded: false,
            warning: None,
            recommended_poll_ms: poll_ms,
            recommended_mode: current_mode.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommendation_stays_within_bounds() {
        let mut budgeter = PerformanceBudgeter::new(PerformanceTargets::default());
        for fps in [0.5, 5.0, 7.0, 10.0, 60.0] {
            let status = budgeter.sample(fps, 500, "adaptive");
            assert!(status.recommended_poll_ms >= MIN_POLL_MS);
            assert!(status.recommended_poll_ms <= MAX_POLL_MS);
        }
    }

    #[test]
    fn low_fps_without_overload_lowers_poll_interval() {
        let mut budgeter = PerformanceBudgeter::new(PerformanceTargets {
            cpu_percent_max: 1000.0,
            rss_mb_max: 1_000_000.0,
            ..PerformanceTargets::default()
        });
        let status = budgeter.sample(1.0, 500, "adaptive");
        assert!(!status.overloaded);
        assert_eq!(status.warning.as_deref(), Some("below_fps_target"));
        assert_eq!(status.recommended_poll_ms, 450);
    }

    #[test]
    fn high_fps_without_overload_raises_poll_interval() {
        let mut budgeter = PerformanceBudgeter::new(PerformanceTargets {
            cpu_percent_max: 1000.0,
            rss_mb_max: 1_000_000.0,
            ..PerformanceTargets::default()
        });
        let status = budgeter.sample(30.0, 500, "adaptive");
        assert!(!status.overloaded);
        assert_eq!(status.warning.as_deref(), Some("above_fps_target"));
        assert_eq!(status.recommended_poll_ms, 550);
    }
}
