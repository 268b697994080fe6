//! Wall-clock reporting for slow provisioning phases.

use std::time::{Duration, Instant};
use tracing::debug;

/// Measures one named phase; [`Timer::finish`] prints `[elapsed] name`.
pub struct Timer {
    phase: String,
    started: Instant,
}

impl Timer {
    pub fn start(phase: &str) -> Self {
        debug!("phase started: {}", phase);
        Self {
            phase: phase.to_string(),
            started: Instant::now(),
        }
    }

    pub fn finish(self) -> Duration {
        let elapsed = self.started.elapsed();
        println!("  [{}] {}", format_elapsed(elapsed), self.phase);
        elapsed
    }
}

/// Run `f` as a timed phase. The time is reported even when `f` fails.
pub fn timed<T>(phase: &str, f: impl FnOnce() -> T) -> T {
    let timer = Timer::start(phase);
    let out = f();
    timer.finish();
    out
}

/// Seconds below a minute, fractional minutes above.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.1}m", secs / 60.0)
    }
}
