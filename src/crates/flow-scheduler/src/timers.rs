//! Named timers with reset/stop/timed-out semantics, driven by a caller-
//! supplied clock so tests don't depend on wall time.

use tracing::Level;

/// A single named timer. `now`/`timeout` are unix-epoch seconds, passed in
/// rather than read from the system clock so the main loop (and its tests)
/// control time explicitly.
#[derive(Debug, Clone)]
pub struct Timer {
    pub name: String,
    pub interval: f64,
    pub timeout: Option<f64>,
    reset_level: Level,
}

impl Timer {
    pub fn new(name: impl Into<String>, interval: f64) -> Self {
        Self {
            name: name.into(),
            interval,
            timeout: None,
            reset_level: Level::WARN,
        }
    }

    /// Build a timer whose reset is logged at a level other than WARN (the
    /// inactivity timer, for instance, resets on every state change and
    /// would be deafening at WARN).
    pub fn with_reset_level(mut self, level: Level) -> Self {
        self.reset_level = level;
        self
    }

    pub fn reset(&mut self, now: f64) {
        self.timeout = Some(now + self.interval);
        match self.reset_level {
            Level::INFO => tracing::info!(timer = %self.name, interval = self.interval, "timer reset"),
            Level::DEBUG => tracing::debug!(timer = %self.name, interval = self.interval, "timer reset"),
            _ => tracing::warn!(timer = %self.name, interval = self.interval, "timer reset"),
        }
    }

    pub fn stop(&mut self) {
        self.timeout = None;
        tracing::warn!(timer = %self.name, "timer stopped");
    }

    /// Returns true (and clears the timeout) the first time `now` passes
    /// the deadline. Idempotent: calling again before the next `reset`
    /// returns false.
    pub fn timed_out(&mut self, now: f64) -> bool {
        match self.timeout {
            Some(deadline) if now > deadline => {
                tracing::warn!(timer = %self.name, "timer timed out");
                self.timeout = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.timeout.is_some()
    }
}

/// The four well-known timers a running scheduler always carries.
pub struct TimerSet {
    pub inactivity: Timer,
    pub workflow: Timer,
    pub stall: Timer,
    pub restart: Timer,
}

impl TimerSet {
    pub fn new(inactivity_secs: f64, workflow_secs: f64, stall_secs: f64, restart_secs: f64) -> Self {
        Self {
            inactivity: Timer::new("inactivity timeout", inactivity_secs).with_reset_level(Level::DEBUG),
            workflow: Timer::new("workflow timeout", workflow_secs),
            stall: Timer::new("stall timeout", stall_secs),
            restart: Timer::new("restart timeout", restart_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_then_not_timed_out_before_interval() {
        let mut t = Timer::new("x", 10.0);
        t.reset(0.0);
        assert!(!t.timed_out(5.0));
    }

    #[test]
    fn timed_out_once_past_deadline_then_false_until_reset() {
        let mut t = Timer::new("x", 10.0);
        t.reset(0.0);
        assert!(t.timed_out(11.0));
        assert!(!t.timed_out(12.0));
    }

    #[test]
    fn stop_clears_timeout_so_it_never_fires() {
        let mut t = Timer::new("x", 10.0);
        t.reset(0.0);
        t.stop();
        assert!(!t.timed_out(100.0));
        assert!(!t.is_running());
    }

    #[test]
    fn timer_never_reset_never_times_out() {
        let mut t = Timer::new("x", 10.0);
        assert!(!t.timed_out(1_000_000.0));
    }
}
