//! Shutdown modes and the auto-restart host planner.

use rand::Rng;

use crate::error::{Result, SchedulerError};

/// How the scheduler is being asked to stop. Ordered by urgency (ascending);
/// when more than one request is pending the most urgent wins: `now-now` >
/// `now` > `kill` > `clean` > `auto` > `auto-on-task-failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownMode {
    AutoOnTaskFailure,
    Auto,
    RequestCleanly,
    RequestKill,
    RequestNow,
    RequestNowNow,
}

impl ShutdownMode {
    /// Higher urgency wins when two shutdown requests race.
    pub fn more_urgent(self, other: Self) -> Self {
        std::cmp::max(self, other)
    }

    pub fn is_immediate(self) -> bool {
        matches!(self, ShutdownMode::RequestNowNow | ShutdownMode::RequestNow)
    }
}

/// The four ordered steps of a controlled shutdown. Each step is a no-op
/// placeholder hook here; the main loop wires the real behaviour (it owns
/// the process pool and data store) and calls these in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStep {
    StopAcceptingNewSubmissions,
    WaitOrKillRunningJobs,
    FlushFinalDeltaBatch,
    CloseTransportAndExit,
}

pub const SHUTDOWN_SEQUENCE: [ShutdownStep; 4] = [
    ShutdownStep::StopAcceptingNewSubmissions,
    ShutdownStep::WaitOrKillRunningJobs,
    ShutdownStep::FlushFinalDeltaBatch,
    ShutdownStep::CloseTransportAndExit,
];

/// One entry in the configured condemned-host list. A trailing `!` means
/// "force stop here, do not attempt a restart anywhere".
#[derive(Debug, Clone)]
pub struct CondemnedHost {
    pub hostname: String,
    pub force_stop: bool,
}

pub fn parse_condemned_entry(raw: &str) -> CondemnedHost {
    match raw.strip_suffix('!') {
        Some(host) => CondemnedHost {
            hostname: host.to_string(),
            force_stop: true,
        },
        None => CondemnedHost {
            hostname: raw.to_string(),
            force_stop: false,
        },
    }
}

/// Outcome of evaluating the condemned list against the current host.
#[derive(Debug, Clone, PartialEq)]
pub enum RestartPlan {
    /// Current host isn't condemned; keep running.
    StayPut,
    /// Current host is condemned and an alternate host is available.
    MigrateTo { host: String, delay_secs: f64 },
    /// Current host is condemned with the `!` marker: stop, do not restart.
    ForceStopNoRestart,
}

/// Evaluate the restart plan for `current_host` against a freshly (never
/// cached) loaded condemned-host list and a pool of `candidate_hosts` to
/// migrate to. `max_delay_secs` bounds the jitter applied before the
/// scheduled stop-and-restart so many workflows fleeing the same host don't
/// all hit the new one at once.
pub fn plan_restart(
    current_host: &str,
    condemned: &[CondemnedHost],
    candidate_hosts: &[String],
    max_delay_secs: f64,
) -> Result<RestartPlan> {
    let entry = condemned.iter().find(|c| c.hostname == current_host);
    let Some(entry) = entry else {
        return Ok(RestartPlan::StayPut);
    };

    if entry.force_stop {
        tracing::warn!(host = current_host, "host condemned with force-stop marker, no restart");
        return Ok(RestartPlan::ForceStopNoRestart);
    }

    let alternate = candidate_hosts.iter().find(|h| h.as_str() != current_host);
    match alternate {
        Some(host) => {
            let delay_secs = if max_delay_secs > 0.0 {
                rand::thread_rng().gen_range(0.0..=max_delay_secs)
            } else {
                0.0
            };
            tracing::warn!(host = current_host, target = %host, delay_secs, "host condemned, migrating");
            Ok(RestartPlan::MigrateTo {
                host: host.clone(),
                delay_secs,
            })
        }
        None => Err(SchedulerError::RestartHostSelection(format!(
            "host {current_host} is condemned and no alternate host is available"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uncondemned_host_stays_put() {
        let plan = plan_restart("host-a", &[], &["host-b".into()], 0.0).unwrap();
        assert_eq!(plan, RestartPlan::StayPut);
    }

    #[test]
    fn condemned_host_migrates_to_alternate() {
        let condemned = vec![parse_condemned_entry("host-a")];
        let plan = plan_restart("host-a", &condemned, &["host-a".into(), "host-b".into()], 0.0).unwrap();
        assert_eq!(
            plan,
            RestartPlan::MigrateTo {
                host: "host-b".into(),
                delay_secs: 0.0
            }
        );
    }

    #[test]
    fn force_stop_marker_blocks_restart() {
        let condemned = vec![parse_condemned_entry("host-a!")];
        assert!(condemned[0].force_stop);
        let plan = plan_restart("host-a", &condemned, &["host-b".into()], 0.0).unwrap();
        assert_eq!(plan, RestartPlan::ForceStopNoRestart);
    }

    #[test]
    fn condemned_host_with_no_alternate_errors() {
        let condemned = vec![parse_condemned_entry("host-a")];
        let err = plan_restart("host-a", &condemned, &["host-a".into()], 0.0).unwrap_err();
        assert!(matches!(err, SchedulerError::RestartHostSelection(_)));
    }

    #[test]
    fn more_urgent_picks_the_stronger_request() {
        assert_eq!(
            ShutdownMode::RequestCleanly.more_urgent(ShutdownMode::RequestNowNow),
            ShutdownMode::RequestNowNow
        );
    }

    #[test]
    fn request_now_outranks_request_kill() {
        assert_eq!(
            ShutdownMode::RequestNow.more_urgent(ShutdownMode::RequestKill),
            ShutdownMode::RequestNow
        );
    }

    #[test]
    fn request_cleanly_outranks_auto() {
        assert_eq!(
            ShutdownMode::RequestCleanly.more_urgent(ShutdownMode::Auto),
            ShutdownMode::RequestCleanly
        );
    }

    #[test]
    fn auto_outranks_auto_on_task_failure() {
        assert_eq!(
            ShutdownMode::Auto.more_urgent(ShutdownMode::AutoOnTaskFailure),
            ShutdownMode::Auto
        );
    }
}
