//! The command-name contract and `stop`'s argument-preference rule.

use serde::{Deserialize, Serialize};

pub const COMMAND_NAMES: &[&str] = &[
    "pause",
    "resume",
    "stop",
    "hold",
    "release",
    "release_hold_point",
    "set_hold_point",
    "kill_tasks",
    "poll_tasks",
    "remove_tasks",
    "reload_workflow",
    "set_verbosity",
    "set_graph_window_extent",
    "force_trigger_tasks",
    "force_spawn_children",
    "put_ext_trigger",
    "put_messages",
    "broadcast",
];

pub fn is_known_command(name: &str) -> bool {
    COMMAND_NAMES.contains(&name)
}

/// `stop`'s arguments are mutually preferential: at most one takes effect,
/// chosen by this priority order (highest first).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StopArgs {
    pub flow_num: Option<u64>,
    pub cycle_point: Option<String>,
    pub clock_time: Option<String>,
    pub task: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCriterion {
    FlowNum(u64),
    ClockTime,
    Task,
    Mode,
}

pub const VALID_STOP_MODES: &[&str] = &[
    "REQUEST_NOW_NOW",
    "REQUEST_NOW",
    "REQUEST_KILL",
    "REQUEST_CLEAN",
    "AUTO",
    "AUTO_ON_TASK_FAILURE",
];

/// Picks the effective criterion out of `stop`'s mutually-preferential
/// arguments. Returns `None` if none were given (an unconditional stop).
pub fn resolve_stop_criterion(args: &StopArgs) -> Result<Option<StopCriterion>, String> {
    if let Some(num) = args.flow_num {
        return Ok(Some(StopCriterion::FlowNum(num)));
    }
    if args.cycle_point.is_some() {
        return Ok(Some(StopCriterion::ClockTime));
    }
    if args.clock_time.is_some() {
        return Ok(Some(StopCriterion::ClockTime));
    }
    if args.task.is_some() {
        return Ok(Some(StopCriterion::Task));
    }
    if let Some(mode) = &args.mode {
        if !VALID_STOP_MODES.contains(&mode.as_str()) {
            return Err(format!("invalid stop mode: {mode}"));
        }
        return Ok(Some(StopCriterion::Mode));
    }
    Ok(None)
}
