//! External interface shims: the three inbound queues the main loop drains
//! each tick. These model what would otherwise arrive over a network
//! transport, kept here as plain in-process queues so the loop itself stays
//! transport-agnostic.

use std::collections::VecDeque;

use serde_json::Value;

/// `(method_name, positional_args, kwargs)` — a single queued command.
#[derive(Debug, Clone)]
pub struct QueuedCommand {
    pub method: String,
    pub args: Vec<Value>,
    pub kwargs: serde_json::Map<String, Value>,
}

/// A single queued task/job message. `severity` follows the usual
/// logging levels (`INFO`, `WARN`, `CRITICAL`, ...); `task_job_id` is the
/// raw, unparsed identifier as received.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub task_job_id: String,
    pub event_time: f64,
    pub severity: String,
    pub message: String,
}

/// `(message, id)` — an external trigger satisfaction report.
#[derive(Debug, Clone)]
pub struct QueuedExtTrigger {
    pub message: String,
    pub id: String,
}

/// A task/job identifier as parsed out of a message-queue entry's
/// `task_job_id` field. `sub_num` is `None` when the form omits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTaskJobId {
    pub task_name: String,
    pub cycle_point: Option<String>,
    pub sub_num: Option<String>,
    pub state: Option<String>,
}

/// Accepts `CYCLE/TASK/SUB`, `CYCLE/TASK`, `TASK.CYCLE.SUB`, `TASK.CYCLE`,
/// or bare `TASK`, each optionally suffixed `:STATE`. Returns `None` if
/// none of the five shapes match.
pub fn parse_task_job_id(raw: &str) -> Option<ParsedTaskJobId> {
    let (body, state) = match raw.rsplit_once(':') {
        Some((b, s)) => (b, Some(s.to_string())),
        None => (raw, None),
    };

    if let Some((cycle, rest)) = body.split_once('/') {
        let mut parts = rest.splitn(2, '/');
        let task_name = parts.next()?.to_string();
        let sub_num = parts.next().map(|s| s.to_string());
        if task_name.is_empty() || cycle.is_empty() {
            return None;
        }
        return Some(ParsedTaskJobId {
            task_name,
            cycle_point: Some(cycle.to_string()),
            sub_num,
            state,
        });
    }

    let segments: Vec<&str> = body.split('.').collect();
    match segments.as_slice() {
        [task_name, cycle, sub_num] if !task_name.is_empty() && !cycle.is_empty() => Some(ParsedTaskJobId {
            task_name: task_name.to_string(),
            cycle_point: Some(cycle.to_string()),
            sub_num: Some(sub_num.to_string()),
            state,
        }),
        [task_name, cycle] if !task_name.is_empty() && !cycle.is_empty() => Some(ParsedTaskJobId {
            task_name: task_name.to_string(),
            cycle_point: Some(cycle.to_string()),
            sub_num: None,
            state,
        }),
        [task_name] if !task_name.is_empty() => Some(ParsedTaskJobId {
            task_name: task_name.to_string(),
            cycle_point: None,
            sub_num: None,
            state,
        }),
        _ => None,
    }
}

/// Holds the three inbound queues. FIFO; the main loop drains each fully
/// before moving to the next phase of the tick.
#[derive(Default)]
pub struct InterfaceShims {
    commands: VecDeque<QueuedCommand>,
    messages: VecDeque<QueuedMessage>,
    ext_triggers: VecDeque<QueuedExtTrigger>,
}

impl InterfaceShims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit_command(&mut self, cmd: QueuedCommand) {
        self.commands.push_back(cmd);
    }

    pub fn submit_message(&mut self, msg: QueuedMessage) {
        self.messages.push_back(msg);
    }

    pub fn submit_ext_trigger(&mut self, trig: QueuedExtTrigger) {
        self.ext_triggers.push_back(trig);
    }

    pub fn drain_commands(&mut self) -> Vec<QueuedCommand> {
        self.commands.drain(..).collect()
    }

    pub fn drain_messages(&mut self) -> Vec<QueuedMessage> {
        self.messages.drain(..).collect()
    }

    pub fn drain_ext_triggers(&mut self) -> Vec<QueuedExtTrigger> {
        self.ext_triggers.drain(..).collect()
    }

    pub fn has_pending_commands(&self) -> bool {
        !self.commands.is_empty()
    }
}

/// Commands the loop recognizes. An unrecognized method name is logged and
/// the command dropped; it never aborts the tick.
pub const KNOWN_COMMANDS: &[&str] = &[
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

pub fn is_known_command(method: &str) -> bool {
    KNOWN_COMMANDS.contains(&method)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cycle_task_sub_form() {
        let p = parse_task_job_id("20000101T0000Z/foo/03:succeeded").unwrap();
        assert_eq!(p.task_name, "foo");
        assert_eq!(p.cycle_point.as_deref(), Some("20000101T0000Z"));
        assert_eq!(p.sub_num.as_deref(), Some("03"));
        assert_eq!(p.state.as_deref(), Some("succeeded"));
    }

    #[test]
    fn parses_cycle_task_form_without_sub() {
        let p = parse_task_job_id("20000101T0000Z/foo").unwrap();
        assert_eq!(p.task_name, "foo");
        assert_eq!(p.cycle_point.as_deref(), Some("20000101T0000Z"));
        assert_eq!(p.sub_num, None);
    }

    #[test]
    fn parses_dotted_task_cycle_sub_form() {
        let p = parse_task_job_id("foo.20000101T0000Z.03").unwrap();
        assert_eq!(p.task_name, "foo");
        assert_eq!(p.cycle_point.as_deref(), Some("20000101T0000Z"));
        assert_eq!(p.sub_num.as_deref(), Some("03"));
    }

    #[test]
    fn parses_dotted_task_cycle_form() {
        let p = parse_task_job_id("foo.20000101T0000Z").unwrap();
        assert_eq!(p.task_name, "foo");
        assert_eq!(p.cycle_point.as_deref(), Some("20000101T0000Z"));
        assert_eq!(p.sub_num, None);
    }

    #[test]
    fn parses_bare_task_form() {
        let p = parse_task_job_id("foo").unwrap();
        assert_eq!(p.task_name, "foo");
        assert_eq!(p.cycle_point, None);
        assert_eq!(p.sub_num, None);
    }

    #[test]
    fn unknown_command_is_rejected_by_name_check() {
        assert!(!is_known_command("delete_everything"));
        assert!(is_known_command("pause"));
    }

    #[test]
    fn drain_returns_fifo_order() {
        let mut shims = InterfaceShims::new();
        shims.submit_command(QueuedCommand {
            method: "pause".into(),
            args: vec![],
            kwargs: Default::default(),
        });
        shims.submit_command(QueuedCommand {
            method: "resume".into(),
            args: vec![],
            kwargs: Default::default(),
        });
        let drained = shims.drain_commands();
        assert_eq!(drained[0].method, "pause");
        assert_eq!(drained[1].method, "resume");
        assert!(!shims.has_pending_commands());
    }
}
