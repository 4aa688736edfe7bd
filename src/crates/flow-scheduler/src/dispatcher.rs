//! Workflow event dispatcher: fires the fixed set of lifecycle events and
//! tracks the orthogonality between the startup/shutdown pair and abort.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowEvent {
    Startup,
    Shutdown,
    Abort,
    Stall,
    WorkflowTimeout,
    InactivityTimeout,
    StallTimeout,
    RestartTimeout,
}

impl WorkflowEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowEvent::Startup => "startup",
            WorkflowEvent::Shutdown => "shutdown",
            WorkflowEvent::Abort => "abort",
            WorkflowEvent::Stall => "stall",
            WorkflowEvent::WorkflowTimeout => "workflow timeout",
            WorkflowEvent::InactivityTimeout => "inactivity timeout",
            WorkflowEvent::StallTimeout => "stall timeout",
            WorkflowEvent::RestartTimeout => "restart timeout",
        }
    }
}

/// Handler callback signature: event, plus a free-text message.
pub type EventHandler = Box<dyn Fn(WorkflowEvent, &str) + Send + Sync>;

/// Fires events to registered handlers and records the trace for tests and
/// diagnostics. `startup`/`shutdown` and `abort` are mutually exclusive
/// within one run: once `abort` fires, `shutdown` is refused (and vice
/// versa), matching the "never both" contract.
#[derive(Default)]
pub struct Dispatcher {
    handlers: Vec<EventHandler>,
    trace: Vec<WorkflowEvent>,
    aborted: bool,
    shut_down: bool,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: EventHandler) {
        self.handlers.push(handler);
    }

    pub fn fire(&mut self, event: WorkflowEvent, message: &str) {
        match event {
            WorkflowEvent::Abort => {
                if self.shut_down {
                    tracing::error!("refusing to fire abort after shutdown already fired");
                    return;
                }
                self.aborted = true;
            }
            WorkflowEvent::Shutdown => {
                if self.aborted {
                    tracing::error!("refusing to fire shutdown after abort already fired");
                    return;
                }
                self.shut_down = true;
            }
            _ => {}
        }
        tracing::info!(event = event.as_str(), message, "workflow event");
        self.trace.push(event);
        for h in &self.handlers {
            h(event, message);
        }
    }

    pub fn trace(&self) -> &[WorkflowEvent] {
        &self.trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_then_shutdown_is_a_valid_trace() {
        let mut d = Dispatcher::new();
        d.fire(WorkflowEvent::Startup, "");
        d.fire(WorkflowEvent::Shutdown, "");
        assert_eq!(d.trace(), &[WorkflowEvent::Startup, WorkflowEvent::Shutdown]);
    }

    #[test]
    fn abort_blocks_a_later_shutdown() {
        let mut d = Dispatcher::new();
        d.fire(WorkflowEvent::Startup, "");
        d.fire(WorkflowEvent::Abort, "boom");
        d.fire(WorkflowEvent::Shutdown, "");
        assert_eq!(d.trace(), &[WorkflowEvent::Startup, WorkflowEvent::Abort]);
    }

    #[test]
    fn shutdown_blocks_a_later_abort() {
        let mut d = Dispatcher::new();
        d.fire(WorkflowEvent::Startup, "");
        d.fire(WorkflowEvent::Shutdown, "");
        d.fire(WorkflowEvent::Abort, "too late");
        assert_eq!(d.trace(), &[WorkflowEvent::Startup, WorkflowEvent::Shutdown]);
    }

    #[test]
    fn restart_of_completed_workflow_trace() {
        let mut d = Dispatcher::new();
        d.fire(WorkflowEvent::Startup, "");
        d.fire(WorkflowEvent::RestartTimeout, "no new activity");
        d.fire(WorkflowEvent::Shutdown, "");
        assert_eq!(
            d.trace(),
            &[WorkflowEvent::Startup, WorkflowEvent::RestartTimeout, WorkflowEvent::Shutdown]
        );
    }
}
