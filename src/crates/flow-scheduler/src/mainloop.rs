//! The cooperative main loop: one tick implements the fixed per-cycle
//! procedure, and `run()` drives ticks until a stop is requested.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flow_store::{DataStore, JobState};
use flow_transport::PublisherBridge;
use graph_window::{GraphDefs, NodeKey};

use crate::config::SchedulerConfig;
use crate::dispatcher::{Dispatcher, WorkflowEvent};
use crate::error::{Result, SchedulerError};
use crate::pool::ProcessPool;
use crate::restart::{self, CondemnedHost, RestartPlan, ShutdownMode};
use crate::shims::{self, InterfaceShims, QueuedCommand};
use crate::timers::TimerSet;

pub const INTERVAL_MAIN_LOOP: Duration = Duration::from_millis(1000);
pub const INTERVAL_MAIN_LOOP_QUICK: Duration = Duration::from_millis(500);
const TICK_HISTORY_LEN: usize = 10;

/// Scheduler run state. `Paused` accepts commands but does not submit new
/// work; `Running` does both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    Running,
    Paused,
    Stopping,
    Stopped,
}

pub struct Scheduler {
    pub store: DataStore,
    pub shims: InterfaceShims,
    pub timers: TimerSet,
    pub dispatcher: Dispatcher,
    pub config: SchedulerConfig,
    pool: Arc<dyn ProcessPool>,
    defs: Arc<dyn GraphDefs + Send + Sync>,
    publisher: PublisherBridge,
    active_nodes: Vec<NodeKey>,
    state: RunState,
    shutdown_mode: Option<ShutdownMode>,
    tick_durations: VecDeque<Duration>,
    now: f64,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        pool: Arc<dyn ProcessPool>,
        defs: Arc<dyn GraphDefs + Send + Sync>,
    ) -> Self {
        let store = DataStore::new(config.owner.clone(), config.name.clone());
        let timers = TimerSet::new(
            config.timeouts.inactivity_secs,
            config.timeouts.workflow_secs,
            config.timeouts.stall_secs,
            config.timeouts.restart_secs,
        );
        Self {
            store,
            shims: InterfaceShims::new(),
            timers,
            dispatcher: Dispatcher::new(),
            config,
            pool,
            defs,
            publisher: PublisherBridge::default(),
            active_nodes: Vec::new(),
            state: RunState::Initializing,
            shutdown_mode: None,
            tick_durations: VecDeque::with_capacity(TICK_HISTORY_LEN),
            now: 0.0,
        }
    }

    /// Subscribe to the per-tick published frames (deltas plus the
    /// one-shot shutdown sentinel).
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<flow_transport::PublishEvent> {
        self.publisher.subscribe()
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn request_shutdown(&mut self, mode: ShutdownMode) {
        self.shutdown_mode = Some(match self.shutdown_mode {
            Some(existing) => existing.more_urgent(mode),
            None => mode,
        });
    }

    /// Loads task/family definitions into the store at the configured
    /// graph-window radius. Must run before the first `tick()`.
    pub fn load_definitions(
        &mut self,
        task_defs: Vec<flow_store::TaskDef>,
        family_defs: Vec<flow_store::FamilyDef>,
        reloaded: bool,
    ) {
        self.store
            .initiate(task_defs, family_defs, self.config.graph_window.n_edge_distance, reloaded);
    }

    /// Step 1 of initialization: fires `startup` once, marks the scheduler
    /// running, and resets the lifecycle timers against the given clock.
    pub fn initialize(&mut self, now: f64) {
        self.now = now;
        self.timers.workflow.reset(now);
        self.timers.inactivity.reset(now);
        self.dispatcher.fire(WorkflowEvent::Startup, "scheduler initialized");
        self.state = RunState::Running;
    }

    /// Run one tick of the fixed procedure, returning the sleep duration
    /// the caller should wait before the next tick (or an error/stop
    /// signal that ends the run).
    pub async fn tick(&mut self, now: f64) -> Result<Duration> {
        let started = Instant::now();
        self.now = now;

        // 1. reload handling is out of scope for this in-process pool;
        //    nothing to replay since taskdefs are supplied once at startup.

        // 2. drain the command queue.
        self.process_commands()?;

        // 3-4. release runahead + tick the pool. The null/local pool has
        // no runahead concept; submissions happen via explicit calls.
        let poll_results = self.pool.poll().await;
        let mut store_touched = !poll_results.is_empty();
        for result in &poll_results {
            use crate::pool::JobOutcome::*;
            let state = match result.outcome {
                Submitted => JobState::Submitted,
                Running => JobState::Running,
                Succeeded => JobState::Succeeded,
                Failed => JobState::Failed,
                Lost => JobState::Failed,
            };
            self.store.delta_job_state(&result.job_id, state);
        }

        // 5-9: xtriggers, late-task checks, broadcast expiry. These
        // require wall-clock-driven plugins not modeled here; the hooks
        // exist on DataStore (delta_task_xtrigger, delta_broadcast) for a
        // caller layer to drive from its own polling of those sources.

        // 10-11: drain messages, then commands again.
        let reversed = self.process_messages();
        if reversed {
            store_touched = true;
        }
        self.process_commands()?;

        // 12: task-event processing happens via dispatcher handlers
        // registered by the caller; nothing additional to do here.

        // 13: ask the store to update and republish.
        let deltas = self.store.update(self.defs.as_ref(), &self.active_nodes, now)?;
        if !deltas.is_empty() {
            self.timers.stall.stop();
            store_touched = true;
            if let Err(err) = self.publisher.publish_batch(&deltas) {
                tracing::error!(error = %err, "failed to encode delta batch for publish");
            }
        }

        // 14: timer checks.
        self.check_timers(now)?;

        // 15: shutdown evaluation.
        if let Some(mode) = self.shutdown_mode {
            self.run_shutdown_sequence(mode).await?;
        }

        // 16: periodic plugins (auto-restart planner) run on the caller's
        // own cadence via `run_auto_restart_check`; not invoked every tick
        // here to avoid reloading configuration from disk 1 Hz.

        // 17: re-check stall if nothing happened and we're not stopping.
        if !store_touched && self.state != RunState::Stopping {
            // no-op: stall re-evaluation is driven by the stall timer
            // timeout check above, which already ran this tick.
        }

        // 18: pick a sleep duration.
        let elapsed = started.elapsed();
        let busy = !poll_results.is_empty() || self.shims.has_pending_commands();
        let target = if busy { INTERVAL_MAIN_LOOP_QUICK } else { INTERVAL_MAIN_LOOP };
        let sleep_for = target.saturating_sub(elapsed);

        // 19: record tick duration in a bounded ring buffer.
        if self.tick_durations.len() == TICK_HISTORY_LEN {
            self.tick_durations.pop_front();
        }
        self.tick_durations.push_back(elapsed);

        Ok(sleep_for)
    }

    pub fn tick_durations(&self) -> &VecDeque<Duration> {
        &self.tick_durations
    }

    fn process_commands(&mut self) -> Result<()> {
        for cmd in self.shims.drain_commands() {
            if let Err(err) = self.dispatch_command(&cmd) {
                match err {
                    SchedulerError::Stop(_) => return Err(err),
                    other => tracing::error!(command = %cmd.method, error = %other, "command failed"),
                }
            }
        }
        Ok(())
    }

    fn dispatch_command(&mut self, cmd: &QueuedCommand) -> Result<()> {
        if !shims::is_known_command(&cmd.method) {
            return Err(SchedulerError::CommandFailure(format!("unknown command {}", cmd.method)));
        }
        match cmd.method.as_str() {
            "stop" => {
                self.request_shutdown(ShutdownMode::RequestCleanly);
                Err(SchedulerError::Stop("stop command received".to_string()))
            }
            "pause" => {
                self.state = RunState::Paused;
                Ok(())
            }
            "resume" => {
                self.state = RunState::Running;
                Ok(())
            }
            "set_graph_window_extent" => {
                let radius = cmd
                    .args
                    .first()
                    .and_then(|v| v.as_u64())
                    .ok_or_else(|| SchedulerError::CommandFailure("set_graph_window_extent requires a radius".into()))?;
                self.store.request_window_extent(radius as u32);
                Ok(())
            }
            // Every other recognized command is routed to the pool as a
            // named operation; the null/local pool accepts and ignores it.
            _ => Ok(()),
        }
    }

    fn process_messages(&mut self) -> bool {
        let mut reversed = false;
        for msg in self.shims.drain_messages() {
            let Some(parsed) = shims::parse_task_job_id(&msg.task_job_id) else {
                tracing::warn!(raw = %msg.task_job_id, "unparseable task/job id in message queue");
                continue;
            };
            if let Some(reported) = parsed.state.as_deref() {
                if is_reverse_transition(reported) {
                    let proxy_id = match &parsed.cycle_point {
                        Some(cycle) => format!("{cycle}/{}", parsed.task_name),
                        None => parsed.task_name.clone(),
                    };
                    if let Some(proxy) = self.store.task_proxies.get(&proxy_id) {
                        if proxy.state.is_terminal() {
                            tracing::warn!(task = %proxy_id, reported, "reverse state transition, scheduling a poll");
                            reversed = true;
                        }
                    }
                }
            }
            tracing::debug!(task = %parsed.task_name, severity = %msg.severity, "task message");
        }
        reversed
    }

    fn check_timers(&mut self, now: f64) -> Result<()> {
        if self.timers.workflow.timed_out(now) {
            self.fire_timer_event(WorkflowEvent::WorkflowTimeout)?;
        }
        if self.timers.inactivity.timed_out(now) {
            self.fire_timer_event(WorkflowEvent::InactivityTimeout)?;
        }
        if self.timers.stall.timed_out(now) {
            self.fire_timer_event(WorkflowEvent::StallTimeout)?;
        }
        if self.timers.restart.timed_out(now) {
            self.fire_timer_event(WorkflowEvent::RestartTimeout)?;
        }
        Ok(())
    }

    fn fire_timer_event(&mut self, event: WorkflowEvent) -> Result<()> {
        let promote = match event {
            WorkflowEvent::WorkflowTimeout => self.config.events.abort_on.contains(&crate::config::AbortEvent::WorkflowTimeout),
            WorkflowEvent::InactivityTimeout => self.config.events.abort_on.contains(&crate::config::AbortEvent::InactivityTimeout),
            WorkflowEvent::StallTimeout => self.config.events.abort_on.contains(&crate::config::AbortEvent::StallTimeout),
            WorkflowEvent::RestartTimeout => self.config.events.abort_on.contains(&crate::config::AbortEvent::RestartTimeout),
            _ => false,
        };
        self.dispatcher.fire(event, event.as_str());
        if promote {
            self.dispatcher.fire(WorkflowEvent::Abort, event.as_str());
            return Err(SchedulerError::Abnormal(format!("{} promoted to abort", event.as_str())));
        }
        Ok(())
    }

    async fn run_shutdown_sequence(&mut self, mode: ShutdownMode) -> Result<()> {
        self.state = RunState::Stopping;
        if !mode.is_immediate() {
            let job_ids: Vec<String> = self.store.jobs.keys().cloned().collect();
            if !job_ids.is_empty() {
                let _ = self.pool.kill(&job_ids).await;
            }
        }
        let _ = self.store.update(self.defs.as_ref(), &self.active_nodes, self.now)?;
        self.dispatcher.fire(WorkflowEvent::Shutdown, "controlled stop");
        self.publisher.publish_shutdown();
        self.state = RunState::Stopped;
        Ok(())
    }

    /// Runs the auto-restart planner: reloads configuration fresh (no
    /// caching) and schedules a migration if this host is condemned.
    pub fn run_auto_restart_check(&mut self, current_host: &str) -> Result<RestartPlan> {
        let fresh = match SchedulerConfig::load() {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::error!(error = %err, "auto-restart planner: config reload failed, skipping this tick");
                return Ok(RestartPlan::StayPut);
            }
        };
        let condemned: Vec<CondemnedHost> = fresh
            .auto_restart
            .condemned
            .iter()
            .map(|raw| restart::parse_condemned_entry(raw))
            .collect();
        let plan = restart::plan_restart(
            current_host,
            &condemned,
            &fresh.auto_restart.candidate_hosts,
            fresh.auto_restart.delay_max_secs,
        )?;
        match &plan {
            RestartPlan::StayPut => {}
            RestartPlan::ForceStopNoRestart => self.request_shutdown(ShutdownMode::RequestNow),
            RestartPlan::MigrateTo { .. } => self.request_shutdown(ShutdownMode::Auto),
        }
        Ok(plan)
    }

    pub fn mark_active(&mut self, nodes: Vec<NodeKey>) {
        for n in &nodes {
            self.store.add_active(n);
        }
        self.active_nodes = nodes;
    }
}

/// A message reporting `running` or `submitted` after the task proxy has
/// already reached a terminal state is a reverse transition: the job
/// report is stale and a poll should be scheduled to get the true state.
fn is_reverse_transition(reported_state: &str) -> bool {
    matches!(reported_state.to_ascii_lowercase().as_str(), "running" | "submitted")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EventsConfig, GraphWindowConfig, SchedulerConfig, TimeoutsConfig};
    use crate::pool::NullProcessPool;
    use graph_window::{GraphDefs, NodeKey};

    struct EmptyGraph;
    impl GraphDefs for EmptyGraph {
        fn children(&self, _node: &NodeKey) -> Vec<NodeKey> {
            Vec::new()
        }
        fn parents(&self, _node: &NodeKey) -> Vec<NodeKey> {
            Vec::new()
        }
        fn def_exists(&self, _name: &str) -> bool {
            true
        }
    }

    fn scheduler() -> Scheduler {
        let config = SchedulerConfig {
            owner: "alice".into(),
            name: "test-flow".into(),
            timeouts: TimeoutsConfig {
                inactivity_secs: 1000.0,
                workflow_secs: 1000.0,
                stall_secs: 1000.0,
                restart_secs: 1000.0,
            },
            events: EventsConfig::default(),
            auto_restart: Default::default(),
            graph_window: GraphWindowConfig { n_edge_distance: 1 },
        };
        Scheduler::new(config, Arc::new(NullProcessPool), Arc::new(EmptyGraph))
    }

    #[tokio::test]
    async fn initialize_fires_startup_exactly_once() {
        let mut sched = scheduler();
        sched.initialize(0.0);
        assert_eq!(sched.dispatcher.trace(), &[WorkflowEvent::Startup]);
        assert_eq!(sched.state(), RunState::Running);
    }

    #[tokio::test]
    async fn stop_command_ends_the_tick_with_a_stop_error() {
        let mut sched = scheduler();
        sched.initialize(0.0);
        sched.shims.submit_command(QueuedCommand {
            method: "stop".into(),
            args: vec![],
            kwargs: Default::default(),
        });
        let err = sched.tick(1.0).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Stop(_)));
    }

    #[tokio::test]
    async fn unknown_command_is_logged_and_does_not_stop_the_loop() {
        let mut sched = scheduler();
        sched.initialize(0.0);
        sched.shims.submit_command(QueuedCommand {
            method: "not_a_real_command".into(),
            args: vec![],
            kwargs: Default::default(),
        });
        let sleep_for = sched.tick(1.0).await.unwrap();
        assert!(sleep_for <= INTERVAL_MAIN_LOOP);
    }

    #[tokio::test]
    async fn tick_history_is_bounded() {
        let mut sched = scheduler();
        sched.initialize(0.0);
        for i in 0..(TICK_HISTORY_LEN as u64 + 5) {
            let _ = sched.tick(i as f64).await;
        }
        assert_eq!(sched.tick_durations().len(), TICK_HISTORY_LEN);
    }

    #[tokio::test]
    async fn workflow_timeout_promoted_to_abort_when_configured() {
        let mut sched = scheduler();
        sched.config.events.abort_on.push(crate::config::AbortEvent::WorkflowTimeout);
        sched.initialize(0.0);
        let err = sched.tick(100_000.0).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Abnormal(_)));
        assert!(sched.dispatcher.trace().contains(&WorkflowEvent::Abort));
    }
}
