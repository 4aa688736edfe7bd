//! Entity records materialized by the data store.
//!
//! Every entity is plain, owned data keyed by stable string ids (relative
//! ids, per [`flow_ids::Tokens::relative_id`]) — there are no pointer
//! relationships, only id references, so entities can be cloned, diffed,
//! and shipped over the wire without an arena or graph library.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// Bounded FIFO size for `workflow.latest_state_tasks`.
pub const LATEST_STATE_TASKS_QUEUE_SIZE: usize = 5;

/// Task/job state, ordered so that `Ord` matches the *ordinary* group-state
/// priority (earlier variant = higher priority). The "stopped" variant
/// ordering is handled separately by [`crate::rollup::group_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskState {
    SubmitFailed,
    Failed,
    Expired,
    Running,
    Submitted,
    Preparing,
    Waiting,
    Succeeded,
    Unknown,
}

impl TaskState {
    /// Priority order while the workflow is running.
    pub const ORDINARY_PRIORITY: [TaskState; 9] = [
        TaskState::SubmitFailed,
        TaskState::Failed,
        TaskState::Expired,
        TaskState::Running,
        TaskState::Submitted,
        TaskState::Preparing,
        TaskState::Waiting,
        TaskState::Succeeded,
        TaskState::Unknown,
    ];

    /// Priority order used once the workflow has stopped: `succeeded` moves
    /// above `waiting`, since a stopped workflow's most informative tasks
    /// are the ones that finished rather than the ones still queued up.
    pub const STOPPED_PRIORITY: [TaskState; 9] = [
        TaskState::SubmitFailed,
        TaskState::Failed,
        TaskState::Expired,
        TaskState::Running,
        TaskState::Submitted,
        TaskState::Preparing,
        TaskState::Succeeded,
        TaskState::Waiting,
        TaskState::Unknown,
    ];

    /// True once a task has finished running and won't transition further
    /// on its own (a later "running"/"submitted" report for one of these
    /// is necessarily stale).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::Failed | TaskState::SubmitFailed | TaskState::Expired)
    }
}

/// Job state (distinct value space from [`TaskState`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Submitted,
    SubmitFailed,
    Running,
    Succeeded,
    Failed,
}

/// A single output label's live record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Output {
    pub message: String,
    pub satisfied: bool,
    pub time: Option<String>,
}

/// A single xtrigger's live record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct XTrigger {
    pub label: String,
    pub satisfied: bool,
    pub time: Option<String>,
}

/// A single structured prerequisite condition: which output of which task
/// at which cycle point must be satisfied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prerequisite {
    pub prereq_cycle: String,
    pub prereq_name: String,
    pub prereq_output: String,
    pub satisfied: bool,
}

/// Effective runtime config: the definition's config overlaid with any
/// active broadcasts. List-valued fields use prepend semantics on overlay;
/// everything else overwrites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Runtime {
    pub fields: HashMap<String, serde_json::Value>,
}

impl Runtime {
    /// Overlay `broadcast` onto `self` (the definition's base runtime),
    /// producing the effective runtime for one proxy. Scalars are
    /// overwritten; arrays are prepended (broadcast values come first).
    pub fn overlay(&self, broadcast: &Runtime) -> Runtime {
        let mut fields = self.fields.clone();
        for (k, v) in &broadcast.fields {
            match (fields.get(k), v) {
                (Some(serde_json::Value::Array(base)), serde_json::Value::Array(new)) => {
                    let mut merged = new.clone();
                    merged.extend(base.clone());
                    fields.insert(k.clone(), serde_json::Value::Array(merged));
                }
                _ => {
                    fields.insert(k.clone(), v.clone());
                }
            }
        }
        Runtime { fields }
    }
}

/// Task definition: the static, config-derived template a task proxy is
/// instantiated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDef {
    pub id: String,
    pub name: String,
    pub depth: u32,
    pub namespace: Vec<String>,
    pub first_parent: Option<String>,
    pub parents: Vec<String>,
    pub mean_elapsed_time: f64,
    pub title: String,
    pub description: String,
    pub url: String,
    pub user_metadata: serde_json::Value,
    pub runtime: Runtime,
    pub proxies: Vec<String>,
}

/// Family definition. `root` is the distinguished universal ancestor every
/// task belongs to, directly or transitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyDef {
    pub id: String,
    pub name: String,
    pub depth: u32,
    pub parents: Vec<String>,
    pub first_parent: Option<String>,
    pub child_tasks: Vec<String>,
    pub child_families: Vec<String>,
    pub runtime: Runtime,
    pub proxies: Vec<String>,
}

pub const ROOT_FAMILY_NAME: &str = "root";

/// Task proxy: a task's live instance at one cycle point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProxy {
    pub id: String,
    pub cycle_point: String,
    pub definition_id: String,
    pub ancestors: Vec<String>,
    pub first_parent: Option<String>,
    pub namespace: Vec<String>,
    pub state: TaskState,
    pub is_held: bool,
    pub is_queued: bool,
    pub is_runahead: bool,
    pub graph_depth: u32,
    pub flow_nums: Vec<u64>,
    pub prerequisites: Vec<Prerequisite>,
    pub outputs: HashMap<String, Output>,
    pub external_triggers: HashMap<String, bool>,
    pub xtriggers: HashMap<String, XTrigger>,
    pub job_submit_count: u32,
    pub jobs: Vec<String>,
    pub edges: Vec<String>,
    pub runtime: Runtime,
}

impl TaskProxy {
    /// Is this proxy an orphan (its definition was removed by a reload
    /// after the proxy was already materialized)?
    pub fn is_orphan(&self) -> bool {
        self.first_parent.is_none() && self.ancestors.is_empty() && self.definition_id.is_empty()
    }
}

/// Family proxy: a family's live aggregate at one cycle point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyProxy {
    pub id: String,
    pub cycle_point: String,
    pub definition_id: String,
    pub ancestors: Vec<String>,
    pub first_parent: Option<String>,
    pub child_tasks: Vec<String>,
    pub child_families: Vec<String>,
    pub state: Option<TaskState>,
    pub state_totals: HashMap<TaskState, u64>,
    pub is_held_total: u64,
    pub is_queued_total: u64,
    pub is_runahead_total: u64,
    pub graph_depth: u32,
}

impl FamilyProxy {
    /// A family with no remaining children is prune-eligible.
    pub fn has_children(&self) -> bool {
        !self.child_tasks.is_empty() || !self.child_families.is_empty()
    }
}

/// A live dependency edge between two task proxies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
}

/// One submission of a task proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub submit_num: u32,
    pub state: JobState,
    pub task_proxy: String,
    pub submitted_time: Option<String>,
    pub started_time: Option<String>,
    pub finished_time: Option<String>,
    pub platform: String,
    pub job_runner_name: String,
    pub job_id_on_runner: Option<String>,
    pub execution_time_limit: Option<f64>,
    pub log_dir: String,
    pub runtime: Runtime,
    pub messages: Vec<String>,
}

/// The workflow singleton: run-level status and summary totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub host: String,
    pub ports: Vec<u16>,
    pub api_version: String,
    pub runtime_version: String,
    pub status: String,
    pub status_msg: String,
    pub utc_offset: String,
    pub cycling_mode: String,
    pub run_mode: String,
    pub tree_depth: u32,
    pub state_totals: HashMap<TaskState, u64>,
    pub is_held_total: u64,
    pub is_queued_total: u64,
    pub is_runahead_total: u64,
    pub n_edge_distance: u32,
    pub reloaded: bool,
    pub last_updated: f64,
    pub pruned: bool,
    pub latest_state_tasks: HashMap<TaskState, VecDeque<String>>,
}

impl Workflow {
    /// Push `task_id` onto the bounded FIFO for `state`, evicting the
    /// oldest entry past [`LATEST_STATE_TASKS_QUEUE_SIZE`].
    pub fn push_latest_state_task(&mut self, state: TaskState, task_id: String) {
        let q = self.latest_state_tasks.entry(state).or_default();
        q.push_back(task_id);
        while q.len() > LATEST_STATE_TASKS_QUEUE_SIZE {
            q.pop_front();
        }
    }
}

/// The full set of active task-proxy ids maintained by the (out-of-scope)
/// task pool, exposed to the store and the graph walker as a plain set.
pub type ActiveSet = HashSet<String>;
