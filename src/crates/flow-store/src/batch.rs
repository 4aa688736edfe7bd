//! The framed, checksummed output of one data-store update cycle: batch,
//! apply, checksum, publish.

use serde::{Deserialize, Serialize};

use crate::delta::Delta;
use crate::entities::{Edge, FamilyDef, FamilyProxy, Job, TaskDef, TaskProxy};

/// Workflow deltas are a singleton: `added`/`updated` are partial records,
/// `pruned` is a latching boolean flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDelta {
    pub added: Option<serde_json::Map<String, serde_json::Value>>,
    pub updated: serde_json::Map<String, serde_json::Value>,
    pub pruned: bool,
}

impl WorkflowDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_none() && self.updated.is_empty() && !self.pruned
    }

    pub fn clear(&mut self) {
        self.added = None;
        self.updated.clear();
        self.pruned = false;
    }
}

/// One entity type's delta plus its time/checksum framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "T: Serialize + serde::de::DeserializeOwned")]
pub struct FramedDelta<T> {
    pub delta: Delta<T>,
    pub time: f64,
    pub checksum: u32,
    pub reloaded: bool,
}

/// The workflow singleton's framing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramedWorkflowDelta {
    pub delta: WorkflowDelta,
    pub time: f64,
    pub reloaded: bool,
}

/// One instance of each per-type delta, framed for one publish tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllDeltas {
    pub workflow: FramedWorkflowDelta,
    pub tasks: FramedDelta<TaskDef>,
    pub task_proxies: FramedDelta<TaskProxy>,
    pub families: FramedDelta<FamilyDef>,
    pub family_proxies: FramedDelta<FamilyProxy>,
    pub jobs: FramedDelta<Job>,
    pub edges: FramedDelta<Edge>,
}

impl AllDeltas {
    pub fn is_empty(&self) -> bool {
        self.workflow.delta.is_empty()
            && self.tasks.delta.is_empty()
            && self.task_proxies.delta.is_empty()
            && self.families.delta.is_empty()
            && self.family_proxies.delta.is_empty()
            && self.jobs.delta.is_empty()
            && self.edges.delta.is_empty()
    }
}
