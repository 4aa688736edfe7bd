//! Incremental, delta-based data store for live cycling-workflow state.
//!
//! [`DataStore`] owns every live entity (tasks, families, jobs, edges, the
//! workflow singleton) plus the per-tick delta buffers that feed a
//! publisher. It delegates "which task instances are materialized right
//! now" to [`graph_window::Walker`] and "how do family aggregates roll up"
//! to [`rollup`].

pub mod batch;
pub mod delta;
pub mod entities;
pub mod error;
pub mod persisted;
pub mod rollup;
pub mod store;

pub use batch::{AllDeltas, FramedDelta, FramedWorkflowDelta, WorkflowDelta};
pub use delta::Delta;
pub use entities::{
    ActiveSet, Edge, FamilyDef, FamilyProxy, Job, JobState, Output, Prerequisite, Runtime, TaskDef,
    TaskProxy, TaskState, Workflow, XTrigger, ROOT_FAMILY_NAME,
};
pub use error::{Result, StoreError};
pub use store::{DataStore, JobTimeField};
