//! The data store: owns every live entity plus the per-tick delta buffers,
//! and ties the graph window walker and the family roll-up together into
//! one `update()` procedure.

use std::collections::{HashMap, HashSet};

use graph_window::{GraphDefs, NodeKey, Walker};
use serde_json::Map;

use crate::batch::{AllDeltas, FramedDelta, FramedWorkflowDelta, WorkflowDelta};
use crate::delta::{self, Delta};
use crate::entities::{
    ActiveSet, Edge, FamilyDef, FamilyProxy, Job, JobState, Output, Prerequisite, Runtime,
    TaskDef, TaskProxy, TaskState, Workflow, XTrigger, ROOT_FAMILY_NAME,
};
use crate::error::StoreError;
use crate::persisted::{self, JobRow};
use crate::rollup;

/// Owns the live entity tables, the delta buffers that accumulate changes
/// between publish ticks, the graph window walker, and the family roll-up
/// dirty set. One instance per running workflow.
pub struct DataStore {
    pub workflow: Workflow,
    pub task_defs: HashMap<String, TaskDef>,
    pub family_defs: HashMap<String, FamilyDef>,
    pub task_proxies: HashMap<String, TaskProxy>,
    pub family_proxies: HashMap<String, FamilyProxy>,
    pub jobs: HashMap<String, Job>,
    pub edges: HashMap<String, Edge>,
    pub broadcasts: HashMap<String, Runtime>,

    walker: Walker,
    active: ActiveSet,
    pending_radius: Option<u32>,
    families_dirty: HashSet<String>,
    workflow_stopped: bool,
    /// Set whenever a family's group state changed this tick; the next
    /// tick's roll-up re-derives the workflow summary even if no further
    /// task state changed in between, so the two-tick settle is visible to
    /// subscribers one publish later rather than silently dropped.
    pending_followup_rollup: bool,

    workflow_delta: WorkflowDelta,
    task_delta: Delta<TaskDef>,
    task_proxy_delta: Delta<TaskProxy>,
    family_delta: Delta<FamilyDef>,
    family_proxy_delta: Delta<FamilyProxy>,
    job_delta: Delta<Job>,
    edge_delta: Delta<Edge>,
}

impl DataStore {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        let name = name.into();
        let workflow = Workflow {
            id: name.clone(),
            name,
            owner: owner.into(),
            host: String::new(),
            ports: Vec::new(),
            api_version: String::new(),
            runtime_version: String::new(),
            status: "stopped".to_string(),
            status_msg: String::new(),
            utc_offset: String::new(),
            cycling_mode: String::new(),
            run_mode: "live".to_string(),
            tree_depth: 0,
            state_totals: HashMap::new(),
            is_held_total: 0,
            is_queued_total: 0,
            is_runahead_total: 0,
            n_edge_distance: 0,
            reloaded: false,
            last_updated: 0.0,
            pruned: false,
            latest_state_tasks: HashMap::new(),
        };
        Self {
            workflow,
            task_defs: HashMap::new(),
            family_defs: HashMap::new(),
            task_proxies: HashMap::new(),
            family_proxies: HashMap::new(),
            jobs: HashMap::new(),
            edges: HashMap::new(),
            broadcasts: HashMap::new(),
            walker: Walker::new(0),
            active: ActiveSet::new(),
            pending_radius: None,
            families_dirty: HashSet::new(),
            workflow_stopped: false,
            pending_followup_rollup: false,
            workflow_delta: WorkflowDelta::default(),
            task_delta: Delta::default(),
            task_proxy_delta: Delta::default(),
            family_delta: Delta::default(),
            family_proxy_delta: Delta::default(),
            job_delta: Delta::default(),
            edge_delta: Delta::default(),
        }
    }

    /// (Re)populate the definition tables and reset all live state. Called
    /// once at startup and again on every reload.
    pub fn initiate(
        &mut self,
        task_defs: Vec<TaskDef>,
        family_defs: Vec<FamilyDef>,
        n_edge_distance: u32,
        reloaded: bool,
    ) {
        self.task_proxies.clear();
        self.family_proxies.clear();
        self.jobs.clear();
        self.edges.clear();
        self.active.clear();
        self.walker = Walker::new(n_edge_distance);

        self.workflow.n_edge_distance = n_edge_distance;
        self.workflow.reloaded = reloaded;
        self.workflow.tree_depth = task_defs.iter().map(|t| t.depth).max().unwrap_or(0);
        self.workflow.state_totals.clear();
        self.workflow.latest_state_tasks.clear();

        self.task_defs = task_defs.into_iter().map(|d| (d.name.clone(), d)).collect();
        self.family_defs = family_defs.into_iter().map(|d| (d.name.clone(), d)).collect();

        let wf_value = serde_json::to_value(&self.workflow).expect("workflow serializes");
        self.workflow_delta.added = wf_value.as_object().cloned();
        for (name, def) in &self.task_defs {
            self.task_delta.buffer_added(name.clone(), def.clone());
        }
        for (name, def) in &self.family_defs {
            self.family_delta.buffer_added(name.clone(), def.clone());
        }
    }

    pub fn add_active(&mut self, node: &NodeKey) {
        self.active.insert(node.id());
    }

    pub fn remove_active(&mut self, node: &NodeKey) {
        self.active.remove(&node.id());
    }

    /// Request a window resize; the actual re-walk happens on the next
    /// [`DataStore::update`] call, which has the current active set.
    pub fn request_window_extent(&mut self, new_radius: u32) {
        self.pending_radius = Some(new_radius);
    }

    pub fn increment_window(&mut self, source: &NodeKey, is_manual_submit: bool, defs: &dyn GraphDefs) {
        let result = self.walker.increment_window(source, is_manual_submit, defs);
        for (node, depth) in &result.new_nodes {
            self.materialize_task(node, *depth);
        }
        for (src, tgt) in &result.new_edges {
            self.materialize_edge(src, tgt);
        }
    }

    fn materialize_task(&mut self, node: &NodeKey, depth: u32) {
        let id = node.id();
        if self.task_proxies.contains_key(&id) {
            return;
        }
        let Some(def) = self.task_defs.get(&node.name).cloned() else {
            return;
        };
        let first_parent = self.ensure_family_chain(&node.cycle_point, def.first_parent.as_deref());
        let ancestors = self.ancestor_ids(&node.cycle_point, def.first_parent.as_deref());
        let runtime = self.effective_runtime(&def);
        let tp = TaskProxy {
            id: id.clone(),
            cycle_point: node.cycle_point.clone(),
            definition_id: def.id.clone(),
            ancestors,
            first_parent: first_parent.clone(),
            namespace: def.namespace.clone(),
            state: TaskState::Waiting,
            is_held: false,
            is_queued: false,
            is_runahead: false,
            graph_depth: depth,
            flow_nums: Vec::new(),
            prerequisites: Vec::new(),
            outputs: HashMap::new(),
            external_triggers: HashMap::new(),
            xtriggers: HashMap::new(),
            job_submit_count: 0,
            jobs: Vec::new(),
            edges: Vec::new(),
            runtime,
        };
        self.task_proxy_delta.buffer_added(id.clone(), tp.clone());
        self.task_proxies.insert(id.clone(), tp);
        if let Some(fp) = first_parent {
            self.register_child_task(&fp, &id);
            self.families_dirty.insert(fp);
        }
    }

    fn ensure_family_chain(&mut self, cycle: &str, first_parent_name: Option<&str>) -> Option<String> {
        let name = first_parent_name?;
        let id = format!("{cycle}/{name}");
        if !self.family_proxies.contains_key(&id) {
            let def = self.family_defs.get(name)?.clone();
            let grandparent = self.ensure_family_chain(cycle, def.first_parent.as_deref());
            let ancestors = self.ancestor_ids(cycle, def.first_parent.as_deref());
            let fp = FamilyProxy {
                id: id.clone(),
                cycle_point: cycle.to_string(),
                definition_id: def.id.clone(),
                ancestors,
                first_parent: grandparent.clone(),
                child_tasks: Vec::new(),
                child_families: Vec::new(),
                state: None,
                state_totals: HashMap::new(),
                is_held_total: 0,
                is_queued_total: 0,
                is_runahead_total: 0,
                graph_depth: 0,
            };
            self.family_proxy_delta.buffer_added(id.clone(), fp.clone());
            self.family_proxies.insert(id.clone(), fp);
            if let Some(gp) = &grandparent {
                self.register_child_family(gp, &id);
            }
            self.families_dirty.insert(id.clone());
        }
        Some(id)
    }

    fn ancestor_ids(&self, cycle: &str, first_parent_name: Option<&str>) -> Vec<String> {
        let mut out = Vec::new();
        let mut cur = first_parent_name.map(str::to_string);
        while let Some(name) = cur {
            out.push(format!("{cycle}/{name}"));
            cur = self.family_defs.get(&name).and_then(|d| d.first_parent.clone());
        }
        out
    }

    fn register_child_task(&mut self, family_id: &str, task_id: &str) {
        if let Some(f) = self.family_proxies.get_mut(family_id) {
            if !f.child_tasks.iter().any(|t| t == task_id) {
                f.child_tasks.push(task_id.to_string());
                let mut patch = Map::new();
                patch.insert("child_tasks".to_string(), serde_json::json!(f.child_tasks));
                self.family_proxy_delta.buffer_updated(family_id.to_string(), patch);
            }
        }
    }

    fn register_child_family(&mut self, parent_id: &str, child_id: &str) {
        if let Some(f) = self.family_proxies.get_mut(parent_id) {
            if !f.child_families.iter().any(|c| c == child_id) {
                f.child_families.push(child_id.to_string());
                let mut patch = Map::new();
                patch.insert("child_families".to_string(), serde_json::json!(f.child_families));
                self.family_proxy_delta.buffer_updated(parent_id.to_string(), patch);
            }
        }
    }

    fn materialize_edge(&mut self, source: &str, target: &str) {
        let id = format!("{source}->{target}");
        if self.edges.contains_key(&id) {
            return;
        }
        let e = Edge {
            id: id.clone(),
            source: source.to_string(),
            target: target.to_string(),
        };
        self.edge_delta.buffer_added(id.clone(), e.clone());
        self.edges.insert(id.clone(), e);
        for endpoint in [source, target] {
            if let Some(t) = self.task_proxies.get_mut(endpoint) {
                if !t.edges.iter().any(|e| e == &id) {
                    t.edges.push(id.clone());
                    let mut patch = Map::new();
                    patch.insert("edges".to_string(), serde_json::json!(t.edges));
                    self.task_proxy_delta.buffer_updated(endpoint.to_string(), patch);
                }
            }
        }
    }

    fn effective_runtime(&self, def: &TaskDef) -> Runtime {
        let mut rt = def.runtime.clone();
        for ns in &def.namespace {
            if let Some(b) = self.broadcasts.get(ns) {
                rt = rt.overlay(b);
            }
        }
        rt
    }

    // -- job lifecycle -----------------------------------------------

    pub fn insert_job(&mut self, task_id: &str, submit_num: u32, job_runner_name: &str, platform: &str) -> Option<String> {
        let t = self.task_proxies.get_mut(task_id)?;
        let job_id = format!("{task_id}/{submit_num:02}");
        t.job_submit_count = t.job_submit_count.max(submit_num);
        if !t.jobs.iter().any(|j| j == &job_id) {
            t.jobs.push(job_id.clone());
        }
        let mut patch = Map::new();
        patch.insert("job_submit_count".to_string(), serde_json::json!(t.job_submit_count));
        patch.insert("jobs".to_string(), serde_json::json!(t.jobs));
        self.task_proxy_delta.buffer_updated(task_id.to_string(), patch);

        let job = Job {
            id: job_id.clone(),
            submit_num,
            state: JobState::Submitted,
            task_proxy: task_id.to_string(),
            submitted_time: None,
            started_time: None,
            finished_time: None,
            platform: platform.to_string(),
            job_runner_name: job_runner_name.to_string(),
            job_id_on_runner: None,
            execution_time_limit: None,
            log_dir: String::new(),
            runtime: Runtime::default(),
            messages: Vec::new(),
        };
        self.job_delta.buffer_added(job_id.clone(), job.clone());
        self.jobs.insert(job_id.clone(), job);
        Some(job_id)
    }

    /// Load one historical job row on restart (the persistence layer itself
    /// is out of scope; the caller drives this per row it reads back).
    pub fn insert_historical_job(&mut self, row: &JobRow, task_id: &str) -> Option<String> {
        let job_id = format!("{task_id}/{:02}", row.submit_num);
        let job = persisted::job_from_row(row, task_id, &job_id)?;
        self.job_delta.buffer_added(job_id.clone(), job.clone());
        self.jobs.insert(job_id.clone(), job);
        Some(job_id)
    }

    pub fn delta_job_state(&mut self, job_id: &str, state: JobState) {
        let Some(j) = self.jobs.get_mut(job_id) else { return };
        j.state = state;
        let task_id = j.task_proxy.clone();
        let mut patch = Map::new();
        patch.insert("state".to_string(), serde_json::json!(state));
        self.job_delta.buffer_updated(job_id.to_string(), patch);
        if let Some(t) = self.task_proxies.get(&task_id) {
            if let Some(fp) = &t.first_parent {
                self.families_dirty.insert(fp.clone());
            }
        }
    }

    pub fn delta_job_msg(&mut self, job_id: &str, message: impl Into<String>) {
        let Some(j) = self.jobs.get_mut(job_id) else { return };
        j.messages.push(message.into());
        let mut patch = Map::new();
        patch.insert("messages".to_string(), serde_json::json!(j.messages));
        self.job_delta.buffer_updated(job_id.to_string(), patch);
    }

    pub fn delta_job_time(&mut self, job_id: &str, field: JobTimeField, time: impl Into<String>) {
        let Some(j) = self.jobs.get_mut(job_id) else { return };
        let time = time.into();
        let field_name = match field {
            JobTimeField::Submitted => "submitted_time",
            JobTimeField::Started => "started_time",
            JobTimeField::Finished => "finished_time",
        };
        match field {
            JobTimeField::Submitted => j.submitted_time = Some(time.clone()),
            JobTimeField::Started => j.started_time = Some(time.clone()),
            JobTimeField::Finished => j.finished_time = Some(time.clone()),
        }
        let mut patch = Map::new();
        patch.insert(field_name.to_string(), serde_json::json!(time));
        self.job_delta.buffer_updated(job_id.to_string(), patch);
    }

    pub fn delta_job_attr(&mut self, job_id: &str, job_id_on_runner: Option<String>, log_dir: Option<String>) {
        let Some(j) = self.jobs.get_mut(job_id) else { return };
        let mut patch = Map::new();
        if let Some(v) = job_id_on_runner {
            j.job_id_on_runner = Some(v);
            patch.insert("job_id_on_runner".to_string(), serde_json::json!(j.job_id_on_runner));
        }
        if let Some(v) = log_dir {
            j.log_dir = v;
            patch.insert("log_dir".to_string(), serde_json::json!(j.log_dir));
        }
        if !patch.is_empty() {
            self.job_delta.buffer_updated(job_id.to_string(), patch);
        }
    }

    // -- task proxy mutation -------------------------------------------

    pub fn delta_task_state(&mut self, task_id: &str, state: TaskState) {
        let Some(t) = self.task_proxies.get_mut(task_id) else { return };
        t.state = state;
        let first_parent = t.first_parent.clone();
        let mut patch = Map::new();
        patch.insert("state".to_string(), serde_json::json!(state));
        self.task_proxy_delta.buffer_updated(task_id.to_string(), patch);

        self.workflow.push_latest_state_task(state, task_id.to_string());
        let mut wpatch = Map::new();
        wpatch.insert(
            "latest_state_tasks".to_string(),
            serde_json::to_value(&self.workflow.latest_state_tasks).expect("serializes"),
        );
        self.workflow_delta.updated.extend(wpatch);

        if let Some(fp) = first_parent {
            self.families_dirty.insert(fp);
        }
    }

    pub fn delta_task_held(&mut self, task_id: &str, is_held: bool) {
        self.patch_task_bool(task_id, "is_held", is_held, |t| &mut t.is_held);
    }

    pub fn delta_task_queued(&mut self, task_id: &str, is_queued: bool) {
        self.patch_task_bool(task_id, "is_queued", is_queued, |t| &mut t.is_queued);
    }

    pub fn delta_task_runahead(&mut self, task_id: &str, is_runahead: bool) {
        self.patch_task_bool(task_id, "is_runahead", is_runahead, |t| &mut t.is_runahead);
    }

    fn patch_task_bool(
        &mut self,
        task_id: &str,
        field: &str,
        value: bool,
        accessor: impl FnOnce(&mut TaskProxy) -> &mut bool,
    ) {
        let Some(t) = self.task_proxies.get_mut(task_id) else { return };
        *accessor(t) = value;
        let first_parent = t.first_parent.clone();
        let mut patch = Map::new();
        patch.insert(field.to_string(), serde_json::json!(value));
        self.task_proxy_delta.buffer_updated(task_id.to_string(), patch);
        if let Some(fp) = first_parent {
            self.families_dirty.insert(fp);
        }
    }

    /// Union new flow numbers into a task's membership. `flow_nums` is in
    /// `clear_before_merge_fields`, so the buffered patch carries the whole
    /// post-union vector and replaces the field wholesale on merge rather
    /// than concatenating onto a value already updated in place.
    pub fn delta_task_flow_nums(&mut self, task_id: &str, new_nums: &[u64]) {
        let Some(t) = self.task_proxies.get_mut(task_id) else { return };
        let fresh: Vec<u64> = new_nums.iter().copied().filter(|n| !t.flow_nums.contains(n)).collect();
        if fresh.is_empty() {
            return;
        }
        t.flow_nums.extend(fresh);
        let mut patch = Map::new();
        patch.insert("flow_nums".to_string(), serde_json::json!(t.flow_nums));
        self.task_proxy_delta.buffer_updated(task_id.to_string(), patch);
    }

    pub fn delta_task_output(&mut self, task_id: &str, message: &str, time: Option<String>) {
        let Some(t) = self.task_proxies.get_mut(task_id) else { return };
        t.outputs.insert(
            message.to_string(),
            Output {
                message: message.to_string(),
                satisfied: true,
                time,
            },
        );
        let mut patch = Map::new();
        patch.insert("outputs".to_string(), serde_json::to_value(&t.outputs).expect("serializes"));
        self.task_proxy_delta.buffer_updated(task_id.to_string(), patch);
    }

    pub fn delta_task_prerequisite(&mut self, task_id: &str, prereq: Prerequisite) {
        let Some(t) = self.task_proxies.get_mut(task_id) else { return };
        match t.prerequisites.iter_mut().find(|p| {
            p.prereq_cycle == prereq.prereq_cycle
                && p.prereq_name == prereq.prereq_name
                && p.prereq_output == prereq.prereq_output
        }) {
            Some(existing) => *existing = prereq,
            None => t.prerequisites.push(prereq),
        }
        let mut patch = Map::new();
        patch.insert(
            "prerequisites".to_string(),
            serde_json::to_value(&t.prerequisites).expect("serializes"),
        );
        self.task_proxy_delta.buffer_updated(task_id.to_string(), patch);
    }

    pub fn delta_task_ext_trigger(&mut self, task_id: &str, label: &str, satisfied: bool) {
        let Some(t) = self.task_proxies.get_mut(task_id) else { return };
        t.external_triggers.insert(label.to_string(), satisfied);
        let mut patch = Map::new();
        patch.insert(
            "external_triggers".to_string(),
            serde_json::to_value(&t.external_triggers).expect("serializes"),
        );
        self.task_proxy_delta.buffer_updated(task_id.to_string(), patch);
    }

    pub fn delta_task_xtrigger(&mut self, task_id: &str, label: &str, satisfied: bool, time: Option<String>) {
        let Some(t) = self.task_proxies.get_mut(task_id) else { return };
        t.xtriggers.insert(
            label.to_string(),
            XTrigger {
                label: label.to_string(),
                satisfied,
                time,
            },
        );
        let mut patch = Map::new();
        patch.insert("xtriggers".to_string(), serde_json::to_value(&t.xtriggers).expect("serializes"));
        self.task_proxy_delta.buffer_updated(task_id.to_string(), patch);
    }

    pub fn delta_broadcast(&mut self, namespace: &str, runtime: Runtime) {
        self.broadcasts.insert(namespace.to_string(), runtime);
        let ids: Vec<String> = self
            .task_proxies
            .values()
            .filter(|t| t.namespace.iter().any(|n| n == namespace))
            .map(|t| t.id.clone())
            .collect();
        for id in ids {
            let def = match self.task_defs.get(&self.task_proxies[&id].name_for_lookup()) {
                Some(d) => d.clone(),
                None => continue,
            };
            let new_runtime = self.effective_runtime(&def);
            let t = self.task_proxies.get_mut(&id).expect("present");
            if t.runtime != new_runtime {
                t.runtime = new_runtime;
                let mut patch = Map::new();
                patch.insert("runtime".to_string(), serde_json::to_value(&t.runtime).expect("serializes"));
                self.task_proxy_delta.buffer_updated(id.clone(), patch);
            }
        }
    }

    // -- per-tick update --------------------------------------------

    pub fn update(&mut self, defs: &dyn GraphDefs, active_nodes: &[NodeKey], now: f64) -> Result<AllDeltas, StoreError> {
        if let Some(new_radius) = self.pending_radius.take() {
            let pruned = self.walker.set_window_extent(new_radius, active_nodes, defs);
            self.workflow.n_edge_distance = new_radius;
            let mut patch = Map::new();
            patch.insert("n_edge_distance".to_string(), serde_json::json!(new_radius));
            self.workflow_delta.updated.extend(patch);
            for id in pruned {
                self.buffer_prune(&id);
            }
        }

        let active_set: HashSet<String> = active_nodes.iter().map(|n| n.id()).collect();
        let to_prune = self.walker.prune_pass(&active_set);
        for id in &to_prune {
            self.buffer_prune(id);
        }

        if !self.families_dirty.is_empty() || self.pending_followup_rollup {
            let dirty = std::mem::take(&mut self.families_dirty);
            let order = rollup::ancestors_to_refresh(dirty, |id| {
                self.family_proxies.get(id).and_then(|f| f.first_parent.clone())
            });
            let stopped = self.workflow_stopped;
            for fam_id in order {
                self.recompute_one_family(&fam_id, stopped);
            }
            self.pending_followup_rollup = true;
        } else {
            self.pending_followup_rollup = false;
        }

        self.recompute_workflow_summary();
        self.workflow.last_updated = now;
        let mut patch = Map::new();
        patch.insert("last_updated".to_string(), serde_json::json!(now));
        self.workflow_delta.updated.extend(patch);

        self.take_batch(now)
    }

    fn buffer_prune(&mut self, id: &str) {
        if let Some(t) = self.task_proxies.remove(id) {
            self.task_proxy_delta.buffer_pruned(id.to_string());
            self.walker.forget_walk(id);
            if let Some(fp) = t.first_parent {
                if let Some(f) = self.family_proxies.get_mut(&fp) {
                    f.child_tasks.retain(|c| c != id);
                }
                self.families_dirty.insert(fp);
            }
        } else if let Some(f) = self.family_proxies.remove(id) {
            self.family_proxy_delta.buffer_pruned(id.to_string());
            if let Some(parent) = f.first_parent {
                if let Some(p) = self.family_proxies.get_mut(&parent) {
                    p.child_families.retain(|c| c != id);
                }
            }
        }
        let dead_edges: Vec<String> = self
            .edges
            .iter()
            .filter(|(_, e)| e.source == id || e.target == id)
            .map(|(k, _)| k.clone())
            .collect();
        for e in dead_edges {
            self.edges.remove(&e);
            self.edge_delta.buffer_pruned(e);
        }
    }

    fn recompute_one_family(&mut self, fam_id: &str, stopped: bool) {
        let Some(mut fam) = self.family_proxies.get(fam_id).cloned() else { return };
        let child_tasks: Vec<TaskProxy> = fam
            .child_tasks
            .iter()
            .filter_map(|id| self.task_proxies.get(id).cloned())
            .collect();
        let child_families: Vec<FamilyProxy> = fam
            .child_families
            .iter()
            .filter_map(|id| self.family_proxies.get(id).cloned())
            .collect();
        let ct_refs: Vec<&TaskProxy> = child_tasks.iter().collect();
        let cf_refs: Vec<&FamilyProxy> = child_families.iter().collect();
        rollup::recompute_family(&mut fam, &ct_refs, &cf_refs, stopped);
        self.family_proxy_delta.buffer_added(fam_id.to_string(), fam.clone());
        self.family_proxies.insert(fam_id.to_string(), fam);
    }

    fn recompute_workflow_summary(&mut self) {
        let roots: Vec<&FamilyProxy> = self
            .family_proxies
            .values()
            .filter(|f| f.id.ends_with(&format!("/{ROOT_FAMILY_NAME}")))
            .collect();
        let lone: Vec<&TaskProxy> = self.task_proxies.values().filter(|t| t.first_parent.is_none()).collect();

        let totals = rollup::workflow_state_totals(&roots, &lone);
        let held = roots.iter().map(|f| f.is_held_total).sum::<u64>() + lone.iter().filter(|t| t.is_held).count() as u64;
        let queued =
            roots.iter().map(|f| f.is_queued_total).sum::<u64>() + lone.iter().filter(|t| t.is_queued).count() as u64;
        let runahead = roots.iter().map(|f| f.is_runahead_total).sum::<u64>()
            + lone.iter().filter(|t| t.is_runahead).count() as u64;

        self.workflow.state_totals = totals.clone();
        self.workflow.is_held_total = held;
        self.workflow.is_queued_total = queued;
        self.workflow.is_runahead_total = runahead;

        let mut patch = Map::new();
        patch.insert("state_totals".to_string(), serde_json::to_value(&totals).expect("serializes"));
        patch.insert("is_held_total".to_string(), serde_json::json!(held));
        patch.insert("is_queued_total".to_string(), serde_json::json!(queued));
        patch.insert("is_runahead_total".to_string(), serde_json::json!(runahead));
        self.workflow_delta.updated.extend(patch);
    }

    fn take_batch(&mut self, now: f64) -> Result<AllDeltas, StoreError> {
        delta::apply_delta(&mut self.task_defs, &self.task_delta, "task_def")?;
        delta::apply_delta(&mut self.family_defs, &self.family_delta, "family_def")?;
        delta::apply_delta(&mut self.task_proxies, &self.task_proxy_delta, "task_proxy")?;
        delta::apply_delta(&mut self.family_proxies, &self.family_proxy_delta, "family_proxy")?;
        delta::apply_delta(&mut self.jobs, &self.job_delta, "job")?;
        delta::apply_delta(&mut self.edges, &self.edge_delta, "edge")?;

        let batch = AllDeltas {
            workflow: FramedWorkflowDelta {
                delta: std::mem::take(&mut self.workflow_delta),
                time: now,
                reloaded: self.workflow.reloaded,
            },
            tasks: FramedDelta {
                checksum: delta::adler32_of_sorted_ids(self.task_defs.keys().map(String::as_str)),
                delta: std::mem::take(&mut self.task_delta),
                time: now,
                reloaded: self.workflow.reloaded,
            },
            task_proxies: FramedDelta {
                checksum: delta::adler32_of_sorted_ids(self.task_proxies.keys().map(String::as_str)),
                delta: std::mem::take(&mut self.task_proxy_delta),
                time: now,
                reloaded: self.workflow.reloaded,
            },
            families: FramedDelta {
                checksum: delta::adler32_of_sorted_ids(self.family_defs.keys().map(String::as_str)),
                delta: std::mem::take(&mut self.family_delta),
                time: now,
                reloaded: self.workflow.reloaded,
            },
            family_proxies: FramedDelta {
                checksum: delta::adler32_of_sorted_ids(self.family_proxies.keys().map(String::as_str)),
                delta: std::mem::take(&mut self.family_proxy_delta),
                time: now,
                reloaded: self.workflow.reloaded,
            },
            jobs: FramedDelta {
                checksum: delta::adler32_of_sorted_ids(self.jobs.keys().map(String::as_str)),
                delta: std::mem::take(&mut self.job_delta),
                time: now,
                reloaded: self.workflow.reloaded,
            },
            edges: FramedDelta {
                checksum: delta::adler32_of_sorted_ids(self.edges.keys().map(String::as_str)),
                delta: std::mem::take(&mut self.edge_delta),
                time: now,
                reloaded: self.workflow.reloaded,
            },
        };
        Ok(batch)
    }

    /// A full point-in-time dump of every live entity, framed the same way
    /// as an incremental batch but with everything in `added` — used to
    /// bootstrap a newly connected subscriber.
    pub fn entire_snapshot(&mut self, now: f64) -> Result<AllDeltas, StoreError> {
        self.workflow_delta.added = serde_json::to_value(&self.workflow).expect("serializes").as_object().cloned();
        for (id, v) in self.task_defs.clone() {
            self.task_delta.buffer_added(id, v);
        }
        for (id, v) in self.family_defs.clone() {
            self.family_delta.buffer_added(id, v);
        }
        for (id, v) in self.task_proxies.clone() {
            self.task_proxy_delta.buffer_added(id, v);
        }
        for (id, v) in self.family_proxies.clone() {
            self.family_proxy_delta.buffer_added(id, v);
        }
        for (id, v) in self.jobs.clone() {
            self.job_delta.buffer_added(id, v);
        }
        for (id, v) in self.edges.clone() {
            self.edge_delta.buffer_added(id, v);
        }
        self.take_batch(now)
    }

    pub fn mark_workflow_stopped(&mut self, stopped: bool) {
        self.workflow_stopped = stopped;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTimeField {
    Submitted,
    Started,
    Finished,
}

impl TaskProxy {
    fn name_for_lookup(&self) -> String {
        self.id.rsplit('/').next().unwrap_or_default().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_window::NodeKey;

    struct Linear;
    impl GraphDefs for Linear {
        fn children(&self, node: &NodeKey) -> Vec<NodeKey> {
            match node.name.as_str() {
                "a" => vec![NodeKey::new(&node.cycle_point, "b")],
                "b" => vec![NodeKey::new(&node.cycle_point, "c")],
                _ => vec![],
            }
        }
        fn parents(&self, node: &NodeKey) -> Vec<NodeKey> {
            match node.name.as_str() {
                "b" => vec![NodeKey::new(&node.cycle_point, "a")],
                "c" => vec![NodeKey::new(&node.cycle_point, "b")],
                _ => vec![],
            }
        }
        fn def_exists(&self, name: &str) -> bool {
            matches!(name, "a" | "b" | "c")
        }
    }

    fn taskdef(name: &str) -> TaskDef {
        TaskDef {
            id: format!("alice|flow|$namespace|{name}"),
            name: name.to_string(),
            depth: 0,
            namespace: vec![name.to_string()],
            first_parent: Some(ROOT_FAMILY_NAME.to_string()),
            parents: vec![],
            mean_elapsed_time: 0.0,
            title: String::new(),
            description: String::new(),
            url: String::new(),
            user_metadata: serde_json::Value::Null,
            runtime: Runtime::default(),
            proxies: vec![],
        }
    }

    fn root_family() -> FamilyDef {
        FamilyDef {
            id: format!("alice|flow|$namespace|{ROOT_FAMILY_NAME}"),
            name: ROOT_FAMILY_NAME.to_string(),
            depth: 0,
            parents: vec![],
            first_parent: None,
            child_tasks: vec!["a".into(), "b".into(), "c".into()],
            child_families: vec![],
            runtime: Runtime::default(),
            proxies: vec![],
        }
    }

    fn seeded_store() -> DataStore {
        let mut store = DataStore::new("alice", "flow");
        store.initiate(
            vec![taskdef("a"), taskdef("b"), taskdef("c")],
            vec![root_family()],
            1,
            false,
        );
        store
    }

    #[test]
    fn increment_window_materializes_task_and_family_proxies() {
        let mut store = seeded_store();
        let a = NodeKey::new("1", "a");
        store.increment_window(&a, false, &Linear);
        assert!(store.task_proxies.contains_key("1/a"));
        assert!(store.task_proxies.contains_key("1/b"));
        assert!(store.family_proxies.contains_key("1/root"));
        assert_eq!(store.family_proxies["1/root"].child_tasks.len(), 2);
    }

    #[test]
    fn state_change_marks_family_dirty_and_rolls_up_on_update() {
        let mut store = seeded_store();
        let a = NodeKey::new("1", "a");
        store.increment_window(&a, false, &Linear);
        store.delta_task_state("1/a", TaskState::Running);
        let active = [a];
        let batch = store.update(&Linear, &active, 100.0).unwrap();
        assert!(!batch.is_empty());
        assert_eq!(store.family_proxies["1/root"].state, Some(TaskState::Running));
    }

    #[test]
    fn prune_pass_removes_nodes_that_left_the_window() {
        let mut store = seeded_store();
        let a = NodeKey::new("1", "a");
        store.increment_window(&a, false, &Linear);
        let b = NodeKey::new("1", "b");
        store.increment_window(&b, false, &Linear);

        let active = [b.clone()];
        let batch = store.update(&Linear, &active, 1.0).unwrap();
        assert!(batch.task_proxies.delta.pruned.contains("1/a"));
        assert!(!store.task_proxies.contains_key("1/a"));
    }

    #[test]
    fn insert_job_updates_owning_task_proxy() {
        let mut store = seeded_store();
        let a = NodeKey::new("1", "a");
        store.increment_window(&a, false, &Linear);
        let job_id = store.insert_job("1/a", 1, "background", "localhost").unwrap();
        assert_eq!(job_id, "1/a/01");
        assert_eq!(store.task_proxies["1/a"].jobs, vec![job_id]);
        assert_eq!(store.task_proxies["1/a"].job_submit_count, 1);
    }

    #[test]
    fn broadcast_overlays_effective_runtime() {
        let mut store = seeded_store();
        let a = NodeKey::new("1", "a");
        store.increment_window(&a, false, &Linear);
        let mut rt = Runtime::default();
        rt.fields.insert("execution time limit".to_string(), serde_json::json!("PT1H"));
        store.delta_broadcast("a", rt);
        assert_eq!(
            store.task_proxies["1/a"].runtime.fields.get("execution time limit"),
            Some(&serde_json::json!("PT1H"))
        );
    }

    #[test]
    fn flow_nums_union_survives_a_full_update_tick_without_duplicating() {
        let mut store = seeded_store();
        let a = NodeKey::new("1", "a");
        store.increment_window(&a, false, &Linear);
        store.delta_task_flow_nums("1/a", &[1, 2]);
        let active = [a.clone()];
        store.update(&Linear, &active, 1.0).unwrap();
        assert_eq!(store.task_proxies["1/a"].flow_nums, vec![1, 2]);

        store.delta_task_flow_nums("1/a", &[2, 3]);
        store.update(&Linear, &active, 2.0).unwrap();
        assert_eq!(store.task_proxies["1/a"].flow_nums, vec![1, 2, 3]);
    }

    #[test]
    fn entire_snapshot_carries_every_live_entity_in_added() {
        let mut store = seeded_store();
        let a = NodeKey::new("1", "a");
        store.increment_window(&a, false, &Linear);
        let snap = store.entire_snapshot(1.0).unwrap();
        assert!(snap.task_proxies.delta.added.contains_key("1/a"));
        assert!(snap.families.delta.added.contains_key(ROOT_FAMILY_NAME));
    }
}
