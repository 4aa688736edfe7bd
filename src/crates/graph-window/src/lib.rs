//! N-distance graph window walker.
//!
//! Decides which task instances are materialized in the data store around
//! the currently active task pool, and when previously materialized
//! instances may be pruned. The walker knows nothing about task/family
//! *entities* — it only deals in [`NodeKey`] (cycle point + name) and
//! delegates "what are this node's graph children/parents" to a
//! [`GraphDefs`] implementation, which stands in for the out-of-scope
//! configuration parser and graph compiler.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

/// A node's identity within the graph: a cycle point and a task/family
/// name. Distinct from [`flow_ids::Tokens`] — the walker works purely in
/// graph-local coordinates and leaves canonical-id formatting to the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub cycle_point: String,
    pub name: String,
}

impl NodeKey {
    pub fn new(cycle_point: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            cycle_point: cycle_point.into(),
            name: name.into(),
        }
    }

    pub fn id(&self) -> String {
        format!("{}/{}", self.cycle_point, self.name)
    }
}

/// Direction an edge was discovered in during exploration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDir {
    /// `origin -> neighbor` (neighbor is a graph child of origin).
    Child,
    /// `neighbor -> origin` (neighbor is a graph parent of origin).
    Parent,
}

/// The out-of-scope configuration parser / graph compiler contract this
/// crate depends on: given a node, what are its graph children and
/// parents, and does its definition still exist.
pub trait GraphDefs {
    /// Graph children of `node`, as `(name, cycle_point)` pairs. Must
    /// already exclude any child beyond the final cycle point.
    fn children(&self, node: &NodeKey) -> Vec<NodeKey>;

    /// Graph parents of `node`, as `(name, cycle_point)` pairs.
    fn parents(&self, node: &NodeKey) -> Vec<NodeKey>;

    /// Whether `name` still has a definition (false after a reload that
    /// removed a taskdef, producing an orphaned proxy).
    fn def_exists(&self, name: &str) -> bool;
}

/// Bookkeeping record for one active task's walk.
#[derive(Debug, Clone, Default)]
pub struct Walk {
    /// Path tag string (`"c"`, `"cp"`, ...) -> node ids found there.
    pub locations: HashMap<String, HashSet<String>>,
    /// Union of all node ids this walk has touched, including the origin.
    pub walk_ids: HashSet<String>,
    /// `depth -> set(ids)` for `1..=N`.
    pub depths: HashMap<u32, HashSet<String>>,
    pub done_locs: HashSet<String>,
    pub done_ids: HashSet<String>,
    pub orphans: HashSet<String>,
    /// True once exploration has converged (no unexplored locations left).
    pub finalized: bool,
}

impl Walk {
    fn fresh(origin_id: &str) -> Self {
        let mut w = Walk::default();
        w.locations.insert(String::new(), HashSet::from([origin_id.to_string()]));
        w.walk_ids.insert(origin_id.to_string());
        w
    }
}

/// Result of one [`Walker::increment_window`] call: nodes and edges newly
/// discovered by *this* call (already-materialized nodes are not repeated).
#[derive(Debug, Clone, Default)]
pub struct WindowResult {
    pub new_nodes: Vec<(NodeKey, u32)>,
    pub new_edges: Vec<(String, String)>,
}

/// The incremental graph window walker. Owns one [`Walk`] per active task
/// plus the cross-walk prune-trigger bookkeeping used by the pruning pass.
pub struct Walker {
    radius: u32,
    walks: HashMap<String, Walk>,
    /// Node id (a boundary of some walk) -> ids to prune once that node
    /// becomes active.
    prune_candidates: HashMap<String, HashSet<String>>,
    /// Ids flagged for pruning because their trigger boundary activated.
    prune_flagged_nodes: HashSet<String>,
}

impl Walker {
    pub fn new(radius: u32) -> Self {
        Self {
            radius,
            walks: HashMap::new(),
            prune_candidates: HashMap::new(),
            prune_flagged_nodes: HashSet::new(),
        }
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    /// Grow `source`'s walk by up to one full re-exploration, and re-derive
    /// its boundary and prune triggers.
    pub fn increment_window(
        &mut self,
        source: &NodeKey,
        is_manual_submit: bool,
        defs: &dyn GraphDefs,
    ) -> WindowResult {
        let source_id = source.id();
        let needs_fresh = self
            .walks
            .get(&source_id)
            .map(|w| w.finalized)
            .unwrap_or(true);

        let mut result = WindowResult::default();
        if needs_fresh {
            self.walks.insert(source_id.clone(), Walk::fresh(&source_id));
            result.new_nodes.push((source.clone(), 0));
        }

        if self.radius > 0 {
            loop {
                let progressed = self.explore_once(&source_id, defs, &mut result);
                if !progressed {
                    break;
                }
            }
        }

        let walk = self.walks.get_mut(&source_id).expect("walk just inserted");
        let boundary = compute_boundary(walk);
        let boundary: HashSet<String> = if boundary.is_empty() {
            HashSet::from([source_id.clone()])
        } else {
            boundary
        };

        for b in &boundary {
            self.prune_candidates
                .entry(b.clone())
                .or_default()
                .extend(walk.walk_ids.iter().cloned());
        }
        if is_manual_submit {
            self.prune_candidates
                .entry(source_id.clone())
                .or_default()
                .extend(walk.walk_ids.iter().cloned());
        }
        walk.finalized = true;

        // If the origin is itself already a prune trigger for some other
        // walk, merge that walk's candidates and drop the trigger.
        if let Some(candidates) = self.prune_candidates.remove(&source_id) {
            self.prune_flagged_nodes.extend(candidates);
        }

        result
    }

    /// One pass of the exploration phase. Returns whether any location
    /// advanced (callers loop until this returns `false`).
    fn explore_once(
        &mut self,
        source_id: &str,
        defs: &dyn GraphDefs,
        result: &mut WindowResult,
    ) -> bool {
        let walk = self.walks.get_mut(source_id).expect("walk present");
        let tags: Vec<String> = walk
            .locations
            .keys()
            .filter(|t| !walk.done_locs.contains(*t) && (t.len() as u32) < self.radius)
            .cloned()
            .collect();

        let mut progressed = false;
        for tag in tags {
            let depth = tag.len() as u32 + 1;
            let ids: Vec<String> = walk
                .locations
                .get(&tag)
                .into_iter()
                .flatten()
                .filter(|id| !walk.done_ids.contains(*id))
                .cloned()
                .collect();

            if ids.is_empty() {
                walk.done_locs.insert(tag.clone());
                continue;
            }

            let mut child_tag_ids: HashSet<String> = HashSet::new();
            let mut parent_tag_ids: HashSet<String> = HashSet::new();

            for id in &ids {
                progressed = true;
                walk.done_ids.insert(id.clone());
                let Some(node) = parse_node(id) else { continue };
                if !defs.def_exists(&node.name) {
                    walk.orphans.insert(id.clone());
                    continue;
                }

                for child in defs.children(&node) {
                    let cid = child.id();
                    if walk.walk_ids.contains(&cid) {
                        continue; // cycle guard
                    }
                    if walk.walk_ids.insert(cid.clone()) {
                        result.new_nodes.push((child.clone(), depth));
                    }
                    result.new_edges.push((id.clone(), cid.clone()));
                    walk.depths.entry(depth).or_default().insert(cid.clone());
                    child_tag_ids.insert(cid);
                }
                for parent in defs.parents(&node) {
                    let pid = parent.id();
                    if walk.walk_ids.contains(&pid) {
                        continue;
                    }
                    if walk.walk_ids.insert(pid.clone()) {
                        result.new_nodes.push((parent.clone(), depth));
                    }
                    result.new_edges.push((pid.clone(), id.clone()));
                    walk.depths.entry(depth).or_default().insert(pid.clone());
                    parent_tag_ids.insert(pid);
                }
            }

            if !child_tag_ids.is_empty() {
                walk.locations
                    .entry(format!("{tag}c"))
                    .or_default()
                    .extend(child_tag_ids);
            }
            if !parent_tag_ids.is_empty() {
                walk.locations
                    .entry(format!("{tag}p"))
                    .or_default()
                    .extend(parent_tag_ids);
            }
        }

        progressed
    }

    /// The pruning pass, run once per update tick.
    pub fn prune_pass(&mut self, active_set: &HashSet<String>) -> HashSet<String> {
        let all_n_window_nodes: HashSet<String> =
            self.walks.values().flat_map(|w| w.walk_ids.iter().cloned()).collect();

        let mut out_paths_nodes: HashSet<String> = self.prune_flagged_nodes.clone();
        for flagged in &self.prune_flagged_nodes {
            if let Some(w) = self.walks.get(flagged) {
                out_paths_nodes.extend(w.walk_ids.iter().cloned());
            }
        }

        let to_prune: HashSet<String> = out_paths_nodes
            .difference(&all_n_window_nodes)
            .filter(|id| !active_set.contains(*id))
            .cloned()
            .collect();

        self.prune_flagged_nodes.clear();
        to_prune
    }

    /// Window resize: capture, clear, replay for every active task, return
    /// the set difference (old - new) to prune.
    pub fn set_window_extent(
        &mut self,
        new_radius: u32,
        active: &[NodeKey],
        defs: &dyn GraphDefs,
    ) -> HashSet<String> {
        if new_radius == self.radius {
            return HashSet::new(); // already at this radius, nothing to do.
        }
        let old_nodes: HashSet<String> =
            self.walks.values().flat_map(|w| w.walk_ids.iter().cloned()).collect();

        self.walks.clear();
        self.prune_candidates.clear();
        self.prune_flagged_nodes.clear();
        self.radius = new_radius;

        let mut new_nodes: HashSet<String> = active.iter().map(|n| n.id()).collect();
        for origin in active {
            let r = self.increment_window(origin, false, defs);
            new_nodes.extend(r.new_nodes.iter().map(|(n, _)| n.id()));
        }

        old_nodes.difference(&new_nodes).cloned().collect()
    }

    /// Drop a finished walk entirely (its origin left the active set and
    /// all its nodes have since been pruned).
    pub fn forget_walk(&mut self, origin_id: &str) {
        self.walks.remove(origin_id);
    }

    pub fn walk_ids_for(&self, origin_id: &str) -> Option<&HashSet<String>> {
        self.walks.get(origin_id).map(|w| &w.walk_ids)
    }
}

/// Boundary nodes: ids at the deepest child-only locations (tags containing
/// only `c`).
fn compute_boundary(walk: &Walk) -> HashSet<String> {
    let max_len = walk
        .locations
        .keys()
        .filter(|t| !t.is_empty() && t.chars().all(|c| c == 'c'))
        .map(|t| t.len())
        .max();
    match max_len {
        None => HashSet::new(),
        Some(len) => walk
            .locations
            .iter()
            .filter(|(t, _)| t.len() == len && t.chars().all(|c| c == 'c'))
            .flat_map(|(_, ids)| ids.iter().cloned())
            .collect(),
    }
}

fn parse_node(id: &str) -> Option<NodeKey> {
    let (cycle_point, name) = id.split_once('/')?;
    Some(NodeKey::new(cycle_point, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `a -> b -> c`, each at the same cycle point.
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

    #[test]
    fn linear_graph_n1_materializes_one_hop_each_side() {
        let mut w = Walker::new(1);
        let a = NodeKey::new("1", "a");
        let r = w.increment_window(&a, false, &Linear);
        let ids: HashSet<String> = r.new_nodes.iter().map(|(n, _)| n.id()).collect();
        assert!(ids.contains("1/a"));
        assert!(ids.contains("1/b"));
        assert!(!ids.contains("1/c"));
        assert_eq!(r.new_edges, vec![("1/a".to_string(), "1/b".to_string())]);
    }

    #[test]
    fn boundary_release_prunes_origin_walk_when_b_activates() {
        let mut w = Walker::new(1);
        let a = NodeKey::new("1", "a");
        w.increment_window(&a, false, &Linear);

        let b = NodeKey::new("1", "b");
        w.increment_window(&b, false, &Linear);

        // `b` was a's boundary node; a leaves the active set.
        let mut active: HashSet<String> = HashSet::new();
        active.insert("1/b".to_string());
        let to_prune = w.prune_pass(&active);
        assert!(to_prune.contains("1/a"));
        assert!(!to_prune.contains("1/b"));
    }

    #[test]
    fn resize_is_idempotent_after_first_call() {
        let mut w = Walker::new(1);
        let a = NodeKey::new("1", "a");
        // First resize: walk is rebuilt at the new radius, nothing old to drop yet.
        let pruned1 = w.set_window_extent(2, &[a.clone()], &Linear);
        assert!(pruned1.is_empty());
        let pruned2 = w.set_window_extent(2, &[a.clone()], &Linear);
        assert!(pruned2.is_empty());
    }

    #[test]
    fn zero_radius_materializes_only_active_nodes() {
        let mut w = Walker::new(0);
        let a = NodeKey::new("1", "a");
        let r = w.increment_window(&a, false, &Linear);
        assert_eq!(r.new_nodes.len(), 1);
        assert!(r.new_edges.is_empty());
    }

    #[test]
    fn orphan_node_is_recorded_without_edges() {
        struct NoDefs;
        impl GraphDefs for NoDefs {
            fn children(&self, _: &NodeKey) -> Vec<NodeKey> {
                vec![]
            }
            fn parents(&self, _: &NodeKey) -> Vec<NodeKey> {
                vec![]
            }
            fn def_exists(&self, _: &str) -> bool {
                false
            }
        }
        let mut w = Walker::new(2);
        let a = NodeKey::new("1", "ghost");
        w.increment_window(&a, false, &NoDefs);
        let walk = w.walks.get("1/ghost").unwrap();
        assert!(walk.orphans.contains("1/ghost"));
    }
}
